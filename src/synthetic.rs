//! Deterministic synthetic market data
//!
//! Builds daily series with a known shape so detection and lifecycle
//! behaviour can be checked end to end without a market data collector.
//! - `vcp_series`: lead-in uptrend, then a base of shrinking pullbacks
//! - `random_walk_series`: seeded noise with no intended structure
//! - `sample_dataset`: a mixed universe, written out by the `synth` command

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dataset::MarketDataset;
use crate::types::{InstitutionalFlow, Market, PriceBar, TickerInfo};

/// Intraday range added around open/close
const WICK: f64 = 0.002;

/// Shape parameters for a synthetic contraction base
#[derive(Debug, Clone)]
pub struct VcpShape {
    /// Close at the start of the lead-in trend
    pub start_price: f64,
    /// Close at the top of the lead-in trend, where the base begins
    pub base_high: f64,
    pub lead_in_bars: usize,
    /// Depth of each contraction as a fraction of its peak
    pub depths: Vec<f64>,
    /// Offset of each contraction's peak below `base_high`; first is usually 0
    pub peak_offsets: Vec<f64>,
    /// Sessions per leg, down and up
    pub leg_bars: usize,
    pub base_volume: u64,
    /// Volume multiplier for the final contraction and the rally after it
    pub final_volume_ratio: f64,
    /// Where the last close sits below the final peak
    pub close_below_pivot: f64,
}

impl Default for VcpShape {
    fn default() -> Self {
        Self {
            start_price: 40_000.0,
            base_high: 60_000.0,
            lead_in_bars: 100,
            depths: vec![0.20, 0.12, 0.06],
            peak_offsets: vec![0.0, 0.005, 0.01],
            leg_bars: 10,
            base_volume: 500_000,
            final_volume_ratio: 0.25,
            close_below_pivot: 0.005,
        }
    }
}

impl VcpShape {
    /// Close of the final contraction's peak
    pub fn final_peak(&self) -> f64 {
        let offset = self.peak_offsets.last().copied().unwrap_or(0.0);
        self.base_high * (1.0 - offset)
    }

    /// Total sessions the shape produces
    pub fn len(&self) -> usize {
        self.lead_in_bars + self.depths.len() * 2 * self.leg_bars
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn next_business_day(date: NaiveDate) -> NaiveDate {
    let mut next = date + Duration::days(1);
    while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
        next += Duration::days(1);
    }
    next
}

/// `count` weekdays starting at `start` (or the next weekday if it falls on a weekend)
pub fn business_days(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(count);
    let mut date = start;
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date += Duration::days(1);
    }
    for _ in 0..count {
        dates.push(date);
        date = next_business_day(date);
    }
    dates
}

fn make_bar(ticker: &str, date: NaiveDate, open: f64, close: f64, volume: u64) -> PriceBar {
    PriceBar {
        ticker: ticker.to_string(),
        date,
        open,
        high: open.max(close) * (1.0 + WICK),
        low: open.min(close) * (1.0 - WICK),
        close,
        volume,
    }
}

/// Linear path from `from` (exclusive) to `to` (inclusive) in `steps` closes
fn leg(from: f64, to: f64, steps: usize) -> impl Iterator<Item = f64> {
    (1..=steps).map(move |i| from + (to - from) * i as f64 / steps as f64)
}

/// Lead-in uptrend followed by the contraction sequence in `shape`.
/// The last bar closes `close_below_pivot` under the final peak.
pub fn vcp_series(ticker: &str, start: NaiveDate, shape: &VcpShape) -> Vec<PriceBar> {
    let quiet = (shape.base_volume as f64 * shape.final_volume_ratio).round() as u64;
    let mut closes: Vec<(f64, u64)> = Vec::with_capacity(shape.len());

    let lead_in = shape.lead_in_bars.max(1);
    for i in 0..lead_in {
        let t = if lead_in == 1 { 1.0 } else { i as f64 / (lead_in - 1) as f64 };
        let close = shape.start_price + (shape.base_high - shape.start_price) * t;
        closes.push((close, shape.base_volume));
    }

    let count = shape.depths.len();
    for (i, &depth) in shape.depths.iter().enumerate() {
        let offset = shape.peak_offsets.get(i).copied().unwrap_or(0.0);
        let peak = shape.base_high * (1.0 - offset);
        let trough = peak * (1.0 - depth);
        let last = i + 1 == count;
        let volume = if last { quiet } else { shape.base_volume };

        for close in leg(peak, trough, shape.leg_bars) {
            closes.push((close, volume));
        }

        let next_peak = if last {
            peak * (1.0 - shape.close_below_pivot)
        } else {
            let next_offset = shape.peak_offsets.get(i + 1).copied().unwrap_or(offset);
            shape.base_high * (1.0 - next_offset)
        };
        for close in leg(trough, next_peak, shape.leg_bars) {
            closes.push((close, volume));
        }
    }

    let dates = business_days(start, closes.len());
    let mut bars = Vec::with_capacity(closes.len());
    let mut prev_close = closes.first().map(|c| c.0).unwrap_or(shape.start_price);
    for (date, (close, volume)) in dates.into_iter().zip(closes) {
        bars.push(make_bar(ticker, date, prev_close, close, volume));
        prev_close = close;
    }
    bars
}

/// Append sessions with the given closes after the last bar
pub fn extend_series(bars: &mut Vec<PriceBar>, closes: &[f64], volume: u64) {
    let Some(last) = bars.last().cloned() else {
        return;
    };
    let mut date = last.date;
    let mut prev_close = last.close;
    for &close in closes {
        date = next_business_day(date);
        bars.push(make_bar(&last.ticker, date, prev_close, close, volume));
        prev_close = close;
    }
}

/// Seeded random walk with daily moves within +/-2.5%
pub fn random_walk_series(ticker: &str, start: NaiveDate, count: usize, seed: u64) -> Vec<PriceBar> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut close: f64 = rng.gen_range(5_000.0..100_000.0);
    let mut bars = Vec::with_capacity(count);
    for date in business_days(start, count) {
        let open = close;
        close = (close * (1.0 + rng.gen_range(-0.025..0.025))).max(100.0);
        let volume = rng.gen_range(200_000..2_000_000);
        bars.push(make_bar(ticker, date, open, close, volume));
    }
    bars
}

fn random_flows(rng: &mut StdRng, bars: &[PriceBar]) -> Vec<InstitutionalFlow> {
    bars.iter()
        .map(|bar| InstitutionalFlow {
            ticker: bar.ticker.clone(),
            date: bar.date,
            foreign_net_buy: rng.gen_range(-50_000..50_000),
            institutional_net_buy: rng.gen_range(-50_000..50_000),
        })
        .collect()
}

/// Mixed universe: every fourth ticker carries a contraction base, the rest
/// are random walks. All series end on the same session.
pub fn sample_dataset(seed: u64, tickers: usize, start: NaiveDate) -> MarketDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut dataset = MarketDataset::new();
    let length = VcpShape::default().len();

    for i in 0..tickers {
        let ticker = format!("{:06}", 900_000 + i);
        let bars = if i % 4 == 0 {
            let scale: f64 = rng.gen_range(0.8..1.2);
            let shape = VcpShape {
                start_price: 40_000.0 * scale,
                base_high: 60_000.0 * scale,
                depths: vec![
                    rng.gen_range(0.18..0.30),
                    rng.gen_range(0.10..0.14),
                    rng.gen_range(0.04..0.07),
                ],
                ..Default::default()
            };
            vcp_series(&ticker, start, &shape)
        } else {
            random_walk_series(&ticker, start, length, rng.gen())
        };

        let flows = random_flows(&mut rng, &bars);
        let market = if i % 2 == 0 { Market::Kospi } else { Market::Kosdaq };
        let mut info = TickerInfo::new(&ticker, &format!("Synthetic {}", i), market);
        info.market_cap = Some(rng.gen_range(1.0e11..5.0e12));

        dataset.insert_bars(&ticker, bars);
        dataset.insert_info(info);
        for flow in flows {
            dataset.insert_flow(flow);
        }
    }
    dataset
}
