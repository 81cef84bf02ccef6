//! Volatility contraction detection for a single ticker
//!
//! Steps, all on sessions up to and including the as-of date:
//! 1. Drop halted sessions (zero volume); require `min_history_bars`
//! 2. Base start = first occurrence of the highest high within `max_base_bars`
//! 3. Zigzag from the base start; each confirmed (peak, trough) pair is a contraction
//! 4. Troughs must hold above every earlier trough, depths must shrink
//! 5. Final contraction volume must dry up against the base average
//! 6. Close must sit in the band around the pivot (last confirmed peak)
//!
//! Any failure returns a `Rejection`; there is no partial credit.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::scoring::ScoreBreakdown;
use super::zigzag::zigzag_from_peak;
use crate::config::DetectorConfig;
use crate::indicators::{average_volume, highest_high, pct_change, sma_close};
use crate::types::{FlowSummary, PriceBar};

/// One peak-to-trough pullback inside the base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contraction {
    pub peak_date: NaiveDate,
    pub peak: f64,
    pub trough_date: NaiveDate,
    pub trough: f64,
    /// (peak - trough) / peak
    pub depth: f64,
    /// Sessions from peak to trough
    pub bars: usize,
}

impl Contraction {
    pub fn depth_pct(&self) -> f64 {
        self.depth * 100.0
    }
}

/// A ticker whose recent history forms a valid contraction base
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VcpCandidate {
    pub ticker: String,
    pub as_of_date: NaiveDate,
    pub base_start_date: NaiveDate,
    pub base_high: f64,
    /// Lowest trough of the base
    pub base_low: f64,
    pub contraction_count: usize,
    /// Depths in percent, oldest first
    pub contraction_depths: Vec<f64>,
    pub contractions: Vec<Contraction>,
    /// High of the most recent confirmed peak
    pub pivot_price: f64,
    pub close: f64,
    pub volume_dry_up_ratio: f64,
    pub above_trend: bool,
    pub score: f64,
    pub score_breakdown: ScoreBreakdown,
    /// Investor flows ending at as-of, when the dataset has them
    pub flow: Option<FlowSummary>,
}

impl VcpCandidate {
    /// Depth of the last contraction in percent
    pub fn final_depth(&self) -> f64 {
        self.contraction_depths.last().copied().unwrap_or(0.0)
    }

    /// Signed distance of the close from the pivot in percent
    pub fn pivot_distance_pct(&self) -> f64 {
        pct_change(self.pivot_price, self.close) * 100.0
    }
}

/// Why a ticker did not qualify
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    InsufficientHistory { required: usize, got: usize },
    DegenerateVolume,
    HistoryGap { from: NaiveDate, to: NaiveDate },
    BaseTooShort { bars: usize },
    BaseUndercut { trough_date: NaiveDate },
    TooFewContractions { found: usize, required: usize },
    BaseTooDeep { depth_pct: f64 },
    NotTightening { index: usize, previous_pct: f64, depth_pct: f64 },
    InsufficientDryUp { ratio: f64 },
    OutsidePivotBand { close: f64, pivot: f64 },
    BelowTrend { close: f64 },
}

impl Rejection {
    /// Data problems land in the skipped manifest; the rest are ordinary misses
    pub fn is_data_issue(&self) -> bool {
        matches!(
            self,
            Rejection::InsufficientHistory { .. } | Rejection::DegenerateVolume | Rejection::HistoryGap { .. }
        )
    }

    /// Stable short name for tallies
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::InsufficientHistory { .. } => "insufficient_history",
            Rejection::DegenerateVolume => "degenerate_volume",
            Rejection::HistoryGap { .. } => "history_gap",
            Rejection::BaseTooShort { .. } => "base_too_short",
            Rejection::BaseUndercut { .. } => "base_undercut",
            Rejection::TooFewContractions { .. } => "too_few_contractions",
            Rejection::BaseTooDeep { .. } => "base_too_deep",
            Rejection::NotTightening { .. } => "not_tightening",
            Rejection::InsufficientDryUp { .. } => "insufficient_dry_up",
            Rejection::OutsidePivotBand { .. } => "outside_pivot_band",
            Rejection::BelowTrend { .. } => "below_trend",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::InsufficientHistory { required, got } => {
                write!(f, "insufficient history: {} of {} sessions", got, required)
            }
            Rejection::DegenerateVolume => write!(f, "no traded volume in base"),
            Rejection::HistoryGap { from, to } => write!(f, "missing sessions between {} and {}", from, to),
            Rejection::BaseTooShort { bars } => write!(f, "base only {} sessions long", bars),
            Rejection::BaseUndercut { trough_date } => write!(f, "trough on {} undercut the base low", trough_date),
            Rejection::TooFewContractions { found, required } => {
                write!(f, "{} contractions, need {}", found, required)
            }
            Rejection::BaseTooDeep { depth_pct } => write!(f, "first contraction {:.1}% too deep", depth_pct),
            Rejection::NotTightening { index, previous_pct, depth_pct } => write!(
                f,
                "contraction {} widened from {:.1}% to {:.1}%",
                index + 1,
                previous_pct,
                depth_pct
            ),
            Rejection::InsufficientDryUp { ratio } => write!(f, "volume dry-up ratio {:.2} too high", ratio),
            Rejection::OutsidePivotBand { close, pivot } => {
                write!(f, "close {:.0} outside pivot band around {:.0}", close, pivot)
            }
            Rejection::BelowTrend { close } => write!(f, "close {:.0} not above trend average", close),
        }
    }
}

/// Stateless detector; one instance can evaluate every ticker concurrently
#[derive(Debug, Clone, Default)]
pub struct PatternDetector {
    config: DetectorConfig,
}

impl PatternDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// `evaluate` with the rejection dropped
    pub fn detect(&self, ticker: &str, bars: &[PriceBar], as_of: NaiveDate) -> Option<VcpCandidate> {
        self.evaluate(ticker, bars, as_of).ok()
    }

    /// Evaluate one ticker's ascending bars as of a date. Bars after `as_of`
    /// are ignored, so the result only depends on data visible on that date.
    pub fn evaluate(&self, ticker: &str, bars: &[PriceBar], as_of: NaiveDate) -> Result<VcpCandidate, Rejection> {
        let cfg = &self.config;

        let visible = &bars[..bars.partition_point(|b| b.date <= as_of)];
        if visible.len() < cfg.min_history_bars {
            return Err(Rejection::InsufficientHistory {
                required: cfg.min_history_bars,
                got: visible.len(),
            });
        }

        let sessions: Vec<PriceBar> = visible.iter().filter(|b| !b.is_halted()).cloned().collect();
        if sessions.is_empty() {
            return Err(Rejection::DegenerateVolume);
        }
        if sessions.len() < cfg.min_history_bars {
            return Err(Rejection::InsufficientHistory {
                required: cfg.min_history_bars,
                got: sessions.len(),
            });
        }

        let n = sessions.len();
        let window_start = n.saturating_sub(cfg.max_base_bars);
        let (offset, base_high) = highest_high(&sessions[window_start..]).ok_or(Rejection::DegenerateVolume)?;
        let base_start = window_start + offset;

        let base_len = n - 1 - base_start;
        if base_len < cfg.min_base_bars {
            return Err(Rejection::BaseTooShort { bars: base_len });
        }

        for pair in sessions[base_start..].windows(2) {
            if (pair[1].date - pair[0].date).num_days() > cfg.max_calendar_gap_days {
                return Err(Rejection::HistoryGap { from: pair[0].date, to: pair[1].date });
            }
        }

        let zz = zigzag_from_peak(&sessions, base_start, cfg.min_contraction_depth);

        let declines = zz.declines();
        let mut contractions: Vec<Contraction> = Vec::with_capacity(declines.len());
        // Lowest trough so far; later troughs must hold above it
        let mut base_low: Option<f64> = None;
        for &(peak, trough) in &declines {
            if base_low.is_some_and(|low| trough.price <= low) {
                return Err(Rejection::BaseUndercut { trough_date: sessions[trough.index].date });
            }
            base_low = Some(base_low.map_or(trough.price, |low| low.min(trough.price)));
            contractions.push(Contraction {
                peak_date: sessions[peak.index].date,
                peak: peak.price,
                trough_date: sessions[trough.index].date,
                trough: trough.price,
                depth: (peak.price - trough.price) / peak.price,
                bars: trough.index - peak.index,
            });
        }

        if contractions.len() < cfg.min_contractions {
            return Err(Rejection::TooFewContractions {
                found: contractions.len(),
                required: cfg.min_contractions,
            });
        }

        if contractions[0].depth > cfg.max_base_depth {
            return Err(Rejection::BaseTooDeep { depth_pct: contractions[0].depth_pct() });
        }

        for (i, pair) in contractions.windows(2).enumerate() {
            if pair[1].depth > pair[0].depth * (1.0 + cfg.tightening_tolerance) {
                return Err(Rejection::NotTightening {
                    index: i + 1,
                    previous_pct: pair[0].depth_pct(),
                    depth_pct: pair[1].depth_pct(),
                });
            }
        }

        // Final contraction span vs the whole base from its first peak
        let (final_peak, final_trough) = match declines.last() {
            Some(&(p, t)) => (p.index, t.index),
            None => return Err(Rejection::TooFewContractions { found: 0, required: cfg.min_contractions }),
        };
        let base_volume = average_volume(&sessions[base_start..]);
        if base_volume <= 0.0 {
            return Err(Rejection::DegenerateVolume);
        }
        let dry_up_ratio = average_volume(&sessions[final_peak..=final_trough]) / base_volume;
        if dry_up_ratio > cfg.max_dry_up_ratio {
            return Err(Rejection::InsufficientDryUp { ratio: dry_up_ratio });
        }

        let pivot = zz.last_peak().map(|p| p.price).unwrap_or(base_high);
        let last = &sessions[n - 1];
        let close = last.close;
        if close < pivot * (1.0 - cfg.pivot_band) || close > pivot * (1.0 + cfg.max_extension) {
            return Err(Rejection::OutsidePivotBand { close, pivot });
        }

        let above_trend = sma_close(&sessions, cfg.trend_ma_bars).is_some_and(|sma| close > sma);
        if cfg.require_uptrend && !above_trend {
            return Err(Rejection::BelowTrend { close });
        }

        let base_low = base_low.unwrap_or(last.low);
        let depths: Vec<f64> = contractions.iter().map(|c| c.depth_pct()).collect();
        let final_depth = contractions.last().map(|c| c.depth).unwrap_or(0.0);
        let breakdown = ScoreBreakdown::compute(contractions.len(), final_depth, dry_up_ratio, above_trend, cfg);

        Ok(VcpCandidate {
            ticker: ticker.to_string(),
            as_of_date: as_of,
            base_start_date: sessions[base_start].date,
            base_high,
            base_low,
            contraction_count: contractions.len(),
            contraction_depths: depths,
            contractions,
            pivot_price: pivot,
            close,
            volume_dry_up_ratio: dry_up_ratio,
            above_trend,
            score: breakdown.score(cfg),
            score_breakdown: breakdown,
            flow: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{extend_series, vcp_series, VcpShape};
    use chrono::Duration;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
    }

    fn evaluate(bars: &[PriceBar]) -> Result<VcpCandidate, Rejection> {
        let as_of = bars.last().unwrap().date;
        PatternDetector::default().evaluate("005930", bars, as_of)
    }

    #[test]
    fn test_detects_three_contractions() {
        let bars = vcp_series("005930", start(), &VcpShape::default());
        let candidate = evaluate(&bars).unwrap();

        assert_eq!(candidate.contraction_count, 3);
        let depths = &candidate.contraction_depths;
        assert!((depths[0] - 20.0).abs() < 1.0, "depths: {:?}", depths);
        assert!((depths[1] - 12.0).abs() < 1.0, "depths: {:?}", depths);
        assert!((depths[2] - 6.0).abs() < 1.0, "depths: {:?}", depths);
        assert!(depths.windows(2).all(|w| w[1] < w[0]));

        assert!(candidate.volume_dry_up_ratio < 0.5);
        assert!(candidate.close < candidate.pivot_price);
        assert!(candidate.pivot_distance_pct() > -1.0);
        assert!(candidate.above_trend);
        assert!(candidate.score > 0.0 && candidate.score <= 100.0);
        assert_eq!(candidate.base_start_date, bars[99].date);
        assert!(candidate.base_low < candidate.contractions[1].trough);
    }

    #[test]
    fn test_insufficient_history() {
        let bars = vcp_series("005930", start(), &VcpShape::default());
        let short = &bars[bars.len() - 40..];
        assert_eq!(
            evaluate(short).unwrap_err(),
            Rejection::InsufficientHistory { required: 120, got: 40 }
        );
    }

    #[test]
    fn test_ignores_bars_after_as_of() {
        let mut bars = vcp_series("005930", start(), &VcpShape::default());
        let as_of = bars.last().unwrap().date;
        let expected = PatternDetector::default().evaluate("005930", &bars, as_of).unwrap();

        extend_series(&mut bars, &[70_000.0, 72_000.0], 2_000_000);
        let again = PatternDetector::default().evaluate("005930", &bars, as_of).unwrap();
        assert_eq!(expected, again);
    }

    #[test]
    fn test_widening_contraction_rejected() {
        // Higher lows but the third pullback is deeper than the second
        let shape = VcpShape {
            depths: vec![0.20, 0.04, 0.07],
            peak_offsets: vec![0.0, 0.15, 0.03],
            ..Default::default()
        };
        let bars = vcp_series("005930", start(), &shape);
        assert!(matches!(
            evaluate(&bars).unwrap_err(),
            Rejection::NotTightening { index: 2, .. }
        ));
    }

    #[test]
    fn test_undercut_rejected() {
        let shape = VcpShape {
            depths: vec![0.10, 0.15],
            peak_offsets: vec![0.0, 0.005],
            ..Default::default()
        };
        let bars = vcp_series("005930", start(), &shape);
        assert!(matches!(evaluate(&bars).unwrap_err(), Rejection::BaseUndercut { .. }));
    }

    #[test]
    fn test_trough_between_earlier_lows_is_accepted() {
        // Troughs 48,000 / 54,000 / 52,440: the third dips under the second
        // but holds above the base low
        let shape = VcpShape {
            depths: vec![0.20, 0.10, 0.08],
            peak_offsets: vec![0.0, 0.0, 0.05],
            ..Default::default()
        };
        let bars = vcp_series("005930", start(), &shape);
        let candidate = evaluate(&bars).unwrap();

        assert_eq!(candidate.contraction_count, 3);
        let c = &candidate.contractions;
        assert!(c[2].trough < c[1].trough);
        assert!(c[2].trough > c[0].trough);
        assert_eq!(candidate.base_low, c[0].trough);
    }

    #[test]
    fn test_slight_widening_within_tolerance_accepted() {
        // 10% then 10.4%: within the 5% relative tolerance
        let shape = VcpShape {
            depths: vec![0.20, 0.10, 0.104],
            peak_offsets: vec![0.0, 0.02, 0.04],
            ..Default::default()
        };
        let bars = vcp_series("005930", start(), &shape);
        let candidate = evaluate(&bars).unwrap();

        let depths = &candidate.contraction_depths;
        assert_eq!(depths.len(), 3);
        assert!(depths[2] > depths[1], "depths: {:?}", depths);
    }

    #[test]
    fn test_base_too_deep() {
        let shape = VcpShape {
            depths: vec![0.55, 0.20, 0.10],
            peak_offsets: vec![0.0, 0.0, 0.0],
            ..Default::default()
        };
        let bars = vcp_series("005930", start(), &shape);
        assert!(matches!(evaluate(&bars).unwrap_err(), Rejection::BaseTooDeep { .. }));
    }

    #[test]
    fn test_fresh_high_is_too_short_for_a_base() {
        let mut bars = vcp_series("005930", start(), &VcpShape::default());
        extend_series(&mut bars, &[61_000.0, 63_000.0, 62_500.0, 62_000.0], 400_000);
        assert_eq!(evaluate(&bars).unwrap_err(), Rejection::BaseTooShort { bars: 2 });
    }

    #[test]
    fn test_base_start_limited_to_recent_sessions() {
        let bars = vcp_series("005930", start(), &VcpShape::default());
        let as_of = bars.last().unwrap().date;

        // The 60,000 top at session 99 falls outside a 50-session window;
        // the base restarts at the second peak
        let mut config = DetectorConfig::default();
        config.max_base_bars = 50;
        let candidate = PatternDetector::new(config).evaluate("005930", &bars, as_of).unwrap();

        assert_eq!(candidate.base_start_date, bars[119].date);
        assert_eq!(candidate.contraction_count, 2);
        assert!(candidate.base_high < evaluate(&bars).unwrap().base_high);
    }

    #[test]
    fn test_single_contraction_rejected() {
        let shape = VcpShape {
            depths: vec![0.15],
            peak_offsets: vec![0.0],
            ..Default::default()
        };
        let bars = vcp_series("005930", start(), &shape);
        assert_eq!(
            evaluate(&bars).unwrap_err(),
            Rejection::TooFewContractions { found: 1, required: 2 }
        );
    }

    #[test]
    fn test_volume_must_dry_up() {
        let shape = VcpShape {
            final_volume_ratio: 1.5,
            ..Default::default()
        };
        let bars = vcp_series("005930", start(), &shape);
        assert!(matches!(
            evaluate(&bars).unwrap_err(),
            Rejection::InsufficientDryUp { .. }
        ));
    }

    #[test]
    fn test_extended_breakout_rejected() {
        // Peaks set well under the base high so the breakout is not a new base high
        let shape = VcpShape {
            peak_offsets: vec![0.0, 0.05, 0.08],
            ..Default::default()
        };
        let mut bars = vcp_series("005930", start(), &shape);
        assert!(evaluate(&bars).is_ok());

        let pivot = shape.final_peak();
        extend_series(&mut bars, &[pivot * 1.02, pivot * 1.05], 200_000);
        assert!(matches!(
            evaluate(&bars).unwrap_err(),
            Rejection::OutsidePivotBand { .. }
        ));
    }

    #[test]
    fn test_halted_volume_is_degenerate() {
        let mut bars = vcp_series("005930", start(), &VcpShape::default());
        for bar in bars.iter_mut() {
            bar.volume = 0;
        }
        assert_eq!(evaluate(&bars).unwrap_err(), Rejection::DegenerateVolume);
    }

    #[test]
    fn test_calendar_gap_in_base_rejected() {
        let mut bars = vcp_series("005930", start(), &VcpShape::default());
        for bar in bars.iter_mut().skip(130) {
            bar.date += Duration::days(30);
        }
        assert!(matches!(evaluate(&bars).unwrap_err(), Rejection::HistoryGap { .. }));
    }

    #[test]
    fn test_holidays_do_not_create_contractions() {
        let mut bars = vcp_series("005930", start(), &VcpShape::default());
        for idx in [145, 135, 120] {
            bars.remove(idx);
        }
        let candidate = evaluate(&bars).unwrap();
        assert_eq!(candidate.contraction_count, 3);
    }

    #[test]
    fn test_trend_context() {
        let bars = vcp_series("005930", start(), &VcpShape::default());
        let as_of = bars.last().unwrap().date;

        // Not enough sessions for the average: not above trend, lower score
        let mut config = DetectorConfig::default();
        config.trend_ma_bars = 500;
        let candidate = PatternDetector::new(config.clone()).evaluate("005930", &bars, as_of).unwrap();
        assert!(!candidate.above_trend);
        let baseline = evaluate(&bars).unwrap();
        assert!(candidate.score < baseline.score);

        config.require_uptrend = true;
        assert!(matches!(
            PatternDetector::new(config).evaluate("005930", &bars, as_of).unwrap_err(),
            Rejection::BelowTrend { .. }
        ));
    }

    #[test]
    fn test_rejection_display() {
        let r = Rejection::InsufficientHistory { required: 120, got: 40 };
        assert_eq!(r.to_string(), "insufficient history: 40 of 120 sessions");
        assert!(r.is_data_issue());
        assert_eq!(r.kind(), "insufficient_history");
        assert!(!Rejection::BaseTooShort { bars: 3 }.is_data_issue());
    }
}
