//! Universe screening
//!
//! Cheap filters run first (listing status, market, name, market cap,
//! staleness, price, liquidity, investor flows); the detector only sees
//! tickers that survive them. Tickers are evaluated in parallel and the
//! outcome is ranked deterministically:
//! score desc, final contraction depth asc, ticker asc.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tracing::{debug, info};

use crate::config::{DetectorConfig, UniverseFilter};
use crate::dataset::{MarketDataset, TickerHistory};
use crate::error::ScanError;
use crate::indicators::average_dollar_volume;
use crate::pattern::{PatternDetector, VcpCandidate};
use crate::types::ListingStatus;

/// A ticker that could not be evaluated because of its data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTicker {
    pub ticker: String,
    /// Short machine-readable reason, e.g. `insufficient_history`
    pub reason: String,
    pub detail: String,
}

impl SkippedTicker {
    fn new(ticker: &str, reason: &str, detail: impl Into<String>) -> Self {
        Self {
            ticker: ticker.to_string(),
            reason: reason.to_string(),
            detail: detail.into(),
        }
    }
}

/// Result of one screening pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreenOutcome {
    /// Ranked, unique by ticker, at most `max_results`
    pub candidates: Vec<VcpCandidate>,
    pub skipped: Vec<SkippedTicker>,
    /// Ordinary misses tallied by reason
    pub rejections: BTreeMap<String, usize>,
    /// Tickers that reached the detector
    pub evaluated: usize,
}

enum Verdict {
    Candidate(Box<VcpCandidate>),
    Skipped(SkippedTicker),
    Rejected { reason: &'static str, evaluated: bool },
    Cancelled,
}

pub struct Screener {
    detector: PatternDetector,
    universe: UniverseFilter,
}

impl Screener {
    pub fn new(detector: DetectorConfig, universe: UniverseFilter) -> Self {
        Self {
            detector: PatternDetector::new(detector),
            universe,
        }
    }

    /// Screen every ticker in the dataset as of `as_of`.
    ///
    /// Only `Cancelled` is returned as an error; per-ticker problems end up
    /// in the skipped manifest.
    pub fn screen(
        &self,
        dataset: &MarketDataset,
        as_of: NaiveDate,
        cancel: Option<&AtomicBool>,
    ) -> Result<ScreenOutcome, ScanError> {
        let is_cancelled = || cancel.is_some_and(|flag| flag.load(AtomicOrdering::Relaxed));

        let histories: Vec<(&String, &TickerHistory)> = dataset.histories().collect();
        let verdicts: Vec<Verdict> = histories
            .par_iter()
            .map(|(ticker, history)| {
                if is_cancelled() {
                    return Verdict::Cancelled;
                }
                self.screen_ticker(ticker, history, as_of)
            })
            .collect();

        if is_cancelled() || verdicts.iter().any(|v| matches!(v, Verdict::Cancelled)) {
            return Err(ScanError::Cancelled { as_of });
        }

        let mut outcome = ScreenOutcome::default();
        for (ticker, error) in dataset.issues() {
            outcome.skipped.push(SkippedTicker::new(ticker, "invalid_data", error.to_string()));
        }

        for verdict in verdicts {
            match verdict {
                Verdict::Candidate(candidate) => {
                    outcome.evaluated += 1;
                    outcome.candidates.push(*candidate);
                }
                Verdict::Skipped(skipped) => outcome.skipped.push(skipped),
                Verdict::Rejected { reason, evaluated } => {
                    if evaluated {
                        outcome.evaluated += 1;
                    }
                    *outcome.rejections.entry(reason.to_string()).or_default() += 1;
                }
                Verdict::Cancelled => {}
            }
        }
        outcome.skipped.sort_by(|a, b| a.ticker.cmp(&b.ticker));

        rank_candidates(&mut outcome.candidates);
        outcome.candidates.truncate(self.universe.max_results);

        info!(
            "Screened {} tickers as of {}: {} evaluated, {} candidates, {} skipped",
            dataset.len() + dataset.issues().len(),
            as_of,
            outcome.evaluated,
            outcome.candidates.len(),
            outcome.skipped.len()
        );
        Ok(outcome)
    }

    fn screen_ticker(&self, ticker: &str, history: &TickerHistory, as_of: NaiveDate) -> Verdict {
        let u = &self.universe;
        let filtered = |reason: &'static str| {
            debug!("{}: filtered ({})", ticker, reason);
            Verdict::Rejected { reason, evaluated: false }
        };

        let bars = history.bars_as_of(as_of);
        let Some(last) = bars.last() else {
            return Verdict::Skipped(SkippedTicker::new(ticker, "no_history", format!("no bars on or before {}", as_of)));
        };

        if let Some(info) = &history.info {
            match info.status {
                ListingStatus::Listed => {}
                ListingStatus::Suspended => return filtered("suspended"),
                ListingStatus::Delisted => return filtered("delisted"),
            }
            if !u.markets.is_empty() && !u.markets.contains(&info.market) {
                return filtered("market");
            }
            if u.exclude_name_keywords.iter().any(|k| !k.is_empty() && info.name.contains(k.as_str())) {
                return filtered("name_keyword");
            }
            if let (Some(min_cap), Some(cap)) = (u.min_market_cap, info.market_cap) {
                if cap < min_cap {
                    return filtered("market_cap");
                }
            }
        }

        let age = (as_of - last.date).num_days();
        if age > u.max_staleness_days {
            return Verdict::Skipped(SkippedTicker::new(
                ticker,
                "stale",
                format!("last bar {} is {} days before {}", last.date, age, as_of),
            ));
        }

        if last.close < u.min_price || u.max_price.is_some_and(|max| last.close > max) {
            return filtered("price");
        }
        if average_dollar_volume(bars, u.liquidity_window) < u.min_avg_dollar_volume {
            return filtered("liquidity");
        }

        let flow = (!history.flows.is_empty()).then(|| history.flow_summary(as_of));
        if u.exclude_distribution && flow.is_some_and(|f| f.is_distribution()) {
            return filtered("distribution");
        }

        match self.detector.evaluate(ticker, bars, as_of) {
            Ok(mut candidate) => {
                candidate.flow = flow;
                debug!(
                    "{}: candidate score {:.2}, {} contractions, pivot {:.0}",
                    ticker, candidate.score, candidate.contraction_count, candidate.pivot_price
                );
                Verdict::Candidate(Box::new(candidate))
            }
            Err(rejection) if rejection.is_data_issue() => {
                Verdict::Skipped(SkippedTicker::new(ticker, rejection.kind(), rejection.to_string()))
            }
            Err(rejection) => {
                debug!("{}: {}", ticker, rejection);
                Verdict::Rejected { reason: rejection.kind(), evaluated: true }
            }
        }
    }
}

/// Score desc, final contraction depth asc, ticker asc
pub fn compare_candidates(a: &VcpCandidate, b: &VcpCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.final_depth().total_cmp(&b.final_depth()))
        .then_with(|| a.ticker.cmp(&b.ticker))
}

/// Sort by `compare_candidates` and keep the best entry per ticker
pub fn rank_candidates(candidates: &mut Vec<VcpCandidate>) {
    candidates.sort_by(compare_candidates);
    let mut seen = HashSet::new();
    candidates.retain(|c| seen.insert(c.ticker.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::{vcp_series, VcpShape};
    use crate::types::{InstitutionalFlow, Market, TickerInfo};

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()
    }

    fn screener() -> Screener {
        Screener::new(DetectorConfig::default(), UniverseFilter::default())
    }

    fn universe() -> (MarketDataset, NaiveDate) {
        let mut dataset = MarketDataset::new();
        let shape = VcpShape::default();
        dataset.insert_bars("005930", vcp_series("005930", start(), &shape));
        let tighter = VcpShape {
            depths: vec![0.18, 0.10, 0.04],
            ..Default::default()
        };
        dataset.insert_bars("000660", vcp_series("000660", start(), &tighter));
        // Straight uptrend: the base high is the last bar
        let trend = VcpShape {
            lead_in_bars: shape.len(),
            depths: Vec::new(),
            peak_offsets: Vec::new(),
            ..Default::default()
        };
        dataset.insert_bars("035420", vcp_series("035420", start(), &trend));
        let as_of = dataset.latest_date().unwrap();
        (dataset, as_of)
    }

    #[test]
    fn test_screen_ranks_candidates() {
        let (dataset, as_of) = universe();
        let outcome = screener().screen(&dataset, as_of, None).unwrap();

        let tickers: Vec<&str> = outcome.candidates.iter().map(|c| c.ticker.as_str()).collect();
        assert!(tickers.contains(&"005930"));
        assert!(tickers.contains(&"000660"));
        // Shallower final contraction scores higher
        assert_eq!(tickers[0], "000660");
        assert!(outcome.candidates.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(outcome.skipped.is_empty());
    }

    #[test]
    fn test_short_history_is_skipped_not_failed() {
        let (mut dataset, as_of) = universe();
        let bars = vcp_series("123456", start(), &VcpShape::default());
        dataset.insert_bars("123456", bars[bars.len() - 40..].to_vec());

        let outcome = screener().screen(&dataset, as_of, None).unwrap();
        let skipped = outcome.skipped.iter().find(|s| s.ticker == "123456").unwrap();
        assert_eq!(skipped.reason, "insufficient_history");
        assert!(outcome.candidates.iter().all(|c| c.ticker != "123456"));
        assert!(!outcome.candidates.is_empty());
    }

    #[test]
    fn test_universe_filters() {
        let (mut dataset, as_of) = universe();
        let mut info = TickerInfo::new("005930", "Samsung Electronics Pref", Market::Kospi);
        info.market_cap = Some(5.0e11);
        dataset.insert_info(info);
        let mut suspended = TickerInfo::new("000660", "SK Hynix", Market::Kospi);
        suspended.status = ListingStatus::Suspended;
        dataset.insert_info(suspended);

        let mut universe = UniverseFilter::default();
        universe.exclude_name_keywords = vec!["Pref".to_string()];
        let outcome = Screener::new(DetectorConfig::default(), universe).screen(&dataset, as_of, None).unwrap();
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.rejections.get("name_keyword"), Some(&1));
        assert_eq!(outcome.rejections.get("suspended"), Some(&1));
    }

    #[test]
    fn test_liquidity_and_price_filters() {
        let (dataset, as_of) = universe();

        let mut universe = UniverseFilter::default();
        universe.min_avg_dollar_volume = 1.0e15;
        let outcome = Screener::new(DetectorConfig::default(), universe).screen(&dataset, as_of, None).unwrap();
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.rejections.get("liquidity"), Some(&3));
        assert_eq!(outcome.evaluated, 0);

        let mut universe = UniverseFilter::default();
        universe.max_price = Some(10_000.0);
        let outcome = Screener::new(DetectorConfig::default(), universe).screen(&dataset, as_of, None).unwrap();
        assert!(outcome.candidates.iter().all(|c| c.close <= 10_000.0));
    }

    #[test]
    fn test_distribution_flow_filter() {
        let (mut dataset, as_of) = universe();
        let dates: Vec<NaiveDate> = dataset.history("005930").unwrap().bars.iter().map(|b| b.date).collect();
        for date in dates {
            dataset.insert_flow(InstitutionalFlow {
                ticker: "005930".to_string(),
                date,
                foreign_net_buy: -1_000,
                institutional_net_buy: -500,
            });
        }

        let outcome = screener().screen(&dataset, as_of, None).unwrap();
        let candidate = outcome.candidates.iter().find(|c| c.ticker == "005930").unwrap();
        assert_eq!(candidate.flow.unwrap().foreign_5d, -5_000);

        let mut universe = UniverseFilter::default();
        universe.exclude_distribution = true;
        let outcome = Screener::new(DetectorConfig::default(), universe).screen(&dataset, as_of, None).unwrap();
        assert!(outcome.candidates.iter().all(|c| c.ticker != "005930"));
        assert_eq!(outcome.rejections.get("distribution"), Some(&1));
    }

    #[test]
    fn test_stale_ticker_skipped() {
        let (dataset, as_of) = universe();
        let later = as_of + chrono::Duration::days(10);
        let outcome = screener().screen(&dataset, later, None).unwrap();
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.skipped.len(), 3);
        assert!(outcome.skipped.iter().all(|s| s.reason == "stale"));
    }

    #[test]
    fn test_cancelled_screen() {
        let (dataset, as_of) = universe();
        let flag = AtomicBool::new(true);
        let err = screener().screen(&dataset, as_of, Some(&flag)).unwrap_err();
        assert!(matches!(err, ScanError::Cancelled { .. }));
    }

    #[test]
    fn test_max_results() {
        let (dataset, as_of) = universe();
        let mut universe = UniverseFilter::default();
        universe.max_results = 1;
        let outcome = Screener::new(DetectorConfig::default(), universe).screen(&dataset, as_of, None).unwrap();
        assert_eq!(outcome.candidates.len(), 1);
    }
}
