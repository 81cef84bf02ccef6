//! One scan day, end to end
//!
//! screen universe -> snapshot as-of quotes -> reconcile signals -> persist.
//! Nothing is written until every stage has succeeded; a cancelled or
//! failed scan leaves the store exactly as it was.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::config::ScanConfig;
use crate::dataset::MarketDataset;
use crate::error::{ConfigError, Result, ScanError};
use crate::pattern::VcpCandidate;
use crate::screener::{Screener, SkippedTicker};
use crate::signals::{PriceSnapshot, Signal, SignalLifecycleManager, SignalStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Tickers in the dataset, including ones rejected at load
    pub universe: usize,
    /// Tickers that reached the pattern detector
    pub evaluated: usize,
    pub candidates: usize,
    pub skipped: usize,
    /// Open signals after reconciliation
    pub open_signals: usize,
}

/// Everything a scan produced for one as-of date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub as_of: NaiveDate,
    /// Ranked candidates
    pub candidates: Vec<VcpCandidate>,
    pub created: Vec<Signal>,
    pub confirmed: Vec<Signal>,
    pub invalidated: Vec<Signal>,
    pub expired: Vec<Signal>,
    pub unchanged: Vec<Signal>,
    pub skipped: Vec<SkippedTicker>,
    pub rejections: BTreeMap<String, usize>,
    pub stats: ScanStats,
}

pub struct Scanner {
    config: ScanConfig,
}

impl Scanner {
    /// Rejects an invalid configuration before any work is done
    pub fn new(config: ScanConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn scan(&self, dataset: &MarketDataset, store: &mut SignalStore, as_of: NaiveDate) -> Result<ScanResult> {
        self.run(dataset, store, as_of, None)
    }

    /// As `scan`, abandoning the run without side effects once `cancel` is set
    pub fn scan_with_cancel(
        &self,
        dataset: &MarketDataset,
        store: &mut SignalStore,
        as_of: NaiveDate,
        cancel: &AtomicBool,
    ) -> Result<ScanResult> {
        self.run(dataset, store, as_of, Some(cancel))
    }

    fn run(
        &self,
        dataset: &MarketDataset,
        store: &mut SignalStore,
        as_of: NaiveDate,
        cancel: Option<&AtomicBool>,
    ) -> Result<ScanResult> {
        info!("Scanning {} tickers as of {}", dataset.len() + dataset.issues().len(), as_of);

        let screener = Screener::new(self.config.detector.clone(), self.config.universe.clone());
        let outcome = screener.screen(dataset, as_of, cancel)?;

        let snapshot = PriceSnapshot::from_dataset(dataset, as_of, self.config.lifecycle.avg_volume_window);
        let manager = SignalLifecycleManager::new(self.config.lifecycle.clone(), self.config.plan.clone());

        let mut working = store.clone();
        let reconciliation = manager.reconcile(&mut working, &outcome.candidates, &snapshot, as_of)?;

        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(ScanError::Cancelled { as_of });
        }
        working.save()?;
        *store = working;

        let stats = ScanStats {
            universe: dataset.len() + dataset.issues().len(),
            evaluated: outcome.evaluated,
            candidates: outcome.candidates.len(),
            skipped: outcome.skipped.len(),
            open_signals: store.open_signals().count(),
        };
        info!(
            "Scan {} complete: {} candidates, {} new signals, {} open",
            as_of,
            stats.candidates,
            reconciliation.created.len(),
            stats.open_signals
        );

        Ok(ScanResult {
            as_of,
            candidates: outcome.candidates,
            created: reconciliation.created,
            confirmed: reconciliation.confirmed,
            invalidated: reconciliation.invalidated,
            expired: reconciliation.expired,
            unchanged: reconciliation.unchanged,
            skipped: outcome.skipped,
            rejections: outcome.rejections,
            stats,
        })
    }
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== VCP SCAN {} ===", self.as_of)?;
        writeln!(
            f,
            "Universe: {} | Evaluated: {} | Candidates: {} | Skipped: {}",
            self.stats.universe, self.stats.evaluated, self.stats.candidates, self.stats.skipped
        )?;
        writeln!(
            f,
            "Signals: +{} new, {} confirmed, {} invalidated, {} expired, {} open",
            self.created.len(),
            self.confirmed.len(),
            self.invalidated.len(),
            self.expired.len(),
            self.stats.open_signals
        )?;

        if !self.candidates.is_empty() {
            writeln!(f)?;
            writeln!(
                f,
                "{:<4} {:<8} {:>6} {:>10} {:>10} {:>7} {:>6} {}",
                "#", "TICKER", "SCORE", "PIVOT", "CLOSE", "DIST", "DRYUP", "DEPTHS"
            )?;
            for (i, c) in self.candidates.iter().enumerate() {
                let depths: Vec<String> = c.contraction_depths.iter().map(|d| format!("{:.1}", d)).collect();
                writeln!(
                    f,
                    "{:<4} {:<8} {:>6.1} {:>10.0} {:>10.0} {:>+6.1}% {:>6.2} {}",
                    i + 1,
                    c.ticker,
                    c.score,
                    c.pivot_price,
                    c.close,
                    c.pivot_distance_pct(),
                    c.volume_dry_up_ratio,
                    depths.join(" > ")
                )?;
            }
        }

        if !self.skipped.is_empty() {
            writeln!(f)?;
            writeln!(f, "Skipped:")?;
            for s in &self.skipped {
                writeln!(f, "  {} [{}] {}", s.ticker, s.reason, s.detail)?;
            }
        }
        Ok(())
    }
}
