//! Persistent signal store
//!
//! One CSV file, one row per signal. Saves write a sibling temp file and
//! rename it over the original, so a crash mid-save leaves the previous
//! version intact.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::model::Signal;
use crate::error::{Result, ScanError};

pub const SIGNALS_FILE: &str = "signals.csv";

#[derive(Debug, Clone, Default)]
pub struct SignalStore {
    path: Option<PathBuf>,
    /// Ordered by (detected_date, ticker)
    signals: Vec<Signal>,
}

/// At most one open signal per ticker
pub fn check_consistency(signals: &[Signal]) -> Result<()> {
    let mut open: HashMap<&str, usize> = HashMap::new();
    for signal in signals.iter().filter(|s| s.is_open()) {
        *open.entry(signal.ticker.as_str()).or_default() += 1;
    }
    let mut violations: Vec<(&str, usize)> = open.into_iter().filter(|(_, n)| *n > 1).collect();
    violations.sort();
    match violations.first() {
        Some(&(ticker, count)) => Err(ScanError::StoreConsistency {
            ticker: ticker.to_string(),
            open: count,
        }),
        None => Ok(()),
    }
}

fn sort_signals(signals: &mut [Signal]) {
    signals.sort_by(|a, b| {
        a.detected_date
            .cmp(&b.detected_date)
            .then_with(|| a.ticker.cmp(&b.ticker))
    });
}

impl SignalStore {
    /// Store that is never written to disk
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn from_signals(mut signals: Vec<Signal>) -> Result<Self> {
        check_consistency(&signals)?;
        sort_signals(&mut signals);
        Ok(Self { path: None, signals })
    }

    /// Open the store at `path`; a missing file is an empty store
    pub fn open(path: &Path) -> Result<Self> {
        let mut signals = Vec::new();
        if path.exists() {
            let mut reader = csv::Reader::from_path(path)?;
            for record in reader.deserialize() {
                let signal: Signal = record?;
                signals.push(signal);
            }
            debug!("Read {} signals from {:?}", signals.len(), path);
        }
        check_consistency(&signals)?;
        sort_signals(&mut signals);
        Ok(Self {
            path: Some(path.to_path_buf()),
            signals,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the store atomically. No-op for in-memory stores.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            for signal in &self.signals {
                writer.serialize(signal)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        info!("Saved {} signals to {:?}", self.signals.len(), path);
        Ok(())
    }

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn open_signals(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter().filter(|s| s.is_open())
    }

    pub fn open_signal(&self, ticker: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.ticker == ticker && s.is_open())
    }

    /// Every signal ever recorded for a ticker, oldest first
    pub fn ticker_history<'a>(&'a self, ticker: &'a str) -> impl Iterator<Item = &'a Signal> + 'a {
        self.signals.iter().filter(move |s| s.ticker == ticker)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn raw_signals_mut(&mut self) -> &mut Vec<Signal> {
        &mut self.signals
    }

    /// Install a fully staged set of signals
    pub(crate) fn commit(&mut self, mut signals: Vec<Signal>) -> Result<()> {
        check_consistency(&signals)?;
        sort_signals(&mut signals);
        self.signals = signals;
        Ok(())
    }
}
