//! Outcome statistics over the signal history

use serde::{Deserialize, Serialize};
use std::fmt;

use super::model::{Signal, SignalState};
use crate::indicators::mean;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_signals: usize,
    pub active: usize,
    pub confirmed: usize,
    pub invalidated: usize,
    pub expired: usize,
    /// Resolved signals that broke out, in percent
    pub confirmation_rate: f64,
    /// Signals that broke out, open or closed
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_return_pct: f64,
    pub best_return_pct: f64,
    pub worst_return_pct: f64,
    pub avg_score: f64,
}

impl PerformanceReport {
    pub fn from_signals(signals: &[Signal]) -> Self {
        let mut report = Self {
            total_signals: signals.len(),
            ..Default::default()
        };
        if signals.is_empty() {
            return report;
        }

        for signal in signals {
            match signal.state {
                SignalState::Active => report.active += 1,
                SignalState::Confirmed => report.confirmed += 1,
                SignalState::Invalidated => report.invalidated += 1,
                SignalState::Expired => report.expired += 1,
            }
        }
        let scores: Vec<f64> = signals.iter().map(|s| s.score).collect();
        report.avg_score = mean(&scores).unwrap_or(0.0);

        // Active signals have no outcome yet
        let resolved = signals.iter().filter(|s| s.state != SignalState::Active).count();
        let broke_out = signals.iter().filter(|s| s.confirmed_date.is_some()).count();
        if resolved > 0 {
            report.confirmation_rate = broke_out as f64 / resolved as f64 * 100.0;
        }

        let returns: Vec<f64> = signals.iter().filter_map(|s| s.return_pct()).collect();
        report.trades = returns.len();
        if returns.is_empty() {
            return report;
        }
        report.wins = returns.iter().filter(|r| **r > 0.0).count();
        report.losses = returns.iter().filter(|r| **r < 0.0).count();
        report.win_rate = report.wins as f64 / returns.len() as f64 * 100.0;
        report.avg_return_pct = mean(&returns).unwrap_or(0.0);
        report.best_return_pct = returns.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        report.worst_return_pct = returns.iter().copied().fold(f64::INFINITY, f64::min);
        report
    }
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== SIGNAL PERFORMANCE ===")?;
        writeln!(
            f,
            "Signals: {} ({} active, {} confirmed, {} invalidated, {} expired)",
            self.total_signals, self.active, self.confirmed, self.invalidated, self.expired
        )?;
        writeln!(f, "Confirmation rate: {:.1}%", self.confirmation_rate)?;
        writeln!(f, "Average score: {:.1}", self.avg_score)?;
        if self.trades == 0 {
            return writeln!(f, "No breakouts yet");
        }
        writeln!(
            f,
            "Breakouts: {} | Wins: {} | Losses: {} | Win rate: {:.1}%",
            self.trades, self.wins, self.losses, self.win_rate
        )?;
        writeln!(
            f,
            "Return: avg {:+.2}% | best {:+.2}% | worst {:+.2}%",
            self.avg_return_pct, self.best_return_pct, self.worst_return_pct
        )
    }
}
