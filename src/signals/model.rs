//! Tracked signal records
//!
//! A `Signal` is a flat record so the store can round-trip it through CSV.
//! State moves only forward:
//! - Active -> Confirmed | Invalidated | Expired
//! - Confirmed -> Invalidated

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PlanConfig;
use crate::indicators::{pct_change, round_down_to_tick, round_up_to_tick};
use crate::pattern::VcpCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalState {
    /// Pattern detected, waiting for a breakout
    Active,
    /// Broke out above the pivot on volume; tracked as an open position
    Confirmed,
    Invalidated,
    Expired,
}

impl SignalState {
    pub fn is_open(&self) -> bool {
        matches!(self, SignalState::Active | SignalState::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    pub fn can_transition_to(&self, next: SignalState) -> bool {
        matches!(
            (self, next),
            (SignalState::Active, SignalState::Confirmed)
                | (SignalState::Active, SignalState::Invalidated)
                | (SignalState::Active, SignalState::Expired)
                | (SignalState::Confirmed, SignalState::Invalidated)
        )
    }
}

impl std::fmt::Display for SignalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalState::Active => write!(f, "ACTIVE"),
            SignalState::Confirmed => write!(f, "CONFIRMED"),
            SignalState::Invalidated => write!(f, "INVALIDATED"),
            SignalState::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// Why a signal left the open states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Close under the lowest trough of the base
    BelowBaseLow,
    /// Close too far under the pivot before any breakout
    PivotFailure,
    StopLoss,
    TrailingStop,
    Expired,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::BelowBaseLow => write!(f, "below base low"),
            CloseReason::PivotFailure => write!(f, "failed below pivot"),
            CloseReason::StopLoss => write!(f, "stop loss"),
            CloseReason::TrailingStop => write!(f, "trailing stop"),
            CloseReason::Expired => write!(f, "expired"),
        }
    }
}

/// A detected pattern and everything that happened to it since
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Derived from ticker and detection date, so re-detection is idempotent
    pub id: Uuid,
    pub ticker: String,
    pub state: SignalState,
    pub detected_date: NaiveDate,
    pub last_evaluated_date: NaiveDate,
    pub confirmed_date: Option<NaiveDate>,
    pub closed_date: Option<NaiveDate>,
    pub close_reason: Option<CloseReason>,

    // Pattern snapshot at detection
    pub pivot_price: f64,
    pub base_low: f64,
    pub score: f64,
    pub contraction_count: usize,
    /// Final contraction depth in percent
    pub final_depth: f64,
    pub dry_up_ratio: f64,

    // Trade plan, tick-rounded
    pub entry_price: f64,
    pub stop_loss: f64,
    pub target_1: f64,
    pub target_2: f64,

    /// Close on the detection date
    pub detected_close: f64,
    /// Close on the breakout session
    pub confirmed_close: Option<f64>,
    /// Most recent close seen (exit close once closed)
    pub last_close: f64,
    /// Highest close since confirmation
    pub peak_close: Option<f64>,

    pub foreign_5d: Option<i64>,
    pub inst_5d: Option<i64>,
}

pub fn signal_id(ticker: &str, detected: NaiveDate) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{}:{}", ticker, detected).as_bytes())
}

impl Signal {
    /// New active signal from a candidate detected on `as_of`
    pub fn from_candidate(candidate: &VcpCandidate, plan: &PlanConfig, as_of: NaiveDate) -> Self {
        let entry = round_up_to_tick(candidate.pivot_price);
        Self {
            id: signal_id(&candidate.ticker, as_of),
            ticker: candidate.ticker.clone(),
            state: SignalState::Active,
            detected_date: as_of,
            last_evaluated_date: as_of,
            confirmed_date: None,
            closed_date: None,
            close_reason: None,
            pivot_price: candidate.pivot_price,
            base_low: candidate.base_low,
            score: candidate.score,
            contraction_count: candidate.contraction_count,
            final_depth: candidate.final_depth(),
            dry_up_ratio: candidate.volume_dry_up_ratio,
            entry_price: entry,
            stop_loss: round_down_to_tick(candidate.base_low.max(entry * (1.0 - plan.stop_loss_pct))),
            target_1: round_down_to_tick(entry * (1.0 + plan.take_profit_1_pct)),
            target_2: round_down_to_tick(entry * (1.0 + plan.take_profit_2_pct)),
            detected_close: candidate.close,
            confirmed_close: None,
            last_close: candidate.close,
            peak_close: None,
            foreign_5d: candidate.flow.map(|f| f.foreign_5d),
            inst_5d: candidate.flow.map(|f| f.inst_5d),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Return from entry to the latest (or exit) close, in percent.
    /// Only meaningful once the signal was confirmed.
    pub fn return_pct(&self) -> Option<f64> {
        self.confirmed_date?;
        if self.entry_price <= 0.0 {
            return None;
        }
        Some(pct_change(self.entry_price, self.last_close) * 100.0)
    }

    pub(crate) fn touch(&mut self, date: NaiveDate, close: Option<f64>) {
        self.last_evaluated_date = date;
        if let Some(close) = close {
            self.last_close = close;
            if self.state == SignalState::Confirmed {
                self.peak_close = Some(self.peak_close.map_or(close, |p| p.max(close)));
            }
        }
    }

    pub(crate) fn confirm(&mut self, date: NaiveDate, close: f64) {
        self.state = SignalState::Confirmed;
        self.confirmed_date = Some(date);
        self.confirmed_close = Some(close);
        self.peak_close = Some(close);
        self.last_close = close;
        self.last_evaluated_date = date;
    }

    pub(crate) fn close(&mut self, state: SignalState, reason: CloseReason, date: NaiveDate, close: Option<f64>) {
        self.touch(date, close);
        self.state = state;
        self.close_reason = Some(reason);
        self.closed_date = Some(date);
    }
}
