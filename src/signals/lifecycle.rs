//! Signal lifecycle reconciliation
//!
//! Each scan day the manager walks every open signal against the as-of
//! quote, then opens signals for new candidates:
//! 1. ACTIVE: invalidate (base low / pivot failure), else confirm
//!    (close above pivot on volume), else expire after the tracking window
//! 2. CONFIRMED: invalidate on base low, stop loss or trailing stop
//! 3. CREATE: candidates without an open signal and outside the cooldown
//!
//! All changes are staged on a copy and committed together.

use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{debug, info};

use super::model::{CloseReason, Signal, SignalState};
use super::snapshot::{PriceSnapshot, Quote};
use super::store::{check_consistency, SignalStore};
use crate::config::{LifecycleConfig, PlanConfig};
use crate::error::Result;
use crate::pattern::VcpCandidate;

/// Signals touched by one reconciliation, grouped by outcome
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub created: Vec<Signal>,
    pub confirmed: Vec<Signal>,
    pub invalidated: Vec<Signal>,
    pub expired: Vec<Signal>,
    pub unchanged: Vec<Signal>,
}

impl Reconciliation {
    pub fn transitions(&self) -> usize {
        self.created.len() + self.confirmed.len() + self.invalidated.len() + self.expired.len()
    }
}

enum Step {
    Confirm,
    Close(SignalState, CloseReason),
    Keep,
}

pub struct SignalLifecycleManager {
    config: LifecycleConfig,
    plan: PlanConfig,
}

impl SignalLifecycleManager {
    pub fn new(config: LifecycleConfig, plan: PlanConfig) -> Self {
        Self { config, plan }
    }

    /// Advance open signals to `as_of` and open signals for new candidates.
    ///
    /// Signals already evaluated on or after `as_of` are left alone, so
    /// running the same day twice changes nothing.
    pub fn reconcile(
        &self,
        store: &mut SignalStore,
        candidates: &[VcpCandidate],
        snapshot: &PriceSnapshot,
        as_of: NaiveDate,
    ) -> Result<Reconciliation> {
        check_consistency(store.signals())?;

        let mut staged: Vec<Signal> = store.signals().to_vec();
        let mut result = Reconciliation::default();

        for signal in staged.iter_mut() {
            if !signal.is_open() || signal.last_evaluated_date >= as_of {
                continue;
            }

            let quote = snapshot.quote(&signal.ticker);
            let elapsed = snapshot.sessions_between(signal.detected_date, as_of);
            let step = match signal.state {
                SignalState::Active => self.step_active(signal, quote, elapsed),
                SignalState::Confirmed => self.step_confirmed(signal, quote),
                _ => Step::Keep,
            };
            let close = quote.map(|q| q.close);

            match step {
                Step::Confirm => {
                    let close = close.unwrap_or(signal.last_close);
                    signal.confirm(as_of, close);
                    info!(
                        "{} CONFIRMED: close {:.0} over pivot {:.0} (entry {:.0}, stop {:.0})",
                        signal.ticker, close, signal.pivot_price, signal.entry_price, signal.stop_loss
                    );
                    result.confirmed.push(signal.clone());
                }
                Step::Close(state, reason) => {
                    debug_assert!(signal.state.can_transition_to(state));
                    signal.close(state, reason, as_of, close);
                    info!("{} {}: {}", signal.ticker, state, reason);
                    match state {
                        SignalState::Expired => result.expired.push(signal.clone()),
                        _ => result.invalidated.push(signal.clone()),
                    }
                }
                Step::Keep => {
                    signal.touch(as_of, close);
                    result.unchanged.push(signal.clone());
                }
            }
        }

        // Tickers blocked from a new signal: open, closed today, or detected within the cooldown
        let cooldown = self.config.max_tracking_days as usize;
        let blocked: HashSet<&str> = staged
            .iter()
            .filter(|s| {
                s.is_open()
                    || s.closed_date.is_some_and(|d| d >= as_of)
                    || snapshot.sessions_between(s.detected_date, as_of) < cooldown
            })
            .map(|s| s.ticker.as_str())
            .collect();

        let mut created: Vec<Signal> = Vec::new();
        for candidate in candidates {
            if blocked.contains(candidate.ticker.as_str()) || created.iter().any(|s| s.ticker == candidate.ticker) {
                debug!("{}: already tracked, no new signal", candidate.ticker);
                continue;
            }
            let signal = Signal::from_candidate(candidate, &self.plan, as_of);
            info!(
                "{} ACTIVE: score {:.1}, pivot {:.0}, {} contractions",
                signal.ticker, signal.score, signal.pivot_price, signal.contraction_count
            );
            created.push(signal);
        }
        result.created = created.clone();
        staged.extend(created);

        store.commit(staged)?;

        info!(
            "Reconciled {}: {} created, {} confirmed, {} invalidated, {} expired, {} unchanged",
            as_of,
            result.created.len(),
            result.confirmed.len(),
            result.invalidated.len(),
            result.expired.len(),
            result.unchanged.len()
        );
        Ok(result)
    }

    fn step_active(&self, signal: &Signal, quote: Option<&Quote>, elapsed: usize) -> Step {
        let cfg = &self.config;
        if let Some(q) = quote {
            if q.close < signal.base_low {
                return Step::Close(SignalState::Invalidated, CloseReason::BelowBaseLow);
            }
            if q.close < signal.pivot_price * (1.0 - cfg.invalidation_tolerance) {
                return Step::Close(SignalState::Invalidated, CloseReason::PivotFailure);
            }
            let volume_ok = q.avg_volume > 0.0 && q.volume as f64 >= cfg.confirm_volume_multiple * q.avg_volume;
            if q.close > signal.pivot_price && volume_ok {
                return Step::Confirm;
            }
            if q.close > signal.pivot_price {
                debug!(
                    "{}: above pivot on light volume ({} vs avg {:.0})",
                    signal.ticker, q.volume, q.avg_volume
                );
            }
        }
        if elapsed >= cfg.max_tracking_days as usize {
            return Step::Close(SignalState::Expired, CloseReason::Expired);
        }
        Step::Keep
    }

    fn step_confirmed(&self, signal: &Signal, quote: Option<&Quote>) -> Step {
        let Some(q) = quote else {
            return Step::Keep;
        };
        if q.close < signal.base_low {
            return Step::Close(SignalState::Invalidated, CloseReason::BelowBaseLow);
        }
        if q.close <= signal.stop_loss {
            return Step::Close(SignalState::Invalidated, CloseReason::StopLoss);
        }
        if let Some(trail) = self.config.trailing_stop {
            let peak = signal.peak_close.unwrap_or(signal.last_close).max(q.close);
            if q.close < peak * (1.0 - trail) {
                return Step::Close(SignalState::Invalidated, CloseReason::TrailingStop);
            }
        }
        Step::Keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::model::tests::candidate;
    use crate::synthetic::business_days;

    fn calendar() -> Vec<NaiveDate> {
        business_days(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(), 80)
    }

    fn manager() -> SignalLifecycleManager {
        SignalLifecycleManager::new(LifecycleConfig::default(), PlanConfig::default())
    }

    fn quote(date: NaiveDate, close: f64, volume: u64) -> Quote {
        Quote {
            date,
            close,
            high: close,
            low: close,
            volume,
            avg_volume: 100_000.0,
        }
    }

    fn snapshot(days: &[NaiveDate], idx: usize, quotes: &[(&str, f64, u64)]) -> PriceSnapshot {
        let mut snapshot = PriceSnapshot::new(days[idx], days[..=idx].to_vec());
        for &(ticker, close, volume) in quotes {
            snapshot.insert(ticker, quote(days[idx], close, volume));
        }
        snapshot
    }

    /// Store with one active 005930 signal detected on days[0]
    fn seeded(days: &[NaiveDate]) -> SignalStore {
        let mut store = SignalStore::in_memory();
        let c = candidate("005930", days[0]);
        let snap = snapshot(days, 0, &[("005930", c.close, 100_000)]);
        let result = manager().reconcile(&mut store, &[c], &snap, days[0]).unwrap();
        assert_eq!(result.created.len(), 1);
        store
    }

    #[test]
    fn test_creates_one_signal_per_ticker() {
        let days = calendar();
        let mut store = SignalStore::in_memory();
        let candidates = vec![candidate("005930", days[0]), candidate("005930", days[0]), candidate("000660", days[0])];
        let snap = snapshot(&days, 0, &[]);
        let result = manager().reconcile(&mut store, &candidates, &snap, days[0]).unwrap();

        assert_eq!(result.created.len(), 2);
        assert_eq!(store.open_signals().count(), 2);
    }

    #[test]
    fn test_confirms_on_volume_breakout() {
        let days = calendar();
        let mut store = seeded(&days);
        let pivot = store.signals()[0].pivot_price;

        // Above pivot on light volume: still active
        let snap = snapshot(&days, 1, &[("005930", pivot * 1.02, 120_000)]);
        let result = manager().reconcile(&mut store, &[], &snap, days[1]).unwrap();
        assert_eq!(result.unchanged.len(), 1);
        assert_eq!(store.signals()[0].state, SignalState::Active);

        let snap = snapshot(&days, 2, &[("005930", pivot * 1.02, 180_000)]);
        let result = manager().reconcile(&mut store, &[], &snap, days[2]).unwrap();
        assert_eq!(result.confirmed.len(), 1);
        let signal = &store.signals()[0];
        assert_eq!(signal.state, SignalState::Confirmed);
        assert_eq!(signal.confirmed_date, Some(days[2]));
    }

    #[test]
    fn test_invalidates_below_base_low_and_blocks_recreation() {
        let days = calendar();
        let mut store = seeded(&days);
        let base_low = store.signals()[0].base_low;

        let snap = snapshot(&days, 1, &[("005930", base_low * 0.98, 300_000)]);
        let fresh = candidate("005930", days[1]);
        let result = manager().reconcile(&mut store, &[fresh], &snap, days[1]).unwrap();

        assert_eq!(result.invalidated.len(), 1);
        assert!(result.created.is_empty());
        assert_eq!(store.len(), 1);
        let signal = &store.signals()[0];
        assert_eq!(signal.state, SignalState::Invalidated);
        assert_eq!(signal.close_reason, Some(CloseReason::BelowBaseLow));
        assert_eq!(signal.closed_date, Some(days[1]));
    }

    #[test]
    fn test_pivot_failure() {
        let days = calendar();
        let mut store = seeded(&days);
        let pivot = store.signals()[0].pivot_price;

        // Above the base low but more than 8% under the pivot
        let snap = snapshot(&days, 1, &[("005930", pivot * 0.90, 100_000)]);
        manager().reconcile(&mut store, &[], &snap, days[1]).unwrap();
        assert_eq!(store.signals()[0].close_reason, Some(CloseReason::PivotFailure));
    }

    #[test]
    fn test_expires_after_tracking_window() {
        let days = calendar();
        let mut store = seeded(&days);
        let close = store.signals()[0].detected_close;

        let snap = snapshot(&days, 59, &[("005930", close, 100_000)]);
        manager().reconcile(&mut store, &[], &snap, days[59]).unwrap();
        assert_eq!(store.signals()[0].state, SignalState::Active);

        let snap = snapshot(&days, 60, &[("005930", close, 100_000)]);
        let result = manager().reconcile(&mut store, &[], &snap, days[60]).unwrap();
        assert_eq!(result.expired.len(), 1);
        assert_eq!(store.signals()[0].state, SignalState::Expired);

        // Past the cooldown the ticker can be tracked again
        let snap = snapshot(&days, 61, &[("005930", close, 100_000)]);
        let result = manager()
            .reconcile(&mut store, &[candidate("005930", days[61])], &snap, days[61])
            .unwrap();
        assert_eq!(result.created.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_missing_quote_only_expires() {
        let days = calendar();
        let mut store = seeded(&days);

        let snap = snapshot(&days, 5, &[]);
        let result = manager().reconcile(&mut store, &[], &snap, days[5]).unwrap();
        assert_eq!(result.unchanged.len(), 1);
        assert_eq!(store.signals()[0].last_evaluated_date, days[5]);

        let snap = snapshot(&days, 60, &[]);
        let result = manager().reconcile(&mut store, &[], &snap, days[60]).unwrap();
        assert_eq!(result.expired.len(), 1);
    }

    #[test]
    fn test_trailing_stop_on_confirmed() {
        let days = calendar();
        let mut store = seeded(&days);
        let pivot = store.signals()[0].pivot_price;

        let snap = snapshot(&days, 1, &[("005930", pivot * 1.02, 200_000)]);
        manager().reconcile(&mut store, &[], &snap, days[1]).unwrap();
        let snap = snapshot(&days, 2, &[("005930", pivot * 1.20, 150_000)]);
        manager().reconcile(&mut store, &[], &snap, days[2]).unwrap();
        assert_eq!(store.signals()[0].peak_close, Some(pivot * 1.20));

        // 10% off the peak closes the position
        let snap = snapshot(&days, 3, &[("005930", pivot * 1.20 * 0.88, 150_000)]);
        let result = manager().reconcile(&mut store, &[], &snap, days[3]).unwrap();
        assert_eq!(result.invalidated.len(), 1);
        let signal = &store.signals()[0];
        assert_eq!(signal.close_reason, Some(CloseReason::TrailingStop));
        assert!(signal.return_pct().unwrap() > 0.0);
    }

    #[test]
    fn test_stop_loss_on_confirmed() {
        let days = calendar();
        let mut store = seeded(&days);
        let pivot = store.signals()[0].pivot_price;
        let stop = store.signals()[0].stop_loss;
        assert!(stop > store.signals()[0].base_low);

        let snap = snapshot(&days, 1, &[("005930", pivot * 1.02, 200_000)]);
        manager().reconcile(&mut store, &[], &snap, days[1]).unwrap();
        assert_eq!(store.signals()[0].state, SignalState::Confirmed);

        // A close just above the stop holds
        let snap = snapshot(&days, 2, &[("005930", stop + 100.0, 90_000)]);
        let result = manager().reconcile(&mut store, &[], &snap, days[2]).unwrap();
        assert_eq!(result.unchanged.len(), 1);

        // Touching the stop exits before the trailing stop is reached
        let snap = snapshot(&days, 3, &[("005930", stop, 90_000)]);
        let result = manager().reconcile(&mut store, &[], &snap, days[3]).unwrap();
        assert_eq!(result.invalidated.len(), 1);
        let signal = &store.signals()[0];
        assert_eq!(signal.state, SignalState::Invalidated);
        assert_eq!(signal.close_reason, Some(CloseReason::StopLoss));
        assert_eq!(signal.closed_date, Some(days[3]));
        assert!(signal.return_pct().unwrap() < 0.0);
    }

    #[test]
    fn test_same_day_is_idempotent() {
        let days = calendar();
        let mut store = seeded(&days);
        let pivot = store.signals()[0].pivot_price;

        let snap = snapshot(&days, 1, &[("005930", pivot * 1.02, 200_000)]);
        let candidates = vec![candidate("000660", days[1])];
        manager().reconcile(&mut store, &candidates, &snap, days[1]).unwrap();
        let first = store.signals().to_vec();

        let result = manager().reconcile(&mut store, &candidates, &snap, days[1]).unwrap();
        assert_eq!(result.transitions(), 0);
        assert_eq!(store.signals(), first.as_slice());
    }

    #[test]
    fn test_inconsistent_store_is_rejected_untouched() {
        let days = calendar();
        let store_signals = vec![
            Signal::from_candidate(&candidate("005930", days[0]), &PlanConfig::default(), days[0]),
            Signal::from_candidate(&candidate("005930", days[1]), &PlanConfig::default(), days[1]),
        ];
        // Bypass the constructor check to simulate a corrupted file
        let mut store = SignalStore::in_memory();
        store.raw_signals_mut().extend(store_signals);

        let snap = snapshot(&days, 2, &[]);
        assert!(manager().reconcile(&mut store, &[], &snap, days[2]).is_err());
        assert!(store.signals().iter().all(|s| s.state == SignalState::Active));
        assert!(store.signals().iter().all(|s| s.last_evaluated_date < days[2]));
    }
}
