//! Signal tracking across scan days
//!
//! - `model`: the persisted `Signal` record and its states
//! - `snapshot`: as-of quotes and the session calendar
//! - `store`: CSV-backed store with atomic saves
//! - `lifecycle`: daily reconciliation of open signals and new candidates
//! - `performance`: outcome statistics

pub mod lifecycle;
pub mod model;
pub mod performance;
pub mod snapshot;
pub mod store;

pub use lifecycle::{Reconciliation, SignalLifecycleManager};
pub use model::{signal_id, CloseReason, Signal, SignalState};
pub use performance::PerformanceReport;
pub use snapshot::{PriceSnapshot, Quote};
pub use store::{check_consistency, SignalStore, SIGNALS_FILE};
