// Library crate - VCP screening, signal tracking and reporting

pub mod config;
pub mod dataset;
pub mod error;
pub mod indicators;
pub mod pattern;
pub mod report;
pub mod scan;
pub mod screener;
pub mod signals;
pub mod synthetic;
pub mod types;

// Re-export commonly used types
pub use config::ScanConfig;
pub use dataset::MarketDataset;
pub use error::{ConfigError, DataError, ScanError};
pub use pattern::{PatternDetector, Rejection, VcpCandidate};
pub use scan::{ScanResult, Scanner};
pub use signals::{Signal, SignalState, SignalStore};
pub use types::*;
