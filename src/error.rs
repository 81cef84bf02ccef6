//! Error types for the screening core.
//!
//! - `DataError` is scoped to one ticker and never aborts a scan
//! - `ConfigError` is fatal at scan start
//! - `ScanError` is what a scan call can fail with

use chrono::NaiveDate;
use thiserror::Error;

/// Malformed or missing per-ticker history
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DataError {
    #[error("row {row}: {reason}")]
    Malformed { row: usize, reason: String },

    #[error("bars not ascending at {date}")]
    NotAscending { date: NaiveDate },

    #[error("conflicting duplicate bar for {date}")]
    DuplicateDate { date: NaiveDate },

    #[error("invalid bar on {date}: {reason}")]
    InvalidBar { date: NaiveDate, reason: String },

    #[error("no price history")]
    MissingHistory,
}

/// Invalid threshold configuration
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid option {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("failed to read config {path}: {reason}")]
    Unreadable { path: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue { name, reason: reason.into() }
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store consistency violated: ticker {ticker} has {open} open signals")]
    StoreConsistency { ticker: String, open: usize },

    #[error("scan for {as_of} was cancelled before publishing")]
    Cancelled { as_of: NaiveDate },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ScanError>;
