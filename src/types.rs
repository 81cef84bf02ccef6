use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One daily OHLCV bar for a single ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl PriceBar {
    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }

    /// Traded value of the session (close * volume)
    pub fn dollar_volume(&self) -> f64 {
        self.close * self.volume as f64
    }

    /// A bar with no volume is a halted or non-trading session
    pub fn is_halted(&self) -> bool {
        self.volume == 0
    }
}

/// Daily net buying by investor class, joined to PriceBar by (ticker, date)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionalFlow {
    pub ticker: String,
    pub date: NaiveDate,
    pub foreign_net_buy: i64,
    pub institutional_net_buy: i64,
}

/// Rolling flow sums ending at the as-of date. Missing days count as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub foreign_5d: i64,
    pub inst_5d: i64,
    pub foreign_20d: i64,
    pub inst_20d: i64,
}

impl FlowSummary {
    /// Both foreign and institutional investors were net sellers over 5 sessions
    pub fn is_distribution(&self) -> bool {
        self.foreign_5d < 0 && self.inst_5d < 0
    }

    pub fn is_accumulation(&self) -> bool {
        self.foreign_5d > 0 && self.inst_5d > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Market {
    Kospi,
    Kosdaq,
    Other,
}

impl Market {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "KOSPI" => Market::Kospi,
            "KOSDAQ" => Market::Kosdaq,
            _ => Market::Other,
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Market::Kospi => write!(f, "KOSPI"),
            Market::Kosdaq => write!(f, "KOSDAQ"),
            Market::Other => write!(f, "OTHER"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ListingStatus {
    #[default]
    Listed,
    Suspended,
    Delisted,
}

impl ListingStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "suspended" | "halted" => ListingStatus::Suspended,
            "delisted" => ListingStatus::Delisted,
            _ => ListingStatus::Listed,
        }
    }
}

/// Static ticker metadata supplied by the listing collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerInfo {
    pub ticker: String,
    pub name: String,
    pub market: Market,
    /// Market capitalisation in the quote currency, if known
    pub market_cap: Option<f64>,
    pub status: ListingStatus,
}

impl TickerInfo {
    pub fn new(ticker: &str, name: &str, market: Market) -> Self {
        Self {
            ticker: ticker.to_string(),
            name: name.to_string(),
            market,
            market_cap: None,
            status: ListingStatus::Listed,
        }
    }
}

/// Zero-pad numeric exchange codes to six digits ("5930" -> "005930").
/// Alphanumeric tickers pass through trimmed.
pub fn normalize_ticker(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.is_empty() && trimmed.len() < 6 && trimmed.chars().all(|c| c.is_ascii_digit()) {
        format!("{:0>6}", trimmed)
    } else {
        trimmed.to_string()
    }
}
