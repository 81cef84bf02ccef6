//! Market dataset: per-ticker daily history, ticker metadata and flow overlay
//!
//! Collectors deliver loosely typed CSV tables. Rows are converted into
//! `PriceBar` / `InstitutionalFlow` here, and nothing past this module
//! touches untyped data. A ticker whose rows fail conversion or validation
//! is kept out of the usable set and its `DataError` is recorded instead.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{DataError, ScanError};
use crate::types::{
    normalize_ticker, FlowSummary, InstitutionalFlow, ListingStatus, Market, PriceBar, TickerInfo,
};

pub const PRICES_FILE: &str = "prices.csv";
pub const TICKERS_FILE: &str = "tickers.csv";
pub const FLOWS_FILE: &str = "flows.csv";

/// Everything known about one ticker
#[derive(Debug, Clone, Default)]
pub struct TickerHistory {
    pub info: Option<TickerInfo>,
    /// Ascending by date, no duplicate dates
    pub bars: Vec<PriceBar>,
    pub flows: BTreeMap<NaiveDate, InstitutionalFlow>,
}

impl TickerHistory {
    /// Bars with date <= as_of
    pub fn bars_as_of(&self, as_of: NaiveDate) -> &[PriceBar] {
        let end = self.bars.partition_point(|b| b.date <= as_of);
        &self.bars[..end]
    }

    /// Foreign / institutional net buying over the last 5 and 20 sessions
    /// ending at as_of. Sessions without a flow row count as zero.
    pub fn flow_summary(&self, as_of: NaiveDate) -> FlowSummary {
        let bars = self.bars_as_of(as_of);
        let mut summary = FlowSummary::default();
        for (offset, bar) in bars.iter().rev().take(20).enumerate() {
            let Some(flow) = self.flows.get(&bar.date) else {
                continue;
            };
            if offset < 5 {
                summary.foreign_5d += flow.foreign_net_buy;
                summary.inst_5d += flow.institutional_net_buy;
            }
            summary.foreign_20d += flow.foreign_net_buy;
            summary.inst_20d += flow.institutional_net_buy;
        }
        summary
    }
}

/// Read-only view over the whole universe
#[derive(Debug, Clone, Default)]
pub struct MarketDataset {
    histories: BTreeMap<String, TickerHistory>,
    issues: BTreeMap<String, DataError>,
}

/// Check the ordering and sanity guarantees the detector relies on
pub fn validate_series(bars: &[PriceBar]) -> Result<(), DataError> {
    if bars.is_empty() {
        return Err(DataError::MissingHistory);
    }
    let mut prev: Option<NaiveDate> = None;
    for bar in bars {
        if let Some(prev_date) = prev {
            if bar.date == prev_date {
                return Err(DataError::DuplicateDate { date: bar.date });
            }
            if bar.date < prev_date {
                return Err(DataError::NotAscending { date: bar.date });
            }
        }
        prev = Some(bar.date);

        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(DataError::InvalidBar {
                date: bar.date,
                reason: "non-positive or non-finite price".to_string(),
            });
        }
        if bar.high < bar.low || bar.high < bar.open.max(bar.close) || bar.low > bar.open.min(bar.close) {
            return Err(DataError::InvalidBar {
                date: bar.date,
                reason: format!(
                    "inconsistent range o={:.2} h={:.2} l={:.2} c={:.2}",
                    bar.open, bar.high, bar.low, bar.close
                ),
            });
        }
    }
    Ok(())
}

impl MarketDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-typed bars of any number of tickers
    pub fn from_bars(bars: Vec<PriceBar>) -> Self {
        let mut grouped: BTreeMap<String, Vec<PriceBar>> = BTreeMap::new();
        for bar in bars {
            grouped.entry(bar.ticker.clone()).or_default().push(bar);
        }
        let mut dataset = Self::new();
        for (ticker, bars) in grouped {
            dataset.insert_bars(&ticker, bars);
        }
        dataset
    }

    /// Install a ticker's series. Invalid series are recorded as issues.
    pub fn insert_bars(&mut self, ticker: &str, bars: Vec<PriceBar>) {
        match validate_series(&bars) {
            Ok(()) => {
                self.issues.remove(ticker);
                self.histories.entry(ticker.to_string()).or_default().bars = bars;
            }
            Err(e) => {
                warn!("{}: rejecting price history: {}", ticker, e);
                self.mark_invalid(ticker, e);
            }
        }
    }

    pub fn insert_info(&mut self, info: TickerInfo) {
        if let Some(history) = self.histories.get_mut(&info.ticker) {
            history.info = Some(info);
        } else if !self.issues.contains_key(&info.ticker) {
            let ticker = info.ticker.clone();
            self.histories.insert(
                ticker,
                TickerHistory {
                    info: Some(info),
                    ..Default::default()
                },
            );
        }
    }

    pub fn insert_flow(&mut self, flow: InstitutionalFlow) {
        if let Some(history) = self.histories.get_mut(&flow.ticker) {
            history.flows.insert(flow.date, flow);
        }
    }

    /// Drop a ticker from the usable set and remember why
    pub fn mark_invalid(&mut self, ticker: &str, error: DataError) {
        self.histories.remove(ticker);
        self.issues.insert(ticker.to_string(), error);
    }

    pub fn history(&self, ticker: &str) -> Option<&TickerHistory> {
        self.histories.get(ticker)
    }

    pub fn histories(&self) -> impl Iterator<Item = (&String, &TickerHistory)> {
        self.histories.iter()
    }

    /// Tickers excluded at load time, with the reason
    pub fn issues(&self) -> &BTreeMap<String, DataError> {
        &self.issues
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    /// Most recent bar date across the universe
    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.histories
            .values()
            .filter_map(|h| h.bars.last().map(|b| b.date))
            .max()
    }

    /// Market sessions up to as_of: union of all bar dates, ascending
    pub fn calendar(&self, as_of: NaiveDate) -> Vec<NaiveDate> {
        let dates: BTreeSet<NaiveDate> = self
            .histories
            .values()
            .flat_map(|h| h.bars_as_of(as_of).iter().map(|b| b.date))
            .collect();
        dates.into_iter().collect()
    }

    /// Load `prices.csv` (required) plus `tickers.csv` and `flows.csv` if present
    pub fn load_dir(dir: &Path) -> Result<Self, ScanError> {
        let prices_path = dir.join(PRICES_FILE);
        if !prices_path.exists() {
            return Err(ScanError::Dataset(format!("missing {:?}", prices_path)));
        }

        let mut dataset = Self::new();
        load_prices(&mut dataset, &prices_path)?;

        let tickers_path = dir.join(TICKERS_FILE);
        if tickers_path.exists() {
            load_tickers(&mut dataset, &tickers_path)?;
        }

        let flows_path = dir.join(FLOWS_FILE);
        if flows_path.exists() {
            load_flows(&mut dataset, &flows_path)?;
        }

        info!(
            "Loaded {} tickers from {:?} ({} rejected)",
            dataset.len(),
            dir,
            dataset.issues.len()
        );
        Ok(dataset)
    }

    /// Write the dataset back out in the layout `load_dir` reads
    pub fn save_dir(&self, dir: &Path) -> Result<(), ScanError> {
        std::fs::create_dir_all(dir)?;

        let mut prices = csv::Writer::from_path(dir.join(PRICES_FILE))?;
        let mut tickers = csv::Writer::from_path(dir.join(TICKERS_FILE))?;
        let mut flows = csv::Writer::from_path(dir.join(FLOWS_FILE))?;

        for (ticker, history) in &self.histories {
            for bar in &history.bars {
                prices.serialize(PriceRecord::from(bar))?;
            }
            if let Some(info) = &history.info {
                tickers.serialize(TickerRecord {
                    ticker: ticker.clone(),
                    name: info.name.clone(),
                    market: info.market.to_string(),
                    market_cap: info.market_cap,
                    status: match info.status {
                        ListingStatus::Listed => "listed",
                        ListingStatus::Suspended => "suspended",
                        ListingStatus::Delisted => "delisted",
                    }
                    .to_string(),
                })?;
            }
            for flow in history.flows.values() {
                flows.serialize(flow)?;
            }
        }

        prices.flush()?;
        tickers.flush()?;
        flows.flush()?;
        Ok(())
    }
}

/// Price row as the collectors write it. Every field is text.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPriceRow {
    ticker: Option<String>,
    date: Option<String>,
    open: Option<String>,
    high: Option<String>,
    low: Option<String>,
    close: Option<String>,
    volume: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTickerRow {
    ticker: Option<String>,
    name: Option<String>,
    market: Option<String>,
    market_cap: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawFlowRow {
    ticker: Option<String>,
    date: Option<String>,
    foreign_net_buy: Option<String>,
    institutional_net_buy: Option<String>,
}

#[derive(Debug, Serialize)]
struct PriceRecord {
    ticker: String,
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

impl From<&PriceBar> for PriceRecord {
    fn from(bar: &PriceBar) -> Self {
        Self {
            ticker: bar.ticker.clone(),
            date: bar.date.format("%Y-%m-%d").to_string(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }
}

#[derive(Debug, Serialize)]
struct TickerRecord {
    ticker: String,
    name: String,
    market: String,
    market_cap: Option<f64>,
    status: String,
}

/// Parse "2025-01-03" or "20250103"
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .ok()
}

/// Parse a number, tolerating thousands separators and whitespace
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn required<'a>(field: &'a Option<String>, name: &str, row: usize) -> Result<&'a str, DataError> {
    match field.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(DataError::Malformed {
            row,
            reason: format!("missing {}", name),
        }),
    }
}

fn required_number(field: &Option<String>, name: &str, row: usize) -> Result<f64, DataError> {
    let raw = required(field, name, row)?;
    parse_number(raw).ok_or_else(|| DataError::Malformed {
        row,
        reason: format!("{} is not a number: {:?}", name, raw),
    })
}

fn convert_price_row(ticker: &str, raw: &RawPriceRow, row: usize) -> Result<PriceBar, DataError> {
    let date_raw = required(&raw.date, "date", row)?;
    let date = parse_date(date_raw).ok_or_else(|| DataError::Malformed {
        row,
        reason: format!("unparseable date {:?}", date_raw),
    })?;
    let volume = required_number(&raw.volume, "volume", row)?;
    if volume < 0.0 {
        return Err(DataError::Malformed {
            row,
            reason: format!("negative volume {}", volume),
        });
    }

    Ok(PriceBar {
        ticker: ticker.to_string(),
        date,
        open: required_number(&raw.open, "open", row)?,
        high: required_number(&raw.high, "high", row)?,
        low: required_number(&raw.low, "low", row)?,
        close: required_number(&raw.close, "close", row)?,
        volume: volume.round() as u64,
    })
}

/// Sort by date and collapse exact duplicates. Conflicting duplicates are an error.
fn normalize_series(mut bars: Vec<PriceBar>) -> Result<Vec<PriceBar>, DataError> {
    bars.sort_by_key(|b| b.date);
    let mut out: Vec<PriceBar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last() {
            Some(prev) if prev.date == bar.date => {
                if *prev != bar {
                    return Err(DataError::DuplicateDate { date: bar.date });
                }
            }
            _ => out.push(bar),
        }
    }
    Ok(out)
}

fn open_reader(path: &Path) -> Result<csv::Reader<File>, ScanError> {
    Ok(csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?)
}

fn load_prices(dataset: &mut MarketDataset, path: &Path) -> Result<(), ScanError> {
    let mut reader = open_reader(path)?;
    let mut grouped: BTreeMap<String, Vec<PriceBar>> = BTreeMap::new();
    let mut broken: BTreeMap<String, DataError> = BTreeMap::new();
    let mut unattributed = 0usize;

    for (idx, result) in reader.deserialize::<RawPriceRow>().enumerate() {
        let row_no = idx + 2; // header is row 1
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                debug!("prices row {}: {}", row_no, e);
                unattributed += 1;
                continue;
            }
        };
        let Some(ticker) = raw.ticker.as_deref().map(normalize_ticker).filter(|t| !t.is_empty()) else {
            unattributed += 1;
            continue;
        };
        if broken.contains_key(&ticker) {
            continue;
        }
        match convert_price_row(&ticker, &raw, row_no) {
            Ok(bar) => grouped.entry(ticker).or_default().push(bar),
            Err(e) => {
                grouped.remove(&ticker);
                broken.insert(ticker, e);
            }
        }
    }

    if unattributed > 0 {
        warn!("Skipped {} price rows without a usable ticker", unattributed);
    }

    for (ticker, error) in broken {
        warn!("{}: malformed price data: {}", ticker, error);
        dataset.mark_invalid(&ticker, error);
    }
    for (ticker, bars) in grouped {
        match normalize_series(bars) {
            Ok(bars) => dataset.insert_bars(&ticker, bars),
            Err(e) => {
                warn!("{}: {}", ticker, e);
                dataset.mark_invalid(&ticker, e);
            }
        }
    }
    Ok(())
}

fn load_tickers(dataset: &mut MarketDataset, path: &Path) -> Result<(), ScanError> {
    let mut reader = open_reader(path)?;
    for result in reader.deserialize::<RawTickerRow>() {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                debug!("tickers row: {}", e);
                continue;
            }
        };
        let Some(ticker) = raw.ticker.as_deref().map(normalize_ticker).filter(|t| !t.is_empty()) else {
            continue;
        };
        dataset.insert_info(TickerInfo {
            name: raw.name.unwrap_or_default(),
            market: raw.market.as_deref().map(Market::parse).unwrap_or(Market::Other),
            market_cap: raw.market_cap.as_deref().and_then(parse_number),
            status: raw.status.as_deref().map(ListingStatus::parse).unwrap_or_default(),
            ticker,
        });
    }
    Ok(())
}

fn load_flows(dataset: &mut MarketDataset, path: &Path) -> Result<(), ScanError> {
    let mut reader = open_reader(path)?;
    let mut skipped = 0usize;
    for result in reader.deserialize::<RawFlowRow>() {
        let Ok(raw) = result else {
            skipped += 1;
            continue;
        };
        let ticker = raw.ticker.as_deref().map(normalize_ticker).unwrap_or_default();
        let date = raw.date.as_deref().and_then(parse_date);
        let (Some(date), false) = (date, ticker.is_empty()) else {
            skipped += 1;
            continue;
        };
        // Flow is an overlay: an unparseable amount is treated as no flow
        let amount = |field: &Option<String>| {
            field.as_deref().and_then(parse_number).map(|v| v.round() as i64).unwrap_or(0)
        };
        dataset.insert_flow(InstitutionalFlow {
            foreign_net_buy: amount(&raw.foreign_net_buy),
            institutional_net_buy: amount(&raw.institutional_net_buy),
            ticker,
            date,
        });
    }
    if skipped > 0 {
        debug!("Skipped {} flow rows", skipped);
    }
    Ok(())
}
