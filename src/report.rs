//! Scan report publishing
//!
//! Each scan writes two files into the report directory:
//! - `latest.json`: the most recent scan, plain JSON for dashboards
//! - `YYYYMMDD.json.zst`: zstd-compressed history, one file per as-of date

use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Result;
use crate::scan::ScanResult;

pub const LATEST_FILE: &str = "latest.json";
const HISTORY_SUFFIX: &str = ".json.zst";

fn history_path(dir: &Path, as_of: NaiveDate) -> PathBuf {
    dir.join(format!("{}{}", as_of.format("%Y%m%d"), HISTORY_SUFFIX))
}

/// Write `latest.json` and the dated history file
pub fn save_report(result: &ScanResult, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(result)?;
    let latest = dir.join(LATEST_FILE);
    let tmp = dir.join(format!("{}.tmp", LATEST_FILE));
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, &latest)?;

    let compressed = zstd::encode_all(&json[..], 3)?;
    let path = history_path(dir, result.as_of);
    fs::write(&path, compressed)?;

    info!("Saved scan report to {:?} ({} candidates)", path, result.candidates.len());
    Ok(())
}

pub fn load_latest(dir: &Path) -> Result<Option<ScanResult>> {
    let path = dir.join(LATEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read(&path)?;
    Ok(Some(serde_json::from_slice(&raw)?))
}

pub fn load_report(dir: &Path, as_of: NaiveDate) -> Result<Option<ScanResult>> {
    let path = history_path(dir, as_of);
    if !path.exists() {
        return Ok(None);
    }
    let compressed = fs::read(&path)?;
    let json = zstd::decode_all(&compressed[..])?;
    Ok(Some(serde_json::from_slice(&json)?))
}

/// Dates with a stored report, ascending, as `YYYYMMDD`
pub fn report_dates(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut dates = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if let Some(date) = name.strip_suffix(HISTORY_SUFFIX) {
            if NaiveDate::parse_from_str(date, "%Y%m%d").is_ok() {
                dates.push(date.to_string());
            }
        }
    }
    dates.sort();
    Ok(dates)
}

/// Does a `YYYYMMDD` date match the filter?
/// - Single date: "20250915"
/// - Prefix: "202509"
/// - Inclusive range: "20250901:20251120"
pub fn matches_date_filter(date: &str, filter: &str) -> bool {
    match filter.split_once(':') {
        Some((start, end)) => date >= start && date <= end,
        None => date.starts_with(filter),
    }
}

/// Load every stored report matching `date_filter`. Unreadable files are
/// logged and skipped.
pub fn load_history(dir: &Path, date_filter: Option<&str>) -> Result<Vec<ScanResult>> {
    let dates: Vec<String> = report_dates(dir)?
        .into_iter()
        .filter(|d| date_filter.map_or(true, |f| matches_date_filter(d, f)))
        .collect();

    info!("Loading {} scan reports...", dates.len());

    let mut reports = Vec::with_capacity(dates.len());
    for date in &dates {
        let Ok(as_of) = NaiveDate::parse_from_str(date, "%Y%m%d") else {
            continue;
        };
        match load_report(dir, as_of) {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => {}
            Err(e) => warn!("Failed to load report for {}: {}", date, e),
        }
    }
    Ok(reports)
}
