//! Screening configuration
//!
//! Every threshold is a named option. Sections deserialize with
//! `#[serde(default)]` so a partial JSON file only overrides what it names.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::types::Market;

/// Weights of the four score components. Normalised by their sum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub contractions: f64,
    pub tightness: f64,
    pub dry_up: f64,
    pub trend: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            contractions: 0.30,
            tightness: 0.25,
            dry_up: 0.25,
            trend: 0.20,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> f64 {
        self.contractions + self.tightness + self.dry_up + self.trend
    }
}

/// Pattern detection thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Minimum number of bars before a ticker is evaluated (default: 120)
    pub min_history_bars: usize,
    /// Base must start within this many sessions of as-of (default: 130, ~6 months)
    pub max_base_bars: usize,
    /// Shortest acceptable base in sessions (default: 10)
    pub min_base_bars: usize,
    /// Reversal threshold for swing extraction, fraction of price (default: 0.03)
    pub min_contraction_depth: f64,
    /// Minimum number of contractions (default: 2)
    pub min_contractions: usize,
    /// Contraction count at which the count score saturates (default: 4)
    pub max_scored_contractions: usize,
    /// Deepest acceptable first contraction (default: 0.50)
    pub max_base_depth: f64,
    /// Allowed relative increase from one contraction depth to the next (default: 0.05)
    pub tightening_tolerance: f64,
    /// Final contraction volume / base volume must be at or below this (default: 0.75)
    pub max_dry_up_ratio: f64,
    /// Close must sit no further than this below the pivot (default: 0.05)
    pub pivot_band: f64,
    /// Close must sit no further than this above the pivot (default: 0.03)
    pub max_extension: f64,
    /// Final depth at which the tightness component reaches zero (default: 0.15)
    pub tight_reference_depth: f64,
    /// Long moving average for trend context (default: 100)
    pub trend_ma_bars: usize,
    /// Reject when close is not above the long moving average (default: false)
    pub require_uptrend: bool,
    /// Calendar gap inside the base treated as missing data (default: 14 days)
    pub max_calendar_gap_days: i64,
    pub weights: ScoreWeights,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_history_bars: 120,
            max_base_bars: 130,
            min_base_bars: 10,
            min_contraction_depth: 0.03,
            min_contractions: 2,
            max_scored_contractions: 4,
            max_base_depth: 0.50,
            tightening_tolerance: 0.05,
            max_dry_up_ratio: 0.75,
            pivot_band: 0.05,
            max_extension: 0.03,
            tight_reference_depth: 0.15,
            trend_ma_bars: 100,
            require_uptrend: false,
            max_calendar_gap_days: 14,
            weights: ScoreWeights::default(),
        }
    }
}

/// Cheap universe-level filters applied before pattern detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseFilter {
    /// Minimum average traded value over `liquidity_window` (default: 1e9)
    pub min_avg_dollar_volume: f64,
    /// Sessions used for the liquidity average (default: 20)
    pub liquidity_window: usize,
    pub min_price: f64,
    pub max_price: Option<f64>,
    pub min_market_cap: Option<f64>,
    /// Markets to scan. Empty means all.
    pub markets: Vec<Market>,
    /// Names containing any of these are excluded (preferred shares, SPACs, ...)
    pub exclude_name_keywords: Vec<String>,
    /// Latest bar older than this many calendar days is stale (default: 3)
    pub max_staleness_days: i64,
    /// Skip tickers where foreign and institutional 5d flows are both negative
    pub exclude_distribution: bool,
    /// Maximum ranked candidates kept (default: 50)
    pub max_results: usize,
}

impl Default for UniverseFilter {
    fn default() -> Self {
        Self {
            min_avg_dollar_volume: 1_000_000_000.0, // 1B KRW
            liquidity_window: 20,
            min_price: 1_000.0,
            max_price: None,
            min_market_cap: None,
            markets: Vec::new(),
            exclude_name_keywords: Vec::new(),
            max_staleness_days: 3,
            exclude_distribution: false,
            max_results: 50,
        }
    }
}

/// Signal lifecycle thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Breakout volume must be at least this multiple of average volume (default: 1.5)
    pub confirm_volume_multiple: f64,
    /// Sessions preceding as-of used for average volume (default: 50)
    pub avg_volume_window: usize,
    /// Close this far below pivot invalidates an active signal (default: 0.08)
    pub invalidation_tolerance: f64,
    /// Trading sessions an active signal is tracked before expiring (default: 60).
    /// Also the cooldown before a ticker with a closed signal can get a new one.
    pub max_tracking_days: u32,
    /// Trailing stop for confirmed signals, fraction below highest close (default: 0.10)
    pub trailing_stop: Option<f64>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            confirm_volume_multiple: 1.5,
            avg_volume_window: 50,
            invalidation_tolerance: 0.08,
            max_tracking_days: 60,
            trailing_stop: Some(0.10),
        }
    }
}

/// Trade plan levels recorded with each new signal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    pub stop_loss_pct: f64,
    pub take_profit_1_pct: f64,
    pub take_profit_2_pct: f64,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: 0.07,
            take_profit_1_pct: 0.15,
            take_profit_2_pct: 0.30,
        }
    }
}

/// Full scan configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub detector: DetectorConfig,
    pub universe: UniverseFilter,
    pub lifecycle: LifecycleConfig,
    pub plan: PlanConfig,
}

fn fraction(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ConfigError::invalid(name, format!("{} must be a non-negative number", value)));
    }
    if value >= 1.0 {
        return Err(ConfigError::invalid(name, format!("{} must be below 1.0", value)));
    }
    Ok(())
}

fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::invalid(name, format!("{} must be positive", value)));
    }
    Ok(())
}

impl ScanConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: ScanConfig = serde_json::from_str(&raw).map_err(|e| ConfigError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make detection or tracking meaningless
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detector;
        if d.min_contractions < 2 {
            return Err(ConfigError::invalid(
                "detector.min_contractions",
                format!("{} is below 2; a single pullback is not a VCP", d.min_contractions),
            ));
        }
        if d.max_scored_contractions < d.min_contractions {
            return Err(ConfigError::invalid(
                "detector.max_scored_contractions",
                "must be at least detector.min_contractions",
            ));
        }
        if d.min_history_bars == 0 {
            return Err(ConfigError::invalid("detector.min_history_bars", "must be positive"));
        }
        if d.max_base_bars <= d.min_base_bars {
            return Err(ConfigError::invalid(
                "detector.max_base_bars",
                "must be greater than detector.min_base_bars",
            ));
        }
        positive("detector.min_contraction_depth", d.min_contraction_depth)?;
        fraction("detector.min_contraction_depth", d.min_contraction_depth)?;
        fraction("detector.max_base_depth", d.max_base_depth)?;
        if d.max_base_depth < d.min_contraction_depth {
            return Err(ConfigError::invalid(
                "detector.max_base_depth",
                "must be at least detector.min_contraction_depth",
            ));
        }
        if !d.tightening_tolerance.is_finite() || d.tightening_tolerance < 0.0 {
            return Err(ConfigError::invalid(
                "detector.tightening_tolerance",
                format!("{} must be a non-negative number", d.tightening_tolerance),
            ));
        }
        positive("detector.max_dry_up_ratio", d.max_dry_up_ratio)?;
        fraction("detector.pivot_band", d.pivot_band)?;
        fraction("detector.max_extension", d.max_extension)?;
        positive("detector.tight_reference_depth", d.tight_reference_depth)?;
        if d.trend_ma_bars == 0 {
            return Err(ConfigError::invalid("detector.trend_ma_bars", "must be positive"));
        }
        if d.max_calendar_gap_days < 1 {
            return Err(ConfigError::invalid("detector.max_calendar_gap_days", "must be at least 1"));
        }
        let w = &d.weights;
        for (name, value) in [
            ("detector.weights.contractions", w.contractions),
            ("detector.weights.tightness", w.tightness),
            ("detector.weights.dry_up", w.dry_up),
            ("detector.weights.trend", w.trend),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(name, format!("{} must be non-negative", value)));
            }
        }
        if w.total() <= 0.0 {
            return Err(ConfigError::invalid("detector.weights", "at least one weight must be positive"));
        }

        let u = &self.universe;
        if !u.min_avg_dollar_volume.is_finite() || u.min_avg_dollar_volume < 0.0 {
            return Err(ConfigError::invalid("universe.min_avg_dollar_volume", "must be non-negative"));
        }
        if u.liquidity_window == 0 {
            return Err(ConfigError::invalid("universe.liquidity_window", "must be positive"));
        }
        if !u.min_price.is_finite() || u.min_price < 0.0 {
            return Err(ConfigError::invalid("universe.min_price", "must be non-negative"));
        }
        if let Some(max_price) = u.max_price {
            if !max_price.is_finite() || max_price < u.min_price {
                return Err(ConfigError::invalid("universe.max_price", "must be at least universe.min_price"));
            }
        }
        if u.max_staleness_days < 0 {
            return Err(ConfigError::invalid("universe.max_staleness_days", "must be non-negative"));
        }
        if u.max_results == 0 {
            return Err(ConfigError::invalid("universe.max_results", "must be positive"));
        }

        let l = &self.lifecycle;
        positive("lifecycle.confirm_volume_multiple", l.confirm_volume_multiple)?;
        if l.avg_volume_window == 0 {
            return Err(ConfigError::invalid("lifecycle.avg_volume_window", "must be positive"));
        }
        fraction("lifecycle.invalidation_tolerance", l.invalidation_tolerance)?;
        if l.max_tracking_days == 0 {
            return Err(ConfigError::invalid("lifecycle.max_tracking_days", "must be positive"));
        }
        if let Some(trail) = l.trailing_stop {
            positive("lifecycle.trailing_stop", trail)?;
            fraction("lifecycle.trailing_stop", trail)?;
        }

        let p = &self.plan;
        positive("plan.stop_loss_pct", p.stop_loss_pct)?;
        fraction("plan.stop_loss_pct", p.stop_loss_pct)?;
        positive("plan.take_profit_1_pct", p.take_profit_1_pct)?;
        if p.take_profit_2_pct < p.take_profit_1_pct {
            return Err(ConfigError::invalid(
                "plan.take_profit_2_pct",
                "must be at least plan.take_profit_1_pct",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ScanConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_single_contraction() {
        let mut config = ScanConfig::default();
        config.detector.min_contractions = 1;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { name: "detector.min_contractions", .. }
        ));
    }

    #[test]
    fn test_rejects_negative_tolerance() {
        let mut config = ScanConfig::default();
        config.detector.tightening_tolerance = -0.01;
        assert!(config.validate().is_err());

        let mut config = ScanConfig::default();
        config.lifecycle.invalidation_tolerance = -0.5;
        assert!(config.validate().is_err());

        let mut config = ScanConfig::default();
        config.lifecycle.trailing_stop = Some(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "detector": { "min_contractions": 3 }, "universe": { "markets": ["Kosdaq"] } }"#;
        let config: ScanConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.detector.min_contractions, 3);
        assert_eq!(config.detector.min_history_bars, 120);
        assert_eq!(config.universe.markets, vec![Market::Kosdaq]);
        assert_eq!(config.lifecycle.max_tracking_days, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.json");
        std::fs::write(&path, r#"{ "lifecycle": { "trailing_stop": null } }"#).unwrap();

        let config = ScanConfig::load(&path).unwrap();
        assert!(config.lifecycle.trailing_stop.is_none());

        std::fs::write(&path, r#"{ "detector": { "min_contractions": 1 } }"#).unwrap();
        assert!(ScanConfig::load(&path).is_err());
    }
}
