//! Quality score for a detected base
//!
//! Four components, each normalised to 0..1 and combined with the
//! configured weights into a 0-100 score:
//! - contractions: count relative to the saturation count
//! - tightness: how shallow the final contraction is
//! - dry_up: how far volume contracted in the final pullback
//! - trend: close above the long moving average

use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub contractions: f64,
    pub tightness: f64,
    pub dry_up: f64,
    pub trend: f64,
}

impl ScoreBreakdown {
    pub fn compute(
        contraction_count: usize,
        final_depth: f64,
        dry_up_ratio: f64,
        above_trend: bool,
        config: &DetectorConfig,
    ) -> Self {
        let cap = config.max_scored_contractions.max(1);
        Self {
            contractions: contraction_count.min(cap) as f64 / cap as f64,
            tightness: (1.0 - final_depth / config.tight_reference_depth).clamp(0.0, 1.0),
            dry_up: (1.0 - dry_up_ratio).clamp(0.0, 1.0),
            trend: if above_trend { 1.0 } else { 0.0 },
        }
    }

    /// Weighted score in 0..=100, rounded to two decimals
    pub fn score(&self, config: &DetectorConfig) -> f64 {
        let w = &config.weights;
        let total = w.total();
        if total <= 0.0 {
            return 0.0;
        }
        let raw = (w.contractions * self.contractions
            + w.tightness * self.tightness
            + w.dry_up * self.dry_up
            + w.trend * self.trend)
            / total;
        (raw * 100.0 * 100.0).round() / 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_base_scores_100() {
        let config = DetectorConfig::default();
        let breakdown = ScoreBreakdown::compute(4, 0.0, 0.0, true, &config);
        assert_eq!(breakdown.score(&config), 100.0);
    }

    #[test]
    fn test_components_are_clamped() {
        let config = DetectorConfig::default();
        let breakdown = ScoreBreakdown::compute(9, 0.40, 1.3, false, &config);
        assert_eq!(breakdown.contractions, 1.0);
        assert_eq!(breakdown.tightness, 0.0);
        assert_eq!(breakdown.dry_up, 0.0);
        assert_eq!(breakdown.trend, 0.0);
        // Only the count component contributes: 0.30 of 1.0
        assert_eq!(breakdown.score(&config), 30.0);
    }

    #[test]
    fn test_tighter_base_scores_higher() {
        let config = DetectorConfig::default();
        let loose = ScoreBreakdown::compute(3, 0.10, 0.5, true, &config).score(&config);
        let tight = ScoreBreakdown::compute(3, 0.04, 0.5, true, &config).score(&config);
        assert!(tight > loose);
    }

    #[test]
    fn test_weights_are_normalised() {
        let mut config = DetectorConfig::default();
        config.weights.contractions = 3.0;
        config.weights.tightness = 0.0;
        config.weights.dry_up = 0.0;
        config.weights.trend = 1.0;
        let breakdown = ScoreBreakdown::compute(2, 0.05, 0.5, true, &config);
        // (3 * 0.5 + 1 * 1.0) / 4
        assert_eq!(breakdown.score(&config), 62.5);
    }
}
