//! Swing extraction for base analysis
//!
//! A percentage zigzag over highs and lows: a leg is only confirmed once
//! price reverses from its extreme by at least the threshold. The last leg
//! is never confirmed, so a move still in progress at the as-of bar cannot
//! be mistaken for a finished contraction.

use serde::{Deserialize, Serialize};

use crate::types::PriceBar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwingKind {
    Peak,
    Trough,
}

/// A swing extreme, indexed into the bar slice it was extracted from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwingPoint {
    pub index: usize,
    pub price: f64,
    pub kind: SwingKind,
}

#[derive(Debug, Clone, Default)]
pub struct ZigZag {
    /// Alternating confirmed swings, starting with the anchor peak
    pub confirmed: Vec<SwingPoint>,
}

impl ZigZag {
    /// Most recent confirmed peak
    pub fn last_peak(&self) -> Option<SwingPoint> {
        self.confirmed.iter().rev().find(|s| s.kind == SwingKind::Peak).copied()
    }

    /// Confirmed (peak, trough) pairs in order
    pub fn declines(&self) -> Vec<(SwingPoint, SwingPoint)> {
        self.confirmed
            .windows(2)
            .filter(|w| w[0].kind == SwingKind::Peak && w[1].kind == SwingKind::Trough)
            .map(|w| (w[0], w[1]))
            .collect()
    }
}

/// Walk forward from a peak at `anchor`, alternating down and up legs.
///
/// `threshold` is the fractional reversal that confirms a leg's extreme.
pub fn zigzag_from_peak(bars: &[PriceBar], anchor: usize, threshold: f64) -> ZigZag {
    let Some(anchor_bar) = bars.get(anchor) else {
        return ZigZag::default();
    };

    let mut zz = ZigZag {
        confirmed: vec![SwingPoint {
            index: anchor,
            price: anchor_bar.high,
            kind: SwingKind::Peak,
        }],
    };

    // Current leg extreme; starts as a down leg from the anchor
    let mut extreme = SwingPoint {
        index: anchor,
        price: anchor_bar.low,
        kind: SwingKind::Trough,
    };

    for (i, bar) in bars.iter().enumerate().skip(anchor + 1) {
        match extreme.kind {
            SwingKind::Trough => {
                if bar.low < extreme.price {
                    extreme = SwingPoint { index: i, price: bar.low, kind: SwingKind::Trough };
                } else if bar.high >= extreme.price * (1.0 + threshold) {
                    zz.confirmed.push(extreme);
                    extreme = SwingPoint { index: i, price: bar.high, kind: SwingKind::Peak };
                }
            }
            SwingKind::Peak => {
                if bar.high > extreme.price {
                    extreme = SwingPoint { index: i, price: bar.high, kind: SwingKind::Peak };
                } else if bar.low <= extreme.price * (1.0 - threshold) {
                    zz.confirmed.push(extreme);
                    extreme = SwingPoint { index: i, price: bar.low, kind: SwingKind::Trough };
                }
            }
        }
    }

    zz
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn bars_from_closes(closes: &[f64]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| {
                let open = if i == 0 { close } else { closes[i - 1] };
                PriceBar {
                    ticker: "ZZ".to_string(),
                    date: start + Duration::days(i as i64),
                    open,
                    high: open.max(close),
                    low: open.min(close),
                    close,
                    volume: 1_000,
                }
            })
            .collect()
    }

    #[test]
    fn test_confirms_alternating_swings() {
        // 100 -> 80 -> 95 -> 88 -> 93 (last leg still running)
        let closes = [100.0, 90.0, 80.0, 88.0, 95.0, 91.0, 88.0, 90.0, 93.0];
        let bars = bars_from_closes(&closes);
        let zz = zigzag_from_peak(&bars, 0, 0.03);

        let kinds: Vec<SwingKind> = zz.confirmed.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![SwingKind::Peak, SwingKind::Trough, SwingKind::Peak, SwingKind::Trough]
        );
        assert_eq!(zz.confirmed[1].price, 80.0);
        assert_eq!(zz.confirmed[2].price, 95.0);
        // The rally to 93 is still running
        assert_eq!(zz.confirmed[3].price, 88.0);

        assert_eq!(zz.declines().len(), 2);
        assert_eq!(zz.last_peak().unwrap().price, 95.0);
    }

    #[test]
    fn test_small_wiggles_are_ignored() {
        let closes = [100.0, 99.0, 99.5, 98.5, 99.0, 98.0];
        let bars = bars_from_closes(&closes);
        let zz = zigzag_from_peak(&bars, 0, 0.03);
        assert_eq!(zz.confirmed.len(), 1);
        assert!(zz.declines().is_empty());
    }

    #[test]
    fn test_partial_decline_is_not_confirmed() {
        // Peak at 95 is confirmed by the drop, but the drop itself has no trough yet
        let closes = [100.0, 85.0, 95.0, 90.0, 86.0];
        let bars = bars_from_closes(&closes);
        let zz = zigzag_from_peak(&bars, 0, 0.03);
        assert_eq!(zz.declines().len(), 1);
        assert_eq!(zz.last_peak().unwrap().price, 95.0);
        assert_eq!(zz.confirmed.last().unwrap().kind, SwingKind::Peak);
    }

    #[test]
    fn test_out_of_range_anchor() {
        let bars = bars_from_closes(&[10.0, 11.0]);
        let zz = zigzag_from_peak(&bars, 5, 0.03);
        assert!(zz.confirmed.is_empty());
    }
}
