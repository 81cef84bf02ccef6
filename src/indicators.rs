//! Shared numeric utilities over daily bars

use crate::types::PriceBar;

/// Arithmetic mean; `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Simple moving average of closes over the last `period` bars
pub fn sma_close(bars: &[PriceBar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let window = &bars[bars.len() - period..];
    Some(window.iter().map(|b| b.close).sum::<f64>() / period as f64)
}

/// Average volume across a window of bars
pub fn average_volume(bars: &[PriceBar]) -> f64 {
    if bars.is_empty() {
        return 0.0;
    }
    bars.iter().map(|b| b.volume as f64).sum::<f64>() / bars.len() as f64
}

/// Average volume of the `window` bars strictly before `idx`.
/// Uses however many bars are available when history is shorter.
pub fn trailing_average_volume(bars: &[PriceBar], idx: usize, window: usize) -> f64 {
    let end = idx.min(bars.len());
    let start = end.saturating_sub(window);
    average_volume(&bars[start..end])
}

/// Average traded value (close * volume) over the last `window` bars
pub fn average_dollar_volume(bars: &[PriceBar], window: usize) -> f64 {
    if bars.is_empty() || window == 0 {
        return 0.0;
    }
    let start = bars.len().saturating_sub(window);
    let slice = &bars[start..];
    slice.iter().map(|b| b.dollar_volume()).sum::<f64>() / slice.len() as f64
}

/// Fractional change from `from` to `to`
pub fn pct_change(from: f64, to: f64) -> f64 {
    if from == 0.0 {
        return 0.0;
    }
    (to - from) / from
}

/// Highest high in a window; index is the first occurrence
pub fn highest_high(bars: &[PriceBar]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, bar) in bars.iter().enumerate() {
        match best {
            Some((_, high)) if bar.high <= high => {}
            _ => best = Some((i, bar.high)),
        }
    }
    best
}

/// KRX price tick for a given price level
pub fn tick_size(price: f64) -> f64 {
    match price {
        p if p < 2_000.0 => 1.0,
        p if p < 5_000.0 => 5.0,
        p if p < 20_000.0 => 10.0,
        p if p < 50_000.0 => 50.0,
        p if p < 200_000.0 => 100.0,
        p if p < 500_000.0 => 500.0,
        _ => 1_000.0,
    }
}

/// Round up to the next valid tick (entries and targets)
pub fn round_up_to_tick(price: f64) -> f64 {
    let tick = tick_size(price);
    (price / tick).ceil() * tick
}

/// Round down to the previous valid tick (stops)
pub fn round_down_to_tick(price: f64) -> f64 {
    let tick = tick_size(price);
    (price / tick).floor() * tick
}
