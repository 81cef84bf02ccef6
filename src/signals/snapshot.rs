//! Market state on the evaluation date, as seen by the lifecycle manager

use chrono::NaiveDate;
use std::collections::HashMap;

use crate::dataset::MarketDataset;
use crate::indicators::trailing_average_volume;

/// The as-of session for one ticker
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub date: NaiveDate,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: u64,
    /// Average volume of the sessions before `date`
    pub avg_volume: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PriceSnapshot {
    pub as_of: NaiveDate,
    quotes: HashMap<String, Quote>,
    /// Market sessions up to and including as_of
    calendar: Vec<NaiveDate>,
}

impl PriceSnapshot {
    pub fn new(as_of: NaiveDate, calendar: Vec<NaiveDate>) -> Self {
        Self {
            as_of,
            quotes: HashMap::new(),
            calendar,
        }
    }

    /// Quotes for every ticker that traded on `as_of`
    pub fn from_dataset(dataset: &MarketDataset, as_of: NaiveDate, avg_volume_window: usize) -> Self {
        let mut snapshot = Self::new(as_of, dataset.calendar(as_of));
        for (ticker, history) in dataset.histories() {
            let bars = history.bars_as_of(as_of);
            let Some(last) = bars.last() else {
                continue;
            };
            if last.date != as_of {
                continue;
            }
            snapshot.insert(
                ticker,
                Quote {
                    date: last.date,
                    close: last.close,
                    high: last.high,
                    low: last.low,
                    volume: last.volume,
                    avg_volume: trailing_average_volume(bars, bars.len() - 1, avg_volume_window),
                },
            );
        }
        snapshot
    }

    pub fn insert(&mut self, ticker: &str, quote: Quote) {
        self.quotes.insert(ticker.to_string(), quote);
    }

    pub fn quote(&self, ticker: &str) -> Option<&Quote> {
        self.quotes.get(ticker)
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Sessions strictly after `from` up to and including `to`
    pub fn sessions_between(&self, from: NaiveDate, to: NaiveDate) -> usize {
        if to <= from {
            return 0;
        }
        let start = self.calendar.partition_point(|d| *d <= from);
        let end = self.calendar.partition_point(|d| *d <= to);
        end.saturating_sub(start)
    }
}
