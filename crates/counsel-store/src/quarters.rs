use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use counsel_models::{normalize_ticker, QuarterId};

use crate::error::StoreError;
use crate::sqlite::SqliteStore;

/// Which reporting quarters have been ingested, per ticker.
///
/// Each ticker maps to a strictly increasing, duplicate-free sequence of
/// quarters, newest last. Readers never see a partially updated sequence.
#[derive(Debug, Default)]
pub struct TickerQuarterIndex {
    entries: RwLock<HashMap<String, Vec<QuarterId>>>,
}

impl TickerQuarterIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_quarters<I: IntoIterator<Item = QuarterId>>(quarters: I) -> Self {
        let index = Self::new();
        for q in quarters {
            index.record(&q);
        }
        index
    }

    /// Build the index from the store's `ticker_quarters` table.
    pub fn load(store: &SqliteStore) -> Result<Self, StoreError> {
        Ok(Self::from_quarters(store.load_quarters()?))
    }

    /// Insert a quarter. Returns false when it was already present or is not
    /// a valid quarter.
    pub fn record(&self, quarter: &QuarterId) -> bool {
        if !quarter.is_valid() {
            return false;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let seq = entries.entry(quarter.ticker.clone()).or_default();
        match seq.binary_search(quarter) {
            Ok(_) => false,
            Err(pos) => {
                seq.insert(pos, quarter.clone());
                true
            }
        }
    }

    /// Up to `n` most recent quarters for the ticker, newest first.
    /// Unknown tickers yield an empty list.
    pub fn latest(&self, ticker: &str, n: usize) -> Vec<QuarterId> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&normalize_ticker(ticker))
            .map(|seq| seq.iter().rev().take(n).cloned().collect())
            .unwrap_or_default()
    }

    pub fn has(&self, ticker: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&normalize_ticker(ticker))
            .is_some_and(|seq| !seq.is_empty())
    }

    /// Indexed tickers, sorted.
    pub fn tickers(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut tickers: Vec<String> = entries.keys().cloned().collect();
        tickers.sort();
        tickers
    }
}
