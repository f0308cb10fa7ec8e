use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical ticker form used on every lookup path: trimmed and upper-cased.
pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_ascii_uppercase()
}

/// One reporting quarter of one company.
///
/// Ordering is chronological by `(fiscal_year, quarter)`. The ticker only
/// breaks ties so that `Ord` stays consistent with `Eq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuarterId {
    pub ticker: String,
    pub fiscal_year: i32,
    /// 1 to 4.
    pub quarter: u8,
}

impl QuarterId {
    pub fn new(ticker: &str, fiscal_year: i32, quarter: u8) -> Self {
        Self {
            ticker: normalize_ticker(ticker),
            fiscal_year,
            quarter,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.ticker.is_empty() && (1..=4).contains(&self.quarter)
    }

    /// Short period label, e.g. `Q3 2024`.
    pub fn label(&self) -> String {
        format!("Q{} {}", self.quarter, self.fiscal_year)
    }
}

impl Ord for QuarterId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fiscal_year
            .cmp(&other.fiscal_year)
            .then(self.quarter.cmp(&other.quarter))
            .then_with(|| self.ticker.cmp(&other.ticker))
    }
}

impl PartialOrd for QuarterId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for QuarterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} | {}]", self.ticker, self.label())
    }
}
