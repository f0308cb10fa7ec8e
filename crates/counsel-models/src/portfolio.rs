use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trade::TradeAction;

/// One row of the trade log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub proposal_id: Uuid,
    pub ticker: String,
    pub action: TradeAction,
    pub quantity: Decimal,
    pub price: Decimal,
    /// Signed cash effect: negative for buys, positive for sells.
    pub cash_delta: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// An open position valued at average cost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub ticker: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub total_cost: Decimal,
    /// Share of total account value (positions at cost plus cash), in percent.
    pub weight_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioSnapshot {
    pub cash: Decimal,
    pub cash_weight_pct: Decimal,
    pub positions: Vec<Position>,
}
