use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use counsel_models::store_schema::{cash_kinds, LEDGER_TABLE_DDL};
use counsel_models::{
    normalize_ticker, PortfolioSnapshot, Position, TradeAction, TradeOrder, TradeRecord,
};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::LedgerError;

/// What an applied order left behind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerReceipt {
    pub proposal_id: Uuid,
    pub cash_after: Decimal,
    pub holdings_after: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// Cash and holdings the approval state machine validates against and
/// mutates. Mockable for testing.
pub trait Ledger: Send + Sync {
    fn current_holdings(&self, ticker: &str) -> Result<Decimal, LedgerError>;

    fn current_cash(&self) -> Result<Decimal, LedgerError>;

    /// Apply the order atomically. Must refuse an order whose proposal id
    /// was already applied.
    fn apply(&self, order: &TradeOrder) -> Result<LedgerReceipt, LedgerError>;
}

/// SQLite-backed ledger: a cash log plus a trade log keyed by proposal id.
///
/// Balances are always derived from the logs, never stored.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) the ledger with WAL enabled.
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(LEDGER_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory ledger. Useful for testing.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(LEDGER_TABLE_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn
            .lock()
            .map_err(|e| LedgerError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    /// Add cash. Returns the new balance.
    pub fn deposit(&self, amount: Decimal) -> Result<Decimal, LedgerError> {
        ensure_positive(amount)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let balance = checked(cash_balance(&tx)?.checked_add(amount), "cash balance")?;
        record_cash(&tx, cash_kinds::DEPOSIT, amount)?;
        tx.commit()?;
        info!(amount = %amount, balance = %balance, "Cash deposited");
        Ok(balance)
    }

    /// Take cash out. Refuses to overdraw. Returns the new balance.
    pub fn withdraw(&self, amount: Decimal) -> Result<Decimal, LedgerError> {
        ensure_positive(amount)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let available = cash_balance(&tx)?;
        if available < amount {
            return Err(LedgerError::InsufficientCash {
                needed: amount,
                available,
            });
        }
        record_cash(&tx, cash_kinds::WITHDRAW, -amount)?;
        tx.commit()?;
        let balance = available - amount;
        info!(amount = %amount, balance = %balance, "Cash withdrawn");
        Ok(balance)
    }

    /// Every executed trade, oldest first.
    pub fn trades(&self) -> Result<Vec<TradeRecord>, LedgerError> {
        let conn = self.lock()?;
        load_trades(&conn)
    }

    /// Average-cost view of open positions, weighted against positions at
    /// cost plus cash.
    pub fn portfolio(&self) -> Result<PortfolioSnapshot, LedgerError> {
        let (trades, cash) = {
            let conn = self.lock()?;
            (load_trades(&conn)?, cash_balance(&conn)?)
        };

        // ticker -> (quantity, total cost)
        let mut book: BTreeMap<String, (Decimal, Decimal)> = BTreeMap::new();
        for t in &trades {
            let entry = book.entry(t.ticker.clone()).or_insert((Decimal::ZERO, Decimal::ZERO));
            match t.action {
                TradeAction::Buy => {
                    let cost = checked(t.quantity.checked_mul(t.price), "position cost")?;
                    entry.0 = checked(entry.0.checked_add(t.quantity), "position size")?;
                    entry.1 = checked(entry.1.checked_add(cost), "position cost")?;
                }
                TradeAction::Sell => {
                    if entry.0 > Decimal::ZERO {
                        let average = entry.1 / entry.0;
                        let released = checked(average.checked_mul(t.quantity), "position cost")?;
                        entry.1 -= released;
                    }
                    entry.0 -= t.quantity;
                }
            }
        }
        book.retain(|_, (qty, _)| *qty > Decimal::ZERO);

        let invested = book
            .values()
            .try_fold(Decimal::ZERO, |sum, (_, cost)| {
                checked(sum.checked_add(*cost), "invested total")
            })?;
        let total = checked(invested.checked_add(cash), "portfolio total")?;
        let weight = |amount: Decimal| {
            if total > Decimal::ZERO {
                (amount / total * Decimal::ONE_HUNDRED).round_dp(2)
            } else {
                Decimal::ZERO
            }
        };

        let positions = book
            .into_iter()
            .map(|(ticker, (quantity, cost))| Position {
                average_price: (cost / quantity).round_dp(4),
                total_cost: cost.round_dp(2),
                weight_pct: weight(cost),
                ticker,
                quantity,
            })
            .collect();

        Ok(PortfolioSnapshot {
            cash,
            cash_weight_pct: weight(cash),
            positions,
        })
    }
}

impl Ledger for SqliteLedger {
    fn current_holdings(&self, ticker: &str) -> Result<Decimal, LedgerError> {
        let conn = self.lock()?;
        holdings(&conn, &normalize_ticker(ticker))
    }

    fn current_cash(&self) -> Result<Decimal, LedgerError> {
        let conn = self.lock()?;
        cash_balance(&conn)
    }

    fn apply(&self, order: &TradeOrder) -> Result<LedgerReceipt, LedgerError> {
        if order.quantity <= Decimal::ZERO || order.price <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "quantity {} and price {} must be positive",
                order.quantity, order.price
            )));
        }
        let ticker = normalize_ticker(&order.ticker);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let already: Option<i64> = tx
            .query_row(
                "SELECT id FROM trades_log WHERE proposal_id = ?1",
                rusqlite::params![order.proposal_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if already.is_some() {
            return Err(LedgerError::DuplicateOrder(order.proposal_id));
        }

        let cash = cash_balance(&tx)?;
        let held = holdings(&tx, &ticker)?;
        let notional = checked(order.notional(), "trade notional")?;
        let (cash_delta, holdings_after) = match order.action {
            TradeAction::Buy => {
                if cash < notional {
                    return Err(LedgerError::InsufficientCash {
                        needed: notional,
                        available: cash,
                    });
                }
                (-notional, checked(held.checked_add(order.quantity), "holdings")?)
            }
            TradeAction::Sell => {
                if held < order.quantity {
                    return Err(LedgerError::InsufficientHoldings {
                        ticker,
                        needed: order.quantity,
                        available: held,
                    });
                }
                checked(cash.checked_add(notional), "cash balance")?;
                (notional, held - order.quantity)
            }
        };

        let executed_at = Utc::now();
        tx.execute(
            "INSERT INTO trades_log \
             (proposal_id, ticker, action, quantity, price, cash_delta, executed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                order.proposal_id.to_string(),
                ticker,
                order.action.as_str(),
                order.quantity.to_string(),
                order.price.to_string(),
                cash_delta.to_string(),
                executed_at.to_rfc3339(),
            ],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => LedgerError::DuplicateOrder(order.proposal_id),
            _ => LedgerError::Sqlite(e),
        })?;
        record_cash(&tx, cash_kinds::TRADE, cash_delta)?;
        tx.commit()?;

        info!(
            proposal_id = %order.proposal_id,
            ticker = %ticker,
            action = %order.action,
            quantity = %order.quantity,
            price = %order.price,
            "Trade applied"
        );

        Ok(LedgerReceipt {
            proposal_id: order.proposal_id,
            cash_after: cash + cash_delta,
            holdings_after,
            executed_at,
        })
    }
}

fn checked(value: Option<Decimal>, what: &str) -> Result<Decimal, LedgerError> {
    value.ok_or_else(|| LedgerError::InvalidAmount(format!("{what} out of range")))
}

fn ensure_positive(amount: Decimal) -> Result<(), LedgerError> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

fn parse_decimal(raw: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(raw).map_err(|e| LedgerError::Corrupt(format!("{raw:?}: {e}")))
}

fn record_cash(conn: &Connection, kind: &str, amount: Decimal) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO cash_log (kind, amount, recorded_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![kind, amount.to_string(), Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn cash_balance(conn: &Connection) -> Result<Decimal, LedgerError> {
    let mut stmt = conn.prepare_cached("SELECT amount FROM cash_log")?;
    let amounts = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    amounts
        .iter()
        .try_fold(Decimal::ZERO, |sum, raw| {
            checked(sum.checked_add(parse_decimal(raw)?), "cash balance")
        })
}

fn holdings(conn: &Connection, ticker: &str) -> Result<Decimal, LedgerError> {
    let mut stmt =
        conn.prepare_cached("SELECT action, quantity FROM trades_log WHERE ticker = ?1")?;
    let rows = stmt
        .query_map(rusqlite::params![ticker], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.iter().try_fold(Decimal::ZERO, |sum, (action, qty)| {
        let qty = parse_decimal(qty)?;
        let next = match parse_action(action)? {
            TradeAction::Buy => sum.checked_add(qty),
            TradeAction::Sell => sum.checked_sub(qty),
        };
        checked(next, "holdings")
    })
}

fn parse_action(raw: &str) -> Result<TradeAction, LedgerError> {
    match raw {
        "BUY" => Ok(TradeAction::Buy),
        "SELL" => Ok(TradeAction::Sell),
        other => Err(LedgerError::Corrupt(format!("unknown trade action {other:?}"))),
    }
}

fn load_trades(conn: &Connection) -> Result<Vec<TradeRecord>, LedgerError> {
    let mut stmt = conn.prepare_cached(
        "SELECT proposal_id, ticker, action, quantity, price, cash_delta, executed_at \
         FROM trades_log ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok([
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ])
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter().map(to_record).collect()
}

fn to_record(row: [String; 7]) -> Result<TradeRecord, LedgerError> {
    let [id, ticker, action, quantity, price, cash_delta, executed_at] = row;
    Ok(TradeRecord {
        proposal_id: Uuid::parse_str(&id)
            .map_err(|e| LedgerError::Corrupt(format!("proposal id {id:?}: {e}")))?,
        ticker,
        action: parse_action(&action)?,
        quantity: parse_decimal(&quantity)?,
        price: parse_decimal(&price)?,
        cash_delta: parse_decimal(&cash_delta)?,
        executed_at: DateTime::parse_from_rfc3339(&executed_at)
            .map_err(|e| LedgerError::Corrupt(format!("timestamp {executed_at:?}: {e}")))?
            .with_timezone(&Utc),
    })
}
