use counsel_models::ProposalState;
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Insufficient cash: need {needed}, have {available}")]
    InsufficientCash { needed: Decimal, available: Decimal },

    #[error("Insufficient holdings of {ticker}: need {needed}, have {available}")]
    InsufficientHoldings {
        ticker: String,
        needed: Decimal,
        available: Decimal,
    },

    #[error("Order for proposal {0} was already applied")]
    DuplicateOrder(Uuid),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum TradeError {
    #[error("Invalid trade: {0}")]
    Validation(String),

    #[error("Unknown proposal {0}")]
    NotFound(Uuid),

    #[error("Proposal {0} is still awaiting approval")]
    ApprovalPending(Uuid),

    #[error("Cannot {operation} proposal {id} in state {state}")]
    InvalidTransition {
        id: Uuid,
        state: ProposalState,
        operation: &'static str,
    },

    #[error("Approval channel closed")]
    ChannelClosed,

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}
