pub mod approval;
pub mod error;
pub mod ledger;
pub mod workflow;

pub use approval::TradeApprovalStateMachine;
pub use error::{LedgerError, TradeError};
pub use ledger::{Ledger, LedgerReceipt, SqliteLedger};
pub use workflow::{seek_approval, ApprovalChannel};
