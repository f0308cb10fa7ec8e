use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a trade proposal.
///
/// `Proposed` and `AwaitingApproval` are the only resting non-terminal
/// states. `Approved` exists only for the duration of ledger application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalState {
    Proposed,
    AwaitingApproval,
    Approved,
    Executed,
    Rejected,
    Cancelled,
    Expired,
}

impl ProposalState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Executed | Self::Rejected | Self::Cancelled | Self::Expired
        )
    }
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Proposed => "PROPOSED",
            Self::AwaitingApproval => "AWAITING_APPROVAL",
            Self::Approved => "APPROVED",
            Self::Executed => "EXECUTED",
            Self::Rejected => "REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(s)
    }
}

/// Why a proposal ended in `Rejected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectionReason {
    /// The human said no.
    UserDeclined,
    /// Approved, but cash or holdings no longer cover the trade.
    PreconditionFailed(String),
    /// Approved and re-validated, but the ledger refused or failed the write.
    LedgerFailure(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeProposal {
    pub proposal_id: Uuid,
    pub ticker: String,
    pub action: TradeAction,
    pub quantity: Decimal,
    pub price: Decimal,
    pub state: ProposalState,
    pub proposed_at: DateTime<Utc>,
    pub requested_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub rejection: Option<RejectionReason>,
}

impl TradeProposal {
    /// `quantity * price`, or `None` when the product does not fit a `Decimal`.
    pub fn notional(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.price)
    }

    pub fn order(&self) -> TradeOrder {
        TradeOrder {
            proposal_id: self.proposal_id,
            ticker: self.ticker.clone(),
            action: self.action,
            quantity: self.quantity,
            price: self.price,
        }
    }

    /// The prompt shown to the human. `None` when the notional overflows.
    pub fn prompt(&self) -> Option<ApprovalPrompt> {
        Some(ApprovalPrompt {
            proposal_id: self.proposal_id,
            ticker: self.ticker.clone(),
            action: self.action,
            quantity: self.quantity,
            price: self.price,
            notional: self.notional()?,
        })
    }
}

/// The ledger mutation an executed proposal performs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeOrder {
    pub proposal_id: Uuid,
    pub ticker: String,
    pub action: TradeAction,
    pub quantity: Decimal,
    pub price: Decimal,
}

impl TradeOrder {
    pub fn notional(&self) -> Option<Decimal> {
        self.quantity.checked_mul(self.price)
    }
}

/// Emitted at the suspend point so the human sees exactly what they approve.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalPrompt {
    pub proposal_id: Uuid,
    pub ticker: String,
    pub action: TradeAction,
    pub quantity: Decimal,
    pub price: Decimal,
    pub notional: Decimal,
}

impl fmt::Display for ApprovalPrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Approval required: {} {} {} @ {} (total {}) [proposal {}]",
            self.action, self.quantity, self.ticker, self.price, self.notional, self.proposal_id
        )
    }
}

/// The human's answer to an approval prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalDecision {
    pub proposal_id: Uuid,
    pub approved: bool,
    pub timestamp: DateTime<Utc>,
}

impl ApprovalDecision {
    pub fn now(proposal_id: Uuid, approved: bool) -> Self {
        Self {
            proposal_id,
            approved,
            timestamp: Utc::now(),
        }
    }
}
