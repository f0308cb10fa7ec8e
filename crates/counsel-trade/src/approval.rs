use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use counsel_models::{
    normalize_ticker, ApprovalDecision, ApprovalPrompt, ProposalState, RejectionReason,
    TradeAction, TradeProposal,
};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{LedgerError, TradeError};
use crate::ledger::Ledger;

/// Settled proposals kept in memory by default.
pub const DEFAULT_SETTLED_CAPACITY: usize = 64;

/// Gates every ledger mutation behind an explicit human decision.
///
/// One instance is one user session: at most one proposal may be
/// `AwaitingApproval` at a time. The proposals mutex is held across
/// re-validation, `Ledger::apply` and the state transition, so concurrent
/// `resolve` calls for the same proposal serialize and only the first one
/// reaches the ledger.
///
/// Terminal proposals stay queryable until more than `settled_capacity` of
/// them accumulate; the sweep then drops the longest-settled ones.
pub struct TradeApprovalStateMachine {
    ledger: Arc<dyn Ledger>,
    approval_timeout: Duration,
    settled_capacity: usize,
    proposals: Mutex<HashMap<Uuid, TradeProposal>>,
}

impl TradeApprovalStateMachine {
    pub fn new(ledger: Arc<dyn Ledger>, approval_timeout: Duration) -> Self {
        Self {
            ledger,
            approval_timeout,
            settled_capacity: DEFAULT_SETTLED_CAPACITY,
            proposals: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_settled_capacity(mut self, capacity: usize) -> Self {
        self.settled_capacity = capacity;
        self
    }

    pub fn approval_timeout(&self) -> Duration {
        self.approval_timeout
    }

    fn proposals(&self) -> MutexGuard<'_, HashMap<Uuid, TradeProposal>> {
        self.proposals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deadline(&self, requested_at: DateTime<Utc>) -> DateTime<Utc> {
        let timeout = chrono::Duration::from_std(self.approval_timeout)
            .unwrap_or(chrono::Duration::MAX);
        requested_at
            .checked_add_signed(timeout)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Create a proposal in `Proposed`.
    ///
    /// Fails fast on non-positive quantity or price, a notional too large to
    /// represent, an empty ticker, a SELL larger than current holdings, or
    /// while another proposal is awaiting approval. Cash is checked when the
    /// proposal is approved.
    pub fn propose(
        &self,
        ticker: &str,
        action: TradeAction,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<TradeProposal, TradeError> {
        let ticker = normalize_ticker(ticker);
        if ticker.is_empty() {
            return Err(TradeError::Validation("ticker must not be empty".to_string()));
        }
        if quantity <= Decimal::ZERO {
            return Err(TradeError::Validation(format!(
                "quantity must be positive, got {quantity}"
            )));
        }
        if price <= Decimal::ZERO {
            return Err(TradeError::Validation(format!(
                "price must be positive, got {price}"
            )));
        }
        if quantity.checked_mul(price).is_none() {
            return Err(TradeError::Validation(format!(
                "notional of {quantity} @ {price} is out of range"
            )));
        }

        let now = Utc::now();
        let mut proposals = self.proposals();
        self.sweep(&mut proposals, now);

        if let Some(pending) = proposals
            .values()
            .find(|p| p.state == ProposalState::AwaitingApproval)
        {
            return Err(TradeError::ApprovalPending(pending.proposal_id));
        }

        if action == TradeAction::Sell {
            let held = self.ledger.current_holdings(&ticker)?;
            if held < quantity {
                return Err(TradeError::Validation(format!(
                    "cannot sell {quantity} {ticker}: only {held} held"
                )));
            }
        }

        let proposal = TradeProposal {
            proposal_id: Uuid::new_v4(),
            ticker,
            action,
            quantity,
            price,
            state: ProposalState::Proposed,
            proposed_at: now,
            requested_at: None,
            resolved_at: None,
            rejection: None,
        };
        info!(
            proposal_id = %proposal.proposal_id,
            ticker = %proposal.ticker,
            action = %proposal.action,
            quantity = %proposal.quantity,
            price = %proposal.price,
            "Trade proposed"
        );
        proposals.insert(proposal.proposal_id, proposal.clone());
        Ok(proposal)
    }

    /// Suspend point: move to `AwaitingApproval` and hand back the prompt the
    /// human must answer.
    pub fn request_approval(&self, id: Uuid) -> Result<ApprovalPrompt, TradeError> {
        let now = Utc::now();
        let mut proposals = self.proposals();
        self.sweep(&mut proposals, now);

        if let Some(other) = proposals
            .values()
            .find(|p| p.state == ProposalState::AwaitingApproval && p.proposal_id != id)
        {
            return Err(TradeError::ApprovalPending(other.proposal_id));
        }

        let proposal = proposals.get_mut(&id).ok_or(TradeError::NotFound(id))?;
        if proposal.state != ProposalState::Proposed {
            return Err(TradeError::InvalidTransition {
                id,
                state: proposal.state,
                operation: "request approval for",
            });
        }
        let prompt = proposal.prompt().ok_or_else(|| {
            TradeError::Validation(format!("notional of proposal {id} is out of range"))
        })?;
        proposal.state = ProposalState::AwaitingApproval;
        proposal.requested_at = Some(now);
        info!(proposal_id = %id, "Awaiting approval");
        Ok(prompt)
    }

    /// Resume with the human's decision.
    ///
    /// A proposal that already reached a terminal state returns its stored
    /// result unchanged; the ledger is never touched twice.
    pub fn resolve(&self, decision: &ApprovalDecision) -> Result<TradeProposal, TradeError> {
        let id = decision.proposal_id;
        let mut proposals = self.proposals();
        let proposal = proposals.get_mut(&id).ok_or(TradeError::NotFound(id))?;

        if proposal.state.is_terminal() {
            return Ok(proposal.clone());
        }
        if proposal.state != ProposalState::AwaitingApproval {
            return Err(TradeError::InvalidTransition {
                id,
                state: proposal.state,
                operation: "resolve",
            });
        }

        let requested_at = proposal.requested_at.unwrap_or(proposal.proposed_at);
        if decision.timestamp > self.deadline(requested_at) {
            warn!(proposal_id = %id, "Decision arrived after the approval deadline");
            finish(proposal, ProposalState::Expired, None, decision.timestamp);
            return Ok(proposal.clone());
        }

        if !decision.approved {
            info!(proposal_id = %id, "Trade declined");
            finish(
                proposal,
                ProposalState::Rejected,
                Some(RejectionReason::UserDeclined),
                decision.timestamp,
            );
            return Ok(proposal.clone());
        }

        proposal.state = ProposalState::Approved;
        let resolved_at = Utc::now();

        if let Err(rejection) = self.revalidate(proposal) {
            warn!(proposal_id = %id, reason = ?rejection, "Approved trade failed re-validation");
            finish(proposal, ProposalState::Rejected, Some(rejection), resolved_at);
            return Ok(proposal.clone());
        }

        match self.ledger.apply(&proposal.order()) {
            Ok(receipt) => {
                info!(
                    proposal_id = %id,
                    cash_after = %receipt.cash_after,
                    holdings_after = %receipt.holdings_after,
                    "Trade executed"
                );
                finish(proposal, ProposalState::Executed, None, receipt.executed_at);
            }
            Err(LedgerError::DuplicateOrder(_)) => {
                warn!(proposal_id = %id, "Ledger already holds this order");
                finish(proposal, ProposalState::Executed, None, resolved_at);
            }
            Err(
                e @ (LedgerError::InsufficientCash { .. }
                | LedgerError::InsufficientHoldings { .. }),
            ) => {
                warn!(proposal_id = %id, error = %e, "Ledger refused the trade");
                finish(
                    proposal,
                    ProposalState::Rejected,
                    Some(RejectionReason::PreconditionFailed(e.to_string())),
                    resolved_at,
                );
            }
            Err(e) => {
                warn!(proposal_id = %id, error = %e, "Ledger write failed");
                finish(
                    proposal,
                    ProposalState::Rejected,
                    Some(RejectionReason::LedgerFailure(e.to_string())),
                    resolved_at,
                );
            }
        }
        Ok(proposal.clone())
    }

    fn revalidate(&self, proposal: &TradeProposal) -> Result<(), RejectionReason> {
        let ledger_failure = |e: LedgerError| RejectionReason::LedgerFailure(e.to_string());
        match proposal.action {
            TradeAction::Buy => {
                let cash = self.ledger.current_cash().map_err(ledger_failure)?;
                let notional = proposal.notional().ok_or_else(|| {
                    RejectionReason::PreconditionFailed("notional out of range".to_string())
                })?;
                if cash < notional {
                    return Err(RejectionReason::PreconditionFailed(format!(
                        "cash {cash} does not cover {notional}"
                    )));
                }
            }
            TradeAction::Sell => {
                let held = self
                    .ledger
                    .current_holdings(&proposal.ticker)
                    .map_err(ledger_failure)?;
                if held < proposal.quantity {
                    return Err(RejectionReason::PreconditionFailed(format!(
                        "holdings {held} {} below {}",
                        proposal.ticker, proposal.quantity
                    )));
                }
            }
        }
        Ok(())
    }

    /// Withdraw a proposal before it is decided.
    pub fn cancel(&self, id: Uuid) -> Result<TradeProposal, TradeError> {
        let mut proposals = self.proposals();
        let proposal = proposals.get_mut(&id).ok_or(TradeError::NotFound(id))?;
        match proposal.state {
            ProposalState::Proposed | ProposalState::AwaitingApproval => {
                info!(proposal_id = %id, "Trade cancelled");
                finish(proposal, ProposalState::Cancelled, None, Utc::now());
                Ok(proposal.clone())
            }
            state => Err(TradeError::InvalidTransition {
                id,
                state,
                operation: "cancel",
            }),
        }
    }

    /// Expire a proposal whose approval window closed without an answer.
    pub fn expire(&self, id: Uuid) -> Result<TradeProposal, TradeError> {
        let mut proposals = self.proposals();
        let proposal = proposals.get_mut(&id).ok_or(TradeError::NotFound(id))?;
        if proposal.state != ProposalState::AwaitingApproval {
            return Err(TradeError::InvalidTransition {
                id,
                state: proposal.state,
                operation: "expire",
            });
        }
        warn!(proposal_id = %id, "Approval timed out");
        finish(proposal, ProposalState::Expired, None, Utc::now());
        Ok(proposal.clone())
    }

    /// Expire every awaiting proposal whose deadline is before `now`.
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut proposals = self.proposals();
        self.sweep(&mut proposals, now)
    }

    fn sweep(&self, proposals: &mut HashMap<Uuid, TradeProposal>, now: DateTime<Utc>) -> Vec<Uuid> {
        let mut expired = Vec::new();
        for proposal in proposals.values_mut() {
            if proposal.state != ProposalState::AwaitingApproval {
                continue;
            }
            let requested_at = proposal.requested_at.unwrap_or(proposal.proposed_at);
            if now > self.deadline(requested_at) {
                warn!(proposal_id = %proposal.proposal_id, "Approval timed out");
                finish(proposal, ProposalState::Expired, None, now);
                expired.push(proposal.proposal_id);
            }
        }
        expired.sort();
        self.prune(proposals);
        expired
    }

    fn prune(&self, proposals: &mut HashMap<Uuid, TradeProposal>) {
        let mut settled: Vec<(DateTime<Utc>, Uuid)> = proposals
            .values()
            .filter(|p| p.state.is_terminal())
            .map(|p| (p.resolved_at.unwrap_or(p.proposed_at), p.proposal_id))
            .collect();
        if settled.len() <= self.settled_capacity {
            return;
        }
        settled.sort();
        let excess = settled.len() - self.settled_capacity;
        for (_, id) in settled.into_iter().take(excess) {
            proposals.remove(&id);
        }
        debug!(dropped = excess, "Pruned settled proposals");
    }

    pub fn get(&self, id: Uuid) -> Option<TradeProposal> {
        self.proposals().get(&id).cloned()
    }

    /// Proposals not yet in a terminal state, oldest first.
    pub fn pending(&self) -> Vec<TradeProposal> {
        let mut pending: Vec<TradeProposal> = self
            .proposals()
            .values()
            .filter(|p| !p.state.is_terminal())
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.proposed_at);
        pending
    }
}

fn finish(
    proposal: &mut TradeProposal,
    state: ProposalState,
    rejection: Option<RejectionReason>,
    at: DateTime<Utc>,
) {
    proposal.state = state;
    proposal.rejection = rejection;
    proposal.resolved_at = Some(at);
}
