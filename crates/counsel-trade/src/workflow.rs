use async_trait::async_trait;
use counsel_models::{ApprovalDecision, ApprovalPrompt, TradeProposal};
use tracing::{info, warn};
use uuid::Uuid;

use crate::approval::TradeApprovalStateMachine;
use crate::error::TradeError;

/// Where approval prompts go and answers come back from.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    /// Show the prompt and wait for the human. `Ok(true)` approves,
    /// `Ok(false)` declines, `Err(TradeError::ChannelClosed)` means the human
    /// went away without answering.
    async fn request(&self, prompt: &ApprovalPrompt) -> Result<bool, TradeError>;
}

/// Drive one proposal from `Proposed` to a terminal state.
///
/// Blocks until the channel answers or the machine's approval timeout
/// elapses. An answer resolves the proposal, a timeout expires it and a
/// closed channel cancels it.
pub async fn seek_approval(
    machine: &TradeApprovalStateMachine,
    proposal_id: Uuid,
    channel: &dyn ApprovalChannel,
) -> Result<TradeProposal, TradeError> {
    let prompt = machine.request_approval(proposal_id)?;
    let timeout = machine.approval_timeout();

    match tokio::time::timeout(timeout, channel.request(&prompt)).await {
        Ok(Ok(approved)) => machine.resolve(&ApprovalDecision::now(proposal_id, approved)),
        Ok(Err(TradeError::ChannelClosed)) => {
            info!(proposal_id = %proposal_id, "Approval channel closed");
            machine.cancel(proposal_id)
        }
        Ok(Err(e)) => {
            warn!(proposal_id = %proposal_id, error = %e, "Approval channel failed");
            machine.cancel(proposal_id)?;
            Err(e)
        }
        Err(_) => {
            warn!(
                proposal_id = %proposal_id,
                timeout_secs = timeout.as_secs(),
                "No answer before the approval deadline"
            );
            machine.expire(proposal_id)
        }
    }
}
