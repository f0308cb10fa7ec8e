use counsel_models::{
    AgentVerdict, Agreement, AgreementLevel, ConsensusResult, DebateLevel, Recommendation,
    VoteTally,
};

use crate::error::AgentError;

/// Majority vote over analyst verdicts.
///
/// Pure: the same verdicts always produce a byte-identical result. Ordering
/// of the rationale and participant list follows the configured agent
/// priority, never arrival order.
#[derive(Debug, Clone, Default)]
pub struct ConsensusAggregator {
    priority: Vec<String>,
}

impl ConsensusAggregator {
    pub fn new(priority: Vec<String>) -> Self {
        Self { priority }
    }

    /// Votes needed for BUY or SELL among `valid` verdicts.
    pub fn threshold(valid: usize) -> usize {
        valid / 2 + 1
    }

    pub fn aggregate(&self, verdicts: &[AgentVerdict]) -> Result<ConsensusResult, AgentError> {
        let mut valid: Vec<&AgentVerdict> = verdicts.iter().filter(|v| v.valid).collect();
        if valid.is_empty() {
            return Err(AgentError::InsufficientData(format!(
                "no valid verdicts among {} dispatched",
                verdicts.len()
            )));
        }
        valid.sort_by(|a, b| {
            self.rank(&a.agent_id)
                .cmp(&self.rank(&b.agent_id))
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });

        let mut tally = VoteTally::new();
        for v in &valid {
            tally.record(v.recommendation);
        }

        let threshold = Self::threshold(valid.len());
        let final_recommendation = if tally.count(Recommendation::Buy) >= threshold {
            Recommendation::Buy
        } else if tally.count(Recommendation::Sell) >= threshold {
            Recommendation::Sell
        } else {
            Recommendation::Hold
        };

        let supporting: Vec<String> = valid
            .iter()
            .filter(|v| v.recommendation == final_recommendation)
            .map(|v| format!("[{}] {}", v.agent_id, v.rationale.trim()))
            .collect();

        // HOLD by default with nobody voting HOLD: show the split instead.
        let contributing_rationale = if supporting.is_empty() {
            valid
                .iter()
                .map(|v| format!("[{}] ({}) {}", v.agent_id, v.recommendation, v.rationale.trim()))
                .collect::<Vec<_>>()
                .join("\n\n")
        } else {
            supporting.join("\n\n")
        };

        let agreement = agreement(&valid, verdicts, &tally, final_recommendation, threshold);

        Ok(ConsensusResult {
            final_recommendation,
            vote_tally: tally,
            contributing_rationale,
            participating_agents: valid.iter().map(|v| v.agent_id.clone()).collect(),
            dispatched: verdicts.len(),
            degraded: valid.len() < verdicts.len(),
            agreement,
        })
    }

    fn rank(&self, agent_id: &str) -> usize {
        self.priority
            .iter()
            .position(|p| p == agent_id)
            .unwrap_or(usize::MAX)
    }
}

/// `valid` must already be in priority order.
fn agreement(
    valid: &[&AgentVerdict],
    dispatched: &[AgentVerdict],
    tally: &VoteTally,
    final_recommendation: Recommendation,
    threshold: usize,
) -> Agreement {
    let top = Recommendation::ALL
        .iter()
        .map(|r| tally.count(*r))
        .max()
        .unwrap_or(0);
    let level = if top == valid.len() {
        AgreementLevel::Unanimous
    } else if top >= threshold {
        AgreementLevel::Majority
    } else {
        AgreementLevel::Split
    };

    let stances = valid.iter().map(|v| v.recommendation.stance());
    let spread = match (stances.clone().max(), stances.min()) {
        (Some(high), Some(low)) => high - low,
        _ => 0,
    };
    let debate_level = DebateLevel::from_spread(spread);

    Agreement {
        level,
        debate_level,
        dissenting_agents: valid
            .iter()
            .filter(|v| v.recommendation != final_recommendation)
            .map(|v| v.agent_id.clone())
            .collect(),
        missing_agents: dispatched
            .iter()
            .filter(|v| !v.valid)
            .map(|v| v.agent_id.clone())
            .collect(),
        debate_warranted: level == AgreementLevel::Split || debate_level == DebateLevel::Large,
    }
}
