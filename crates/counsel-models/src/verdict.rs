use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent_message::PriceContext;

pub const EVALUATION_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Buy,
    Hold,
    Sell,
}

impl Recommendation {
    pub const ALL: [Recommendation; 3] = [Self::Buy, Self::Hold, Self::Sell];

    /// Position on the SELL < HOLD < BUY scale.
    pub fn stance(&self) -> i8 {
        match self {
            Self::Buy => 1,
            Self::Hold => 0,
            Self::Sell => -1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Hold => "HOLD",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Recommendation {
    type Err = String;

    /// Case-insensitive; surrounding whitespace and trailing punctuation are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = s
            .trim()
            .trim_end_matches(|c: char| c.is_ascii_punctuation())
            .to_ascii_lowercase();
        match cleaned.as_str() {
            "buy" => Ok(Self::Buy),
            "hold" => Ok(Self::Hold),
            "sell" => Ok(Self::Sell),
            _ => Err(format!("unknown recommendation {s:?}")),
        }
    }
}

/// One analysis agent's structured opinion.
///
/// Invalid verdicts never vote but are kept for the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentVerdict {
    pub agent_id: String,
    pub recommendation: Recommendation,
    pub rationale: String,
    /// 0.0 to 1.0 when the agent reported one.
    pub confidence: Option<Decimal>,
    pub valid: bool,
    /// Why the verdict is invalid.
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl AgentVerdict {
    pub fn valid(
        agent_id: &str,
        recommendation: Recommendation,
        rationale: &str,
        confidence: Option<Decimal>,
    ) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            recommendation,
            rationale: rationale.to_string(),
            confidence,
            valid: true,
            error: None,
            elapsed_ms: 0,
        }
    }

    pub fn invalid(agent_id: &str, error: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            recommendation: Recommendation::Hold,
            rationale: String::new(),
            confidence: None,
            valid: false,
            error: Some(error.into()),
            elapsed_ms: 0,
        }
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }
}

/// Vote counts keyed by recommendation. All three keys are always present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct VoteTally(BTreeMap<Recommendation, usize>);

impl VoteTally {
    pub fn new() -> Self {
        Self(Recommendation::ALL.iter().map(|r| (*r, 0)).collect())
    }

    pub fn record(&mut self, recommendation: Recommendation) {
        *self.0.entry(recommendation).or_insert(0) += 1;
    }

    pub fn count(&self, recommendation: Recommendation) -> usize {
        self.0.get(&recommendation).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }
}

impl Default for VoteTally {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementLevel {
    /// Every valid verdict is the same.
    #[default]
    Unanimous,
    /// A strict majority agrees, with dissent.
    Majority,
    /// No recommendation reached a majority.
    Split,
}

/// Distance between the most bullish and most bearish valid verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateLevel {
    #[default]
    None,
    /// Neighbouring stances only, e.g. BUY and HOLD.
    Small,
    /// BUY and SELL on the same panel.
    Large,
}

impl DebateLevel {
    pub fn from_spread(spread: i8) -> Self {
        match spread {
            i8::MIN..=0 => Self::None,
            1 => Self::Small,
            _ => Self::Large,
        }
    }
}

/// How the panel's valid verdicts relate to each other.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Agreement {
    pub level: AgreementLevel,
    pub debate_level: DebateLevel,
    /// Valid agents that voted against the final recommendation, in priority order.
    pub dissenting_agents: Vec<String>,
    /// Dispatched agents without a valid verdict, in dispatch order.
    pub missing_agents: Vec<String>,
    /// True for split panels and for panels holding both BUY and SELL.
    pub debate_warranted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusResult {
    pub final_recommendation: Recommendation,
    pub vote_tally: VoteTally,
    pub contributing_rationale: String,
    /// Agents whose verdicts were valid, in priority order.
    pub participating_agents: Vec<String>,
    /// Number of verdicts handed to the aggregator, valid or not.
    pub dispatched: usize,
    pub degraded: bool,
    #[serde(default)]
    pub agreement: Agreement,
}

/// An analyst that changed its recommendation during a follow-up round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionChange {
    pub agent_id: String,
    pub round: u32,
    pub from: Recommendation,
    pub to: Recommendation,
}

/// Follow-up rounds held because the opening verdicts disagreed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DebateRecord {
    pub rounds: u32,
    /// Verdicts before the first follow-up round, in dispatch order.
    pub opening_verdicts: Vec<AgentVerdict>,
    pub position_changes: Vec<PositionChange>,
}

/// Audit record of one consensus run for a ticker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub id: Uuid,
    pub schema_version: u32,
    pub ticker: String,
    pub query: String,
    pub decided_at: DateTime<Utc>,
    pub consensus: ConsensusResult,
    /// Every dispatched verdict in dispatch order, including invalid ones.
    pub verdicts: Vec<AgentVerdict>,
    pub price_context: Option<PriceContext>,
    pub guaranteed_context: bool,
    pub chunks_retrieved: usize,
    pub processing_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debate: Option<DebateRecord>,
}

impl Evaluation {
    /// One-paragraph summary for terminal output.
    pub fn headline(&self) -> String {
        let c = &self.consensus;
        let mut line = format!(
            "The counsel recommends {} for {} ({} BUY / {} HOLD / {} SELL)",
            c.final_recommendation,
            self.ticker,
            c.vote_tally.count(Recommendation::Buy),
            c.vote_tally.count(Recommendation::Hold),
            c.vote_tally.count(Recommendation::Sell),
        );
        if c.agreement.level == AgreementLevel::Split {
            line.push_str(" [split panel]");
        }
        if c.degraded {
            line.push_str(&format!(
                " [degraded: {} of {} agents answered]",
                c.participating_agents.len(),
                c.dispatched
            ));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommendation_parses_loosely() {
        assert_eq!("Buy".parse::<Recommendation>().unwrap(), Recommendation::Buy);
        assert_eq!(" SELL. ".parse::<Recommendation>().unwrap(), Recommendation::Sell);
        assert_eq!("hold".parse::<Recommendation>().unwrap(), Recommendation::Hold);
        assert!("strong buy".parse::<Recommendation>().is_err());
        assert!("".parse::<Recommendation>().is_err());
    }

    #[test]
    fn recommendation_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Recommendation::Hold).unwrap(), "\"HOLD\"");
    }

    #[test]
    fn tally_has_all_keys() {
        let mut tally = VoteTally::new();
        tally.record(Recommendation::Buy);
        tally.record(Recommendation::Buy);
        assert_eq!(tally.count(Recommendation::Buy), 2);
        assert_eq!(tally.count(Recommendation::Sell), 0);
        assert_eq!(tally.total(), 2);

        let json = serde_json::to_value(&tally).unwrap();
        assert_eq!(json, serde_json::json!({"BUY": 2, "HOLD": 0, "SELL": 0}));
    }

    #[test]
    fn debate_level_follows_stance_spread() {
        let spread = |a: Recommendation, b: Recommendation| (a.stance() - b.stance()).abs();
        assert_eq!(
            DebateLevel::from_spread(spread(Recommendation::Buy, Recommendation::Buy)),
            DebateLevel::None
        );
        assert_eq!(
            DebateLevel::from_spread(spread(Recommendation::Hold, Recommendation::Sell)),
            DebateLevel::Small
        );
        assert_eq!(
            DebateLevel::from_spread(spread(Recommendation::Buy, Recommendation::Sell)),
            DebateLevel::Large
        );
    }

    #[test]
    fn agreement_serializes_snake_case() {
        let agreement = Agreement {
            level: AgreementLevel::Split,
            debate_level: DebateLevel::Large,
            dissenting_agents: vec!["socrates".to_string()],
            missing_agents: Vec::new(),
            debate_warranted: true,
        };
        let json = serde_json::to_value(&agreement).unwrap();
        assert_eq!(json["level"], "split");
        assert_eq!(json["debate_level"], "large");
    }

    #[test]
    fn invalid_verdict_carries_error() {
        let v = AgentVerdict::invalid("diogenes", "timed out").with_elapsed_ms(90_000);
        assert!(!v.valid);
        assert_eq!(v.error.as_deref(), Some("timed out"));
        assert_eq!(v.elapsed_ms, 90_000);
    }
}
