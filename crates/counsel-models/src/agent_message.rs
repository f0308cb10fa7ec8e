use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunk::RetrievedChunk;
use crate::verdict::Recommendation;

/// Market data handed to analysts next to the filing text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PriceContext {
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub last_price: Option<Decimal>,
    /// Lowest price over the feed's lookback window.
    #[serde(default)]
    pub low: Option<Decimal>,
    #[serde(default)]
    pub high: Option<Decimal>,
    #[serde(default)]
    pub pe_ratio: Option<Decimal>,
}

/// Request sent to an analysis agent (serialized as JSON into the prompt).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRequest {
    pub request_id: Uuid,
    pub ticker: String,
    pub query: String,
    pub chunks: Vec<RetrievedChunk>,
    pub price_context: Option<PriceContext>,
    /// False when no quarter-guaranteed context could be assembled.
    pub guaranteed_context: bool,
    /// Other analysts' verdicts, set only on follow-up rounds.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peer_positions: Vec<PeerPosition>,
}

/// Another analyst's standing verdict, shown during a follow-up round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerPosition {
    pub agent_id: String,
    pub recommendation: Recommendation,
    pub rationale: String,
}

/// Raw structured answer of an analysis agent, before validation.
///
/// Every field is optional on the wire; the orchestrator decides whether the
/// answer is usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnalystOutput {
    #[serde(default)]
    pub stock: Option<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default, alias = "reason")]
    pub rationale: Option<String>,
    #[serde(default)]
    pub confidence: Option<Decimal>,
    #[serde(default)]
    pub financials: Option<String>,
    #[serde(default)]
    pub growth: Option<String>,
    #[serde(default)]
    pub price_description: Option<String>,
}
