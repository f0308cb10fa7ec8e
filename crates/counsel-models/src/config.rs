use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::agent_message::PriceContext;

/// Top-level configuration for the counsel.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CounselConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub trade: TradeConfig,
    #[serde(default)]
    pub price_feed: PriceFeedConfig,
}

/// Configuration for the research store (filing chunks, quarters, evaluations).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    pub sqlite_path: String,
    /// Maximum number of cached query results in memory.
    #[serde(default = "default_memory_capacity")]
    pub memory_max_capacity: u64,
    /// How long a cached query result stays valid.
    #[serde(default = "default_memory_ttl")]
    pub memory_ttl_seconds: u64,
    /// Deadline for a single document index query.
    #[serde(default = "default_query_timeout")]
    pub query_timeout_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "data/counsel_store.db".to_string(),
            memory_max_capacity: default_memory_capacity(),
            memory_ttl_seconds: default_memory_ttl(),
            query_timeout_seconds: default_query_timeout(),
        }
    }
}

/// Budget of the quarter-priority retrieval planner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrievalConfig {
    pub total_budget: usize,
    pub guaranteed_quarters: usize,
    pub guaranteed_per_quarter: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            total_budget: 15,
            guaranteed_quarters: 3,
            guaranteed_per_quarter: 2,
        }
    }
}

/// Configuration for the analyst fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentsConfig {
    /// Per-analyst deadline in seconds.
    pub agent_timeout_seconds: u64,
    /// Model used by analysts without an override.
    pub default_model: String,
    /// Query used when the caller gives none.
    pub default_query: String,
    /// Follow-up rounds held when the opening verdicts disagree. 0 disables them.
    #[serde(default = "default_debate_rounds")]
    pub debate_rounds: u32,
    /// Analysts in rationale priority order.
    pub analysts: Vec<AnalystConfig>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            agent_timeout_seconds: 90,
            default_model: "claude-haiku-4-5".to_string(),
            default_query: "financial strength and earnings revenue growth".to_string(),
            debate_rounds: default_debate_rounds(),
            analysts: vec![
                AnalystConfig {
                    name: "socrates".to_string(),
                    model: None,
                    enabled: true,
                    focus: Some("revenue, net income and margins".to_string()),
                },
                AnalystConfig {
                    name: "pythagoras".to_string(),
                    model: Some("claude-sonnet-4-5".to_string()),
                    enabled: true,
                    focus: Some("cash flow, assets and debt".to_string()),
                },
                AnalystConfig {
                    name: "diogenes".to_string(),
                    model: None,
                    enabled: true,
                    focus: Some("quarterly growth and guidance".to_string()),
                },
            ],
        }
    }
}

impl AgentsConfig {
    /// Names of enabled analysts in configured priority order.
    pub fn priority(&self) -> Vec<String> {
        self.analysts
            .iter()
            .filter(|a| a.enabled)
            .map(|a| a.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalystConfig {
    pub name: String,
    /// Falls back to `AgentsConfig::default_model`.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Appended to the retrieval query for this analyst.
    #[serde(default)]
    pub focus: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeConfig {
    pub ledger_path: String,
    /// How long a proposal may sit in AWAITING_APPROVAL before it expires.
    #[serde(default = "default_approval_timeout")]
    pub approval_timeout_seconds: u64,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            ledger_path: "data/counsel_ledger.db".to_string(),
            approval_timeout_seconds: default_approval_timeout(),
        }
    }
}

/// Fixed quotes served by the stub price feed, keyed by ticker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PriceFeedConfig {
    #[serde(default)]
    pub quotes: BTreeMap<String, PriceContext>,
}

fn default_memory_capacity() -> u64 {
    1_000
}
fn default_memory_ttl() -> u64 {
    300
}
fn default_query_timeout() -> u64 {
    10
}
fn default_debate_rounds() -> u32 {
    1
}
fn default_approval_timeout() -> u64 {
    300
}
fn default_true() -> bool {
    true
}
