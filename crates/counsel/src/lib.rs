//! Counsel - grounded stock verdicts and human-gated trades
//!
//! Analysts read quarter-prioritized filing excerpts, vote BUY/HOLD/SELL,
//! and a deterministic majority becomes the verdict. Acting on a verdict goes
//! through an approval state machine that never touches the ledger without
//! an explicit yes.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use counsel::models::{CounselConfig, Evaluation, TradeAction};
//! use counsel::agents::{Counsel, ClaudeAnalyst, AnalysisAgent};
//! use counsel::store::{Ingestor, SqliteDocumentIndex, TickerQuarterIndex};
//! use counsel::trade::{SqliteLedger, TradeApprovalStateMachine, seek_approval};
//! ```

pub use counsel_agents as agents;
pub use counsel_models as models;
pub use counsel_store as store;
pub use counsel_trade as trade;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use counsel_agents::{
    AgentError, AnalysisAgent, ClaudeAnalyst, Counsel, PriceFeed, RetrievalPlanner, StubPriceFeed,
};
use counsel_models::verdict::EVALUATION_SCHEMA_VERSION;
use counsel_models::{CounselConfig, Evaluation};
use counsel_store::{
    DocumentIndex, EvaluationLog, Ingestor, SharedStore, SqliteDocumentIndex, SqliteStore,
    TickerQuarterIndex,
};
use counsel_trade::{SqliteLedger, TradeApprovalStateMachine};
use tracing::info;

/// Everything the research side needs, wired over one store.
pub struct Research {
    pub counsel: Counsel,
    pub ingestor: Ingestor,
    pub evaluations: EvaluationLog,
    pub quarters: Arc<TickerQuarterIndex>,
}

/// The trading side: the ledger and the session's approval state machine.
pub struct Trading {
    pub ledger: Arc<SqliteLedger>,
    pub machine: TradeApprovalStateMachine,
}

/// Load configuration from a TOML file.
pub fn load_config(path: &str) -> Result<CounselConfig, anyhow::Error> {
    let raw =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {path}"))?;
    toml::from_str(&raw).with_context(|| format!("Failed to parse config: {path}"))
}

/// One `ClaudeAnalyst` per enabled analyst, in configured order.
pub fn build_analysts(config: &CounselConfig) -> Vec<Arc<dyn AnalysisAgent>> {
    let timeout = Duration::from_secs(config.agents.agent_timeout_seconds);
    config
        .agents
        .analysts
        .iter()
        .filter(|a| a.enabled)
        .map(|a| {
            Arc::new(ClaudeAnalyst::from_config(
                a,
                &config.agents.default_model,
                timeout,
            )) as Arc<dyn AnalysisAgent>
        })
        .collect()
}

/// Open the store at `config.store.sqlite_path` and wire the research side
/// with Claude CLI analysts.
pub fn build_research(config: &CounselConfig) -> Result<Research, anyhow::Error> {
    ensure_parent_dir(&config.store.sqlite_path)?;
    let store = SqliteStore::open(&config.store.sqlite_path)
        .with_context(|| format!("Failed to open store: {}", config.store.sqlite_path))?
        .into_shared();
    build_research_with(config, store, build_analysts(config))
}

/// Wire the research side over an already-open store and a given set of
/// analysts.
pub fn build_research_with(
    config: &CounselConfig,
    store: SharedStore,
    analysts: Vec<Arc<dyn AnalysisAgent>>,
) -> Result<Research, anyhow::Error> {
    let quarters = {
        let guard = store
            .lock()
            .map_err(|e| anyhow::anyhow!("SQLite mutex poisoned: {e}"))?;
        Arc::new(TickerQuarterIndex::load(&guard).context("Failed to load quarter index")?)
    };
    let index = Arc::new(SqliteDocumentIndex::new(
        store.clone(),
        config.store.memory_max_capacity,
        Duration::from_secs(config.store.memory_ttl_seconds),
    ));
    let planner = Arc::new(RetrievalPlanner::new(
        index.clone() as Arc<dyn DocumentIndex>,
        quarters.clone(),
        Duration::from_secs(config.store.query_timeout_seconds),
    ));
    let price_feed: Arc<dyn PriceFeed> = Arc::new(StubPriceFeed::new(&config.price_feed));

    let counsel = Counsel::new(
        analysts,
        planner,
        price_feed,
        &config.agents,
        config.retrieval,
    );
    info!(
        analysts = ?counsel.analyst_ids(),
        tickers = quarters.tickers().len(),
        "Research wired"
    );

    Ok(Research {
        counsel,
        ingestor: Ingestor::new(store.clone(), quarters.clone(), index),
        evaluations: EvaluationLog::new(store),
        quarters,
    })
}

/// Open the ledger at `config.trade.ledger_path` and start a session.
pub fn build_trading(config: &CounselConfig) -> Result<Trading, anyhow::Error> {
    ensure_parent_dir(&config.trade.ledger_path)?;
    let ledger = Arc::new(
        SqliteLedger::open(&config.trade.ledger_path)
            .with_context(|| format!("Failed to open ledger: {}", config.trade.ledger_path))?,
    );
    let machine = TradeApprovalStateMachine::new(
        ledger.clone(),
        Duration::from_secs(config.trade.approval_timeout_seconds),
    );
    Ok(Trading { ledger, machine })
}

/// Evaluate a ticker, reusing the latest stored evaluation unless `refresh`
/// is set, a different query was asked, or it was written under an older
/// schema. Fresh evaluations are stored.
pub async fn analyze(
    research: &Research,
    ticker: &str,
    query: Option<&str>,
    refresh: bool,
) -> Result<Evaluation, AgentError> {
    if !refresh {
        if let Some(stored) = research.evaluations.latest(ticker)? {
            let same_query = query.map_or(true, |q| q.trim() == stored.query);
            if same_query && stored.schema_version == EVALUATION_SCHEMA_VERSION {
                info!(
                    ticker = %stored.ticker,
                    decided_at = %stored.decided_at,
                    "Reusing stored evaluation"
                );
                return Ok(stored);
            }
        }
    }
    let evaluation = research.counsel.evaluate(ticker, query).await?;
    research.evaluations.save(&evaluation)?;
    Ok(evaluation)
}

fn ensure_parent_dir(path: &str) -> Result<(), anyhow::Error> {
    match Path::new(path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display())),
        _ => Ok(()),
    }
}
