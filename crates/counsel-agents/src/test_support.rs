//! Scenario analysts and an in-memory document index for tests.
//!
//! `KeywordAnalyst` reads the filing excerpts it is given and votes from the
//! wording, so orchestrator tests exercise real retrieval output without the
//! `claude` CLI. `ScriptedAnalyst` returns a fixed answer, fails, stalls or
//! panics on demand, or changes its vote once shown the other analysts'
//! positions.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use counsel_models::{
    AnalysisRequest, AnalystOutput, ChunkFilter, QuarterId, Recommendation, RetrievedChunk,
};
use counsel_store::{DocumentIndex, StoreError};

use crate::analyst::AnalysisAgent;
use crate::error::AgentError;

const POSITIVE: &[&str] = &["grew", "growth", "record", "increased", "expanded", "beat"];
const NEGATIVE: &[&str] = &["declined", "decline", "loss", "fell", "impairment", "missed"];

/// Votes BUY or SELL when positive or negative wording dominates the
/// excerpts by at least `margin` mentions, HOLD otherwise.
pub struct KeywordAnalyst {
    pub id: String,
    pub focus: Option<String>,
    pub margin: usize,
}

impl KeywordAnalyst {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            focus: None,
            margin: 1,
        }
    }

    pub fn with_margin(mut self, margin: usize) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_focus(mut self, focus: &str) -> Self {
        self.focus = Some(focus.to_string());
        self
    }
}

fn count_terms(text: &str, terms: &[&str]) -> usize {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| terms.contains(&w.to_lowercase().as_str()))
        .count()
}

#[async_trait]
impl AnalysisAgent for KeywordAnalyst {
    fn id(&self) -> &str {
        &self.id
    }

    fn focus(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalystOutput, AgentError> {
        let text: String = request
            .chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let positive = count_terms(&text, POSITIVE);
        let negative = count_terms(&text, NEGATIVE);

        let recommendation = if positive >= negative + self.margin {
            Recommendation::Buy
        } else if negative >= positive + self.margin {
            Recommendation::Sell
        } else {
            Recommendation::Hold
        };

        let quarters: Vec<String> = {
            let mut q: Vec<&QuarterId> = request.chunks.iter().map(|c| &c.quarter).collect();
            q.sort();
            q.dedup();
            q.iter().rev().map(|q| q.label()).collect()
        };

        Ok(AnalystOutput {
            stock: Some(request.ticker.clone()),
            recommendation: Some(recommendation.to_string()),
            rationale: Some(format!(
                "{positive} positive and {negative} negative signals across {}",
                quarters.join(", ")
            )),
            confidence: None,
            financials: None,
            growth: None,
            price_description: request
                .price_context
                .as_ref()
                .and_then(|p| p.last_price)
                .map(|p| format!("Last price {p}")),
        })
    }
}

#[derive(Debug, Clone)]
enum Script {
    Answer(AnalystOutput),
    Concede {
        opening: AnalystOutput,
        follow_up: AnalystOutput,
    },
    Fail(String),
    Stall(Duration),
    Panic,
}

/// An analyst with a fixed behavior that records every request it receives.
pub struct ScriptedAnalyst {
    id: String,
    script: Script,
    requests: Mutex<Vec<AnalysisRequest>>,
}

impl ScriptedAnalyst {
    fn with_script(id: &str, script: Script) -> Self {
        Self {
            id: id.to_string(),
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers with a well-formed output for whatever ticker it is asked about.
    pub fn voting(id: &str, recommendation: Recommendation, rationale: &str) -> Self {
        Self::answering(
            id,
            AnalystOutput {
                recommendation: Some(recommendation.to_string()),
                rationale: Some(rationale.to_string()),
                ..Default::default()
            },
        )
    }

    pub fn answering(id: &str, output: AnalystOutput) -> Self {
        Self::with_script(id, Script::Answer(output))
    }

    /// Votes `opening` until a follow-up round shows it peer positions, then
    /// votes `follow_up`.
    pub fn conceding(id: &str, opening: Recommendation, follow_up: Recommendation) -> Self {
        let output = |r: Recommendation| AnalystOutput {
            recommendation: Some(r.to_string()),
            rationale: Some(format!("{id} now says {r}")),
            ..Default::default()
        };
        Self::with_script(
            id,
            Script::Concede {
                opening: output(opening),
                follow_up: output(follow_up),
            },
        )
    }

    pub fn failing(id: &str, message: &str) -> Self {
        Self::with_script(id, Script::Fail(message.to_string()))
    }

    pub fn stalling(id: &str, delay: Duration) -> Self {
        Self::with_script(id, Script::Stall(delay))
    }

    pub fn panicking(id: &str) -> Self {
        Self::with_script(id, Script::Panic)
    }

    pub fn requests(&self) -> Vec<AnalysisRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AnalysisAgent for ScriptedAnalyst {
    fn id(&self) -> &str {
        &self.id
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalystOutput, AgentError> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        match &self.script {
            Script::Answer(output) => Ok(output.clone()),
            Script::Concede { opening, follow_up } => {
                if request.peer_positions.is_empty() {
                    Ok(opening.clone())
                } else {
                    Ok(follow_up.clone())
                }
            }
            Script::Fail(message) => Err(AgentError::Cli(message.clone())),
            Script::Stall(delay) => {
                tokio::time::sleep(*delay).await;
                Err(AgentError::Cli("stalled analyst woke up".to_string()))
            }
            Script::Panic => panic!("scripted analyst {} panicked", self.id),
        }
    }
}

/// Build a chunk for tests.
pub fn chunk(id: &str, ticker: &str, year: i32, quarter: u8, score: f64) -> RetrievedChunk {
    RetrievedChunk {
        chunk_id: id.to_string(),
        ticker: ticker.to_string(),
        quarter: QuarterId::new(ticker, year, quarter),
        text: format!("{ticker} filing text {id}"),
        relevance_score: score,
    }
}

/// In-memory document index returning pre-scored chunks.
///
/// `ignoring_filter` makes it misbehave and return every chunk, for
/// contamination tests.
pub struct StaticIndex {
    chunks: Vec<RetrievedChunk>,
    honor_filter: bool,
    delay: Option<Duration>,
}

impl StaticIndex {
    pub fn new(chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            chunks,
            honor_filter: true,
            delay: None,
        }
    }

    pub fn ignoring_filter(mut self) -> Self {
        self.honor_filter = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl DocumentIndex for StaticIndex {
    async fn query(
        &self,
        filter: &ChunkFilter,
        _text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut hits: Vec<RetrievedChunk> = self
            .chunks
            .iter()
            .filter(|c| !self.honor_filter || filter.admits(c))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        hits.truncate(top_k);
        Ok(hits)
    }
}
