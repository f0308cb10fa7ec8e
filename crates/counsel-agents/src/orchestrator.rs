use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use counsel_models::verdict::EVALUATION_SCHEMA_VERSION;
use counsel_models::{
    normalize_ticker, AgentVerdict, AgentsConfig, AnalysisRequest, DebateRecord, Evaluation,
    PeerPosition, PositionChange, PriceContext, RetrievalConfig,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analyst::AnalysisAgent;
use crate::consensus::ConsensusAggregator;
use crate::error::AgentError;
use crate::parser::validate_output;
use crate::price::PriceFeed;
use crate::retrieval::RetrievalPlanner;

/// What one analyst task came back with.
enum AnalystRun {
    Answered {
        verdict: AgentVerdict,
        request: AnalysisRequest,
    },
    NoData,
    RetrievalFailed(AgentError),
}

/// The counsel coordinates analysts and produces an `Evaluation`.
pub struct Counsel {
    analysts: Vec<Arc<dyn AnalysisAgent>>,
    planner: Arc<RetrievalPlanner>,
    price_feed: Arc<dyn PriceFeed>,
    aggregator: ConsensusAggregator,
    budget: RetrievalConfig,
    agent_timeout: Duration,
    default_query: String,
    debate_rounds: u32,
}

impl Counsel {
    pub fn new(
        analysts: Vec<Arc<dyn AnalysisAgent>>,
        planner: Arc<RetrievalPlanner>,
        price_feed: Arc<dyn PriceFeed>,
        agents: &AgentsConfig,
        budget: RetrievalConfig,
    ) -> Self {
        Self {
            analysts,
            planner,
            price_feed,
            aggregator: ConsensusAggregator::new(agents.priority()),
            budget,
            agent_timeout: Duration::from_secs(agents.agent_timeout_seconds),
            default_query: agents.default_query.clone(),
            debate_rounds: agents.debate_rounds,
        }
    }

    pub fn analyst_ids(&self) -> Vec<String> {
        self.analysts.iter().map(|a| a.id().to_string()).collect()
    }

    /// Fan out to every analyst, wait for all of them, and aggregate.
    ///
    /// Analyst failures only lower the number of votes. Retrieval failures
    /// are returned as errors, and a ticker with no filing data at all is
    /// `NotFound`. When the opening verdicts disagree enough to warrant it,
    /// up to `debate_rounds` follow-up rounds are held before the final
    /// aggregation.
    pub async fn evaluate(
        &self,
        ticker: &str,
        query: Option<&str>,
    ) -> Result<Evaluation, AgentError> {
        let start = Instant::now();
        let ticker = normalize_ticker(ticker);
        if ticker.is_empty() {
            return Err(AgentError::Validation("ticker must not be empty".to_string()));
        }
        if self.analysts.is_empty() {
            return Err(AgentError::InsufficientData("no analysts enabled".to_string()));
        }
        let query = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(&self.default_query)
            .to_string();
        info!(ticker = %ticker, query = %query, analysts = self.analysts.len(), "Starting evaluation");

        let price_context = self.price_context(&ticker).await;

        let mut handles = Vec::with_capacity(self.analysts.len());
        for analyst in &self.analysts {
            let analyst = Arc::clone(analyst);
            let planner = Arc::clone(&self.planner);
            let ticker = ticker.clone();
            let query = query.clone();
            let price_context = price_context.clone();
            let budget = self.budget;
            let timeout = self.agent_timeout;

            let id = analyst.id().to_string();
            let handle = tokio::spawn(async move {
                run_analyst(analyst, planner, ticker, query, price_context, budget, timeout).await
            });
            handles.push((id, handle));
        }

        // Barrier: collect in dispatch order.
        let mut verdicts = Vec::with_capacity(handles.len());
        let mut requests: Vec<Option<AnalysisRequest>> = Vec::with_capacity(handles.len());
        let mut chunk_ids: HashSet<String> = HashSet::new();
        let mut guaranteed_context = false;
        let mut any_data = false;
        let mut retrieval_error = None;

        for (id, handle) in handles {
            match handle.await {
                Ok(AnalystRun::Answered { verdict, request }) => {
                    any_data = true;
                    guaranteed_context |= request.guaranteed_context;
                    chunk_ids.extend(request.chunks.iter().map(|c| c.chunk_id.clone()));
                    if verdict.valid {
                        info!(
                            agent = %id,
                            recommendation = %verdict.recommendation,
                            elapsed_ms = verdict.elapsed_ms,
                            "Analyst answered"
                        );
                    } else {
                        warn!(
                            agent = %id,
                            error = verdict.error.as_deref().unwrap_or_default(),
                            elapsed_ms = verdict.elapsed_ms,
                            "Analyst verdict discarded"
                        );
                    }
                    verdicts.push(verdict);
                    requests.push(Some(request));
                    continue;
                }
                Ok(AnalystRun::NoData) => {
                    warn!(agent = %id, ticker = %ticker, "No filing data retrieved");
                    verdicts.push(AgentVerdict::invalid(&id, "no filing data retrieved"));
                }
                Ok(AnalystRun::RetrievalFailed(e)) => {
                    error!(agent = %id, error = %e, "Retrieval failed");
                    retrieval_error.get_or_insert(e);
                    verdicts.push(AgentVerdict::invalid(&id, "retrieval failed"));
                }
                Err(e) => {
                    error!(agent = %id, error = %e, "Analyst task panicked");
                    verdicts.push(AgentVerdict::invalid(&id, format!("analyst task failed: {e}")));
                }
            }
            requests.push(None);
        }

        if let Some(e) = retrieval_error {
            return Err(e);
        }
        if !any_data {
            return Err(AgentError::NotFound(ticker));
        }

        let mut consensus = self.aggregator.aggregate(&verdicts)?;
        let mut debate = None;
        if consensus.agreement.debate_warranted && self.debate_rounds > 0 {
            let opening_verdicts = verdicts.clone();
            let mut position_changes = Vec::new();
            let mut rounds = 0;
            while rounds < self.debate_rounds && consensus.agreement.debate_warranted {
                rounds += 1;
                info!(
                    ticker = %ticker,
                    round = rounds,
                    level = ?consensus.agreement.level,
                    dissenting = ?consensus.agreement.dissenting_agents,
                    "Holding follow-up round"
                );
                position_changes.extend(self.follow_up(rounds, &mut verdicts, &requests).await);
                consensus = self.aggregator.aggregate(&verdicts)?;
            }
            debate = Some(DebateRecord {
                rounds,
                opening_verdicts,
                position_changes,
            });
        }

        let evaluation = Evaluation {
            id: Uuid::new_v4(),
            schema_version: EVALUATION_SCHEMA_VERSION,
            ticker,
            query,
            decided_at: chrono::Utc::now(),
            consensus,
            verdicts,
            price_context,
            guaranteed_context,
            chunks_retrieved: chunk_ids.len(),
            processing_time_ms: start.elapsed().as_millis() as u64,
            debate,
        };

        info!(
            ticker = %evaluation.ticker,
            recommendation = %evaluation.consensus.final_recommendation,
            degraded = evaluation.consensus.degraded,
            elapsed_ms = evaluation.processing_time_ms,
            "Evaluation complete"
        );
        Ok(evaluation)
    }

    /// One follow-up round. Every analyst with a valid verdict sees the
    /// other valid positions and answers again on the same excerpts. An
    /// analyst whose follow-up answer is unusable keeps its previous verdict.
    async fn follow_up(
        &self,
        round: u32,
        verdicts: &mut [AgentVerdict],
        requests: &[Option<AnalysisRequest>],
    ) -> Vec<PositionChange> {
        let mut handles = Vec::new();
        for (i, analyst) in self.analysts.iter().enumerate() {
            let Some(Some(opening)) = requests.get(i) else {
                continue;
            };
            if !verdicts[i].valid {
                continue;
            }
            let peer_positions: Vec<PeerPosition> = verdicts
                .iter()
                .enumerate()
                .filter(|(j, v)| *j != i && v.valid)
                .map(|(_, v)| PeerPosition {
                    agent_id: v.agent_id.clone(),
                    recommendation: v.recommendation,
                    rationale: v.rationale.clone(),
                })
                .collect();
            let request = AnalysisRequest {
                request_id: Uuid::new_v4(),
                peer_positions,
                ..opening.clone()
            };
            let analyst = Arc::clone(analyst);
            let timeout = self.agent_timeout;
            let handle = tokio::spawn(async move {
                let started = Instant::now();
                ask(analyst.as_ref(), &request, timeout)
                    .await
                    .with_elapsed_ms(started.elapsed().as_millis() as u64)
            });
            handles.push((i, handle));
        }

        let mut changes = Vec::new();
        for (i, handle) in handles {
            let id = verdicts[i].agent_id.clone();
            match handle.await {
                Ok(verdict) if verdict.valid => {
                    let from = verdicts[i].recommendation;
                    if verdict.recommendation != from {
                        info!(
                            agent = %id,
                            round,
                            from = %from,
                            to = %verdict.recommendation,
                            "Analyst changed position"
                        );
                        changes.push(PositionChange {
                            agent_id: id,
                            round,
                            from,
                            to: verdict.recommendation,
                        });
                    }
                    verdicts[i] = verdict;
                }
                Ok(verdict) => warn!(
                    agent = %id,
                    round,
                    error = verdict.error.as_deref().unwrap_or_default(),
                    "Follow-up answer discarded, keeping previous verdict"
                ),
                Err(e) => error!(agent = %id, round, error = %e, "Follow-up task panicked"),
            }
        }
        changes
    }

    async fn price_context(&self, ticker: &str) -> Option<PriceContext> {
        match self.price_feed.quote(ticker).await {
            Ok(quote) => quote,
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "Price feed failed, continuing without quote");
                None
            }
        }
    }
}

/// Retrieval text for one analyst: the investor's question plus the
/// analyst's focus.
pub fn analyst_query(query: &str, focus: Option<&str>) -> String {
    match focus.map(str::trim).filter(|f| !f.is_empty()) {
        Some(focus) => format!("{query} {focus}"),
        None => query.to_string(),
    }
}

async fn run_analyst(
    analyst: Arc<dyn AnalysisAgent>,
    planner: Arc<RetrievalPlanner>,
    ticker: String,
    query: String,
    price_context: Option<PriceContext>,
    budget: RetrievalConfig,
    timeout: Duration,
) -> AnalystRun {
    let started = Instant::now();

    let plan = match planner
        .plan(&ticker, &analyst_query(&query, analyst.focus()), budget)
        .await
    {
        Ok(plan) => plan,
        Err(e) => return AnalystRun::RetrievalFailed(e),
    };
    if plan.is_empty() {
        return AnalystRun::NoData;
    }

    let request = AnalysisRequest {
        request_id: Uuid::new_v4(),
        ticker,
        query,
        guaranteed_context: plan.guaranteed_context,
        chunks: plan.chunks,
        price_context,
        peer_positions: Vec::new(),
    };

    let verdict = ask(analyst.as_ref(), &request, timeout).await;
    AnalystRun::Answered {
        verdict: verdict.with_elapsed_ms(started.elapsed().as_millis() as u64),
        request,
    }
}

/// Ask one analyst under the deadline and validate the answer.
async fn ask(
    analyst: &dyn AnalysisAgent,
    request: &AnalysisRequest,
    timeout: Duration,
) -> AgentVerdict {
    let id = analyst.id();
    match tokio::time::timeout(timeout, analyst.analyze(request)).await {
        Err(_) => AgentVerdict::invalid(id, format!("timed out after {} seconds", timeout.as_secs())),
        Ok(Err(e)) => AgentVerdict::invalid(id, e.to_string()),
        Ok(Ok(output)) => validate_output(id, &request.ticker, &output)
            .unwrap_or_else(|e| AgentVerdict::invalid(id, e)),
    }
}
