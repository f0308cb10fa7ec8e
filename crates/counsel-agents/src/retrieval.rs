use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use counsel_models::{
    normalize_ticker, ChunkFilter, QuarterId, RetrievalConfig, RetrievalPlan, RetrievedChunk,
};
use counsel_store::{DocumentIndex, TickerQuarterIndex};
use tracing::{debug, warn};

use crate::error::AgentError;

/// Builds the chunk set an analyst sees for one ticker.
///
/// The newest quarters are guaranteed representation first, round-robin so
/// every quarter gets a chunk before any gets a second. Whatever budget is
/// left is filled by a ticker-filtered similarity query.
pub struct RetrievalPlanner {
    index: Arc<dyn DocumentIndex>,
    quarters: Arc<TickerQuarterIndex>,
    query_timeout: Duration,
}

impl RetrievalPlanner {
    pub fn new(
        index: Arc<dyn DocumentIndex>,
        quarters: Arc<TickerQuarterIndex>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            index,
            quarters,
            query_timeout,
        }
    }

    pub async fn plan(
        &self,
        ticker: &str,
        query: &str,
        budget: RetrievalConfig,
    ) -> Result<RetrievalPlan, AgentError> {
        let ticker = normalize_ticker(ticker);
        if ticker.is_empty() {
            return Err(AgentError::Validation("ticker must not be empty".to_string()));
        }

        let total = budget.total_budget;
        let quarters = if self.quarters.has(&ticker) {
            self.quarters.latest(&ticker, budget.guaranteed_quarters)
        } else {
            debug!(ticker = %ticker, "No indexed quarters, similarity only");
            Vec::new()
        };
        let guaranteed_context = !quarters.is_empty();
        let mut plan = RetrievalPlan {
            ticker: ticker.clone(),
            chunks: Vec::with_capacity(total),
            guaranteed_context,
        };
        if total == 0 {
            return Ok(plan);
        }

        let mut seen: HashSet<String> = HashSet::new();

        let allotment = total.min(quarters.len() * budget.guaranteed_per_quarter);
        if allotment > 0 {
            let mut queues = Vec::with_capacity(quarters.len());
            for quarter in &quarters {
                queues.push(VecDeque::from(
                    self.fetch_quarter(quarter, query, allotment).await?,
                ));
            }
            interleave(&mut queues, allotment, &mut seen, &mut plan.chunks);
            debug!(
                ticker = %ticker,
                quarters = quarters.len(),
                guaranteed = plan.chunks.len(),
                "Guaranteed quarter context assembled"
            );
        }

        let remaining = total - plan.chunks.len();
        if remaining > 0 {
            // Over-fetch by what is already selected so duplicates backfill.
            let top_k = remaining + plan.chunks.len();
            let filter = ChunkFilter::ticker(&ticker);
            let candidates = self.query_filtered(&filter, query, top_k).await?;
            plan.chunks.extend(
                candidates
                    .into_iter()
                    .filter(|c| seen.insert(c.chunk_id.clone()))
                    .take(remaining),
            );
        }

        Ok(plan)
    }

    async fn fetch_quarter(
        &self,
        quarter: &QuarterId,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, AgentError> {
        self.query_filtered(&ChunkFilter::quarter(quarter), query, top_k)
            .await
    }

    /// Query the index under the deadline and drop anything outside the filter.
    async fn query_filtered(
        &self,
        filter: &ChunkFilter,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, AgentError> {
        let results = tokio::time::timeout(self.query_timeout, self.index.query(filter, query, top_k))
            .await
            .map_err(|_| AgentError::UpstreamTimeout {
                what: format!("document index query for {}", filter.ticker),
                seconds: self.query_timeout.as_secs(),
            })??;

        Ok(results
            .into_iter()
            .filter(|chunk| {
                let admitted = filter.admits(chunk);
                if !admitted {
                    warn!(
                        ticker = %filter.ticker,
                        chunk_id = %chunk.chunk_id,
                        chunk_ticker = %chunk.ticker,
                        chunk_quarter = %chunk.quarter.label(),
                        "Dropping chunk outside query filter"
                    );
                }
                admitted
            })
            .collect())
    }
}

/// Take one chunk per quarter per round until `allotment` chunks are
/// selected or every queue is exhausted. A quarter that runs dry simply drops
/// out of later rounds, so its unused share goes to the quarters after it.
fn interleave(
    queues: &mut [VecDeque<RetrievedChunk>],
    allotment: usize,
    seen: &mut HashSet<String>,
    out: &mut Vec<RetrievedChunk>,
) {
    let mut selected = 0;
    while selected < allotment {
        let mut progressed = false;
        for queue in queues.iter_mut() {
            if selected == allotment {
                break;
            }
            while let Some(chunk) = queue.pop_front() {
                if seen.insert(chunk.chunk_id.clone()) {
                    out.push(chunk);
                    selected += 1;
                    progressed = true;
                    break;
                }
            }
        }
        if !progressed {
            break;
        }
    }
}
