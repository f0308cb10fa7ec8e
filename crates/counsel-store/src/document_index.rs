use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use counsel_models::{ChunkFilter, QuarterId, RetrievedChunk};
use tracing::debug;

use crate::error::StoreError;
use crate::memory::QueryCache;
use crate::sqlite::{lock, SharedStore};

/// Similarity search over indexed filing chunks. Mockable for testing.
///
/// Implementations must honor the filter: every returned chunk belongs to
/// `filter.ticker` (and `filter.quarter` when set). Results are ordered by
/// relevance, best first.
#[async_trait]
pub trait DocumentIndex: Send + Sync {
    async fn query(
        &self,
        filter: &ChunkFilter,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError>;
}

/// Read-through index: checks moka (hot) → SQLite FTS5 ranked by `bm25()`.
///
/// When fewer than `top_k` chunks match the query terms, the rest of the
/// filtered chunks follow in `chunk_id` order with a relevance of 0.
pub struct SqliteDocumentIndex {
    store: SharedStore,
    cache: QueryCache,
}

impl SqliteDocumentIndex {
    pub fn new(store: SharedStore, max_capacity: u64, ttl: Duration) -> Self {
        Self {
            store,
            cache: QueryCache::new(max_capacity, ttl),
        }
    }

    /// Drop every cached result. Called after ingestion.
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }

    fn search(
        &self,
        filter: &ChunkFilter,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError> {
        let store = lock(&self.store)?;
        let quarter = filter.quarter.as_ref();

        let mut ranked = match match_expression(text) {
            Some(expr) => store.search_chunks(&filter.ticker, quarter, &expr, top_k)?,
            None => Vec::new(),
        };

        if ranked.len() < top_k {
            let matched: HashSet<String> = ranked.iter().map(|(r, _)| r.chunk_id.clone()).collect();
            let rest = store
                .chunks_matching(&filter.ticker, quarter)?
                .into_iter()
                .filter(|r| !matched.contains(&r.chunk_id))
                .take(top_k - ranked.len())
                .map(|r| (r, 0.0));
            ranked.extend(rest);
        }
        drop(store);

        debug!(
            ticker = %filter.ticker,
            results = ranked.len(),
            "Full-text query ranked"
        );

        Ok(ranked
            .into_iter()
            .map(|(row, score)| RetrievedChunk {
                quarter: QuarterId::new(&row.ticker, row.fiscal_year, row.quarter),
                chunk_id: row.chunk_id,
                ticker: row.ticker,
                text: row.text,
                relevance_score: score,
            })
            .collect())
    }
}

/// FTS5 query matching any word of `text`. Each term is quoted so operators
/// and punctuation in the question are taken literally. `None` when the text
/// has no searchable words.
fn match_expression(text: &str) -> Option<String> {
    let mut seen = HashSet::new();
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| seen.insert(t.clone()))
        .map(|t| format!("\"{t}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[async_trait]
impl DocumentIndex for SqliteDocumentIndex {
    async fn query(
        &self,
        filter: &ChunkFilter,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, StoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let key = QueryCache::key(filter, text, top_k);
        if let Some(hit) = self.cache.get(&key).await {
            debug!(ticker = %filter.ticker, hits = hit.len(), "Query served from cache");
            return Ok(hit.as_ref().clone());
        }

        let results = self.search(filter, text, top_k)?;
        self.cache.insert(key, Arc::new(results.clone())).await;
        Ok(results)
    }
}
