use std::sync::Arc;
use std::time::Duration;

use counsel_models::{ChunkFilter, RetrievedChunk};
use moka::future::Cache;

/// In-memory cache of document index query results, backed by moka.
///
/// Several analysts plan retrieval for the same ticker at once, so most of
/// their per-quarter queries repeat. Entries expire after the TTL and the
/// whole cache is dropped whenever ingestion changes the store.
pub struct QueryCache {
    inner: Cache<String, Arc<Vec<RetrievedChunk>>>,
}

impl QueryCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn key(filter: &ChunkFilter, text: &str, top_k: usize) -> String {
        let quarter = filter
            .quarter
            .as_ref()
            .map(|q| q.label())
            .unwrap_or_else(|| "*".to_string());
        format!("{}|{}|{}|{}", filter.ticker, quarter, top_k, text.trim())
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Vec<RetrievedChunk>>> {
        self.inner.get(key).await
    }

    pub async fn insert(&self, key: String, chunks: Arc<Vec<RetrievedChunk>>) {
        self.inner.insert(key, chunks).await;
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}
