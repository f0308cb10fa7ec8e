use std::sync::Arc;

use counsel_models::store_schema::ChunkRow;
use counsel_models::{normalize_ticker, NewChunk, QuarterId};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::document_index::SqliteDocumentIndex;
use crate::error::StoreError;
use crate::quarters::TickerQuarterIndex;
use crate::sqlite::{lock, SharedStore};

/// Result of one ingestion batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub chunks_written: usize,
    pub quarters_added: Vec<String>,
}

/// Write path for already-chunked filing text.
///
/// Writes through to SQLite and the in-memory quarter index, then drops the
/// query cache so later retrievals see the new chunks.
pub struct Ingestor {
    store: SharedStore,
    quarters: Arc<TickerQuarterIndex>,
    index: Arc<SqliteDocumentIndex>,
}

impl Ingestor {
    pub fn new(
        store: SharedStore,
        quarters: Arc<TickerQuarterIndex>,
        index: Arc<SqliteDocumentIndex>,
    ) -> Self {
        Self {
            store,
            quarters,
            index,
        }
    }

    /// Validate and upsert a batch. Any invalid chunk rejects the whole batch
    /// before anything is written.
    pub fn ingest(&self, chunks: Vec<NewChunk>) -> Result<IngestReport, StoreError> {
        let rows = chunks
            .into_iter()
            .enumerate()
            .map(|(i, chunk)| to_row(i, chunk))
            .collect::<Result<Vec<_>, _>>()?;

        if rows.is_empty() {
            return Ok(IngestReport::default());
        }

        let added = lock(&self.store)?.upsert_chunks(&rows)?;
        for row in &rows {
            self.quarters
                .record(&QuarterId::new(&row.ticker, row.fiscal_year, row.quarter));
        }
        self.index.invalidate();

        let report = IngestReport {
            chunks_written: rows.len(),
            quarters_added: added.iter().map(|q| q.to_string()).collect(),
        };
        info!(
            chunks = report.chunks_written,
            new_quarters = report.quarters_added.len(),
            "Ingestion complete"
        );
        Ok(report)
    }
}

fn to_row(position: usize, chunk: NewChunk) -> Result<ChunkRow, StoreError> {
    let invalid = |reason: &str| StoreError::InvalidChunk {
        chunk: chunk
            .chunk_id
            .clone()
            .unwrap_or_else(|| format!("#{position}")),
        reason: reason.to_string(),
    };

    let ticker = normalize_ticker(&chunk.ticker);
    if ticker.is_empty() {
        return Err(invalid("empty ticker"));
    }
    if !(1..=4).contains(&chunk.quarter) {
        return Err(invalid("quarter must be between 1 and 4"));
    }
    if chunk.text.trim().is_empty() {
        return Err(invalid("empty text"));
    }
    if chunk.chunk_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
        return Err(invalid("empty chunk_id"));
    }

    let chunk_id = match chunk.chunk_id {
        Some(id) => id,
        None => derive_chunk_id(&ticker, chunk.fiscal_year, chunk.quarter, &chunk.text),
    };

    Ok(ChunkRow {
        chunk_id,
        ticker,
        fiscal_year: chunk.fiscal_year,
        quarter: chunk.quarter,
        text: chunk.text,
    })
}

/// Stable id for a chunk that arrived without one, so re-ingesting the same
/// file replaces rather than duplicates.
pub fn derive_chunk_id(ticker: &str, fiscal_year: i32, quarter: u8, text: &str) -> String {
    let name = format!("{ticker}|{fiscal_year}|{quarter}|{text}");
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document_index::DocumentIndex;
    use crate::sqlite::SqliteStore;
    use counsel_models::ChunkFilter;
    use std::time::Duration;

    fn new_chunk(id: Option<&str>, ticker: &str, quarter: u8, text: &str) -> NewChunk {
        NewChunk {
            chunk_id: id.map(str::to_string),
            ticker: ticker.to_string(),
            fiscal_year: 2024,
            quarter,
            text: text.to_string(),
        }
    }

    fn setup() -> (Ingestor, SharedStore, Arc<TickerQuarterIndex>, Arc<SqliteDocumentIndex>) {
        let store = SqliteStore::open_in_memory().unwrap().into_shared();
        let quarters = Arc::new(TickerQuarterIndex::new());
        let index = Arc::new(SqliteDocumentIndex::new(
            store.clone(),
            100,
            Duration::from_secs(60),
        ));
        let ingestor = Ingestor::new(store.clone(), quarters.clone(), index.clone());
        (ingestor, store, quarters, index)
    }

    #[test]
    fn ingest_records_quarters() {
        let (ingestor, _, quarters, _) = setup();
        let report = ingestor
            .ingest(vec![
                new_chunk(Some("a1"), "aapl", 3, "Net sales rose"),
                new_chunk(Some("a2"), "AAPL", 3, "Services revenue"),
                new_chunk(Some("a3"), "AAPL", 2, "iPhone revenue"),
            ])
            .unwrap();
        assert_eq!(report.chunks_written, 3);
        assert_eq!(report.quarters_added, vec!["[AAPL | Q3 2024]", "[AAPL | Q2 2024]"]);
        assert_eq!(quarters.latest("AAPL", 5).len(), 2);
    }

    #[test]
    fn invalid_chunk_rejects_batch() {
        let (ingestor, store, quarters, _) = setup();
        let err = ingestor
            .ingest(vec![
                new_chunk(Some("a1"), "AAPL", 3, "Net sales"),
                new_chunk(None, "AAPL", 5, "Bad quarter"),
            ])
            .unwrap_err();
        match err {
            StoreError::InvalidChunk { chunk, .. } => assert_eq!(chunk, "#1"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.lock().unwrap().count_chunks().unwrap(), 0);
        assert!(!quarters.has("AAPL"));
    }

    #[test]
    fn derived_ids_are_stable() {
        let (ingestor, store, _, _) = setup();
        ingestor
            .ingest(vec![new_chunk(None, "MSFT", 1, "Azure grew")])
            .unwrap();
        ingestor
            .ingest(vec![new_chunk(None, "msft", 1, "Azure grew")])
            .unwrap();
        assert_eq!(store.lock().unwrap().count_chunks().unwrap(), 1);
        assert_eq!(
            derive_chunk_id("MSFT", 2024, 1, "Azure grew"),
            derive_chunk_id("MSFT", 2024, 1, "Azure grew")
        );
        assert_ne!(
            derive_chunk_id("MSFT", 2024, 1, "Azure grew"),
            derive_chunk_id("MSFT", 2024, 2, "Azure grew")
        );
    }

    #[tokio::test]
    async fn ingestion_invalidates_query_cache() {
        let (ingestor, _, _, index) = setup();
        ingestor
            .ingest(vec![new_chunk(Some("n1"), "NVDA", 1, "Data center revenue")])
            .unwrap();
        let filter = ChunkFilter::ticker("NVDA");
        assert_eq!(index.query(&filter, "revenue", 5).await.unwrap().len(), 1);

        ingestor
            .ingest(vec![new_chunk(Some("n2"), "NVDA", 2, "Gaming revenue")])
            .unwrap();
        assert_eq!(index.query(&filter, "revenue", 5).await.unwrap().len(), 2);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let (ingestor, _, _, _) = setup();
        assert_eq!(ingestor.ingest(Vec::new()).unwrap(), IngestReport::default());
    }
}
