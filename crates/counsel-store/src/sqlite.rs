use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use counsel_models::store_schema::{ChunkRow, STORE_TABLE_DDL};
use counsel_models::{Evaluation, QuarterId};
use rusqlite::{Connection, OptionalExtension};

use crate::error::StoreError;

/// SQLite access is synchronized via `Mutex` since `rusqlite::Connection` is not `Sync`.
pub type SharedStore = Arc<Mutex<SqliteStore>>;

pub(crate) fn lock(store: &SharedStore) -> Result<MutexGuard<'_, SqliteStore>, StoreError> {
    store
        .lock()
        .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))
}

/// The research store: filing chunks, the ticker/quarter table and past
/// evaluations, all in one SQLite file.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the store. Creates the schema and enables WAL so the
    /// CLI can read while an ingestion run writes.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(STORE_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self { conn })
    }

    /// Open an in-memory store with the schema applied. Useful for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(STORE_TABLE_DDL)?;
        Ok(Self { conn })
    }

    pub fn into_shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    /// Upsert chunks and record their quarters in one transaction.
    /// Returns the quarters that were not recorded before.
    pub fn upsert_chunks(&mut self, rows: &[ChunkRow]) -> Result<Vec<QuarterId>, StoreError> {
        let now = Utc::now().to_rfc3339();
        let mut added = Vec::new();
        let tx = self.conn.transaction()?;
        {
            // Upsert keeps the rowid, so the FTS update trigger re-indexes the text.
            let mut chunk_stmt = tx.prepare_cached(
                "INSERT INTO chunks \
                 (chunk_id, ticker, fiscal_year, quarter, text, ingested_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(chunk_id) DO UPDATE SET \
                 ticker = excluded.ticker, fiscal_year = excluded.fiscal_year, \
                 quarter = excluded.quarter, text = excluded.text, \
                 ingested_at = excluded.ingested_at",
            )?;
            let mut quarter_stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO ticker_quarters (ticker, fiscal_year, quarter, recorded_at) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for row in rows {
                chunk_stmt.execute(rusqlite::params![
                    row.chunk_id,
                    row.ticker,
                    row.fiscal_year,
                    row.quarter,
                    row.text,
                    now,
                ])?;
                let inserted = quarter_stmt.execute(rusqlite::params![
                    row.ticker,
                    row.fiscal_year,
                    row.quarter,
                    now,
                ])?;
                if inserted > 0 {
                    added.push(QuarterId::new(&row.ticker, row.fiscal_year, row.quarter));
                }
            }
        }
        tx.commit()?;
        Ok(added)
    }

    /// All chunks of a ticker, optionally narrowed to one quarter.
    pub fn chunks_matching(
        &self,
        ticker: &str,
        quarter: Option<&QuarterId>,
    ) -> Result<Vec<ChunkRow>, StoreError> {
        let rows = match quarter {
            Some(q) => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT chunk_id, ticker, fiscal_year, quarter, text FROM chunks \
                     WHERE ticker = ?1 AND fiscal_year = ?2 AND quarter = ?3 \
                     ORDER BY chunk_id",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![ticker, q.fiscal_year, q.quarter], chunk_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT chunk_id, ticker, fiscal_year, quarter, text FROM chunks \
                     WHERE ticker = ?1 ORDER BY chunk_id",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![ticker], chunk_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        Ok(rows)
    }

    /// Full-text search over a ticker's chunks, optionally narrowed to one
    /// quarter. `match_expr` is an FTS5 query string.
    ///
    /// Returns at most `limit` rows, best first, paired with their relevance
    /// (negated `bm25()`, so higher is better and every match scores above 0).
    pub fn search_chunks(
        &self,
        ticker: &str,
        quarter: Option<&QuarterId>,
        match_expr: &str,
        limit: usize,
    ) -> Result<Vec<(ChunkRow, f64)>, StoreError> {
        let (year, q) = match quarter {
            Some(q) => (Some(q.fiscal_year), Some(q.quarter)),
            None => (None, None),
        };
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut stmt = self.conn.prepare_cached(
            "SELECT c.chunk_id, c.ticker, c.fiscal_year, c.quarter, c.text, \
                    bm25(chunks_fts) AS score \
             FROM chunks_fts JOIN chunks c ON c.rowid = chunks_fts.rowid \
             WHERE chunks_fts MATCH ?1 AND c.ticker = ?2 \
               AND (?3 IS NULL OR (c.fiscal_year = ?3 AND c.quarter = ?4)) \
             ORDER BY score, c.chunk_id \
             LIMIT ?5",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![match_expr, ticker, year, q, limit], |row| {
                let score: f64 = row.get(5)?;
                Ok((chunk_row(row)?, -score))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every recorded quarter, oldest first.
    pub fn load_quarters(&self) -> Result<Vec<QuarterId>, StoreError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT ticker, fiscal_year, quarter FROM ticker_quarters \
             ORDER BY ticker, fiscal_year, quarter",
        )?;
        let quarters = stmt
            .query_map([], |row| {
                let ticker: String = row.get(0)?;
                Ok(QuarterId::new(&ticker, row.get(1)?, row.get(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(quarters)
    }

    pub fn count_chunks(&self) -> Result<usize, StoreError> {
        let count: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn save_evaluation(&self, evaluation: &Evaluation) -> Result<(), StoreError> {
        let json = serde_json::to_string(evaluation)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO evaluations \
             (id, ticker, decided_at, final_recommendation, degraded, evaluation_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                evaluation.id.to_string(),
                evaluation.ticker,
                evaluation.decided_at.to_rfc3339(),
                evaluation.consensus.final_recommendation.as_str(),
                evaluation.consensus.degraded,
                json,
            ],
        )?;
        Ok(())
    }

    /// Most recent evaluation for a ticker, if any.
    pub fn latest_evaluation(&self, ticker: &str) -> Result<Option<Evaluation>, StoreError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT evaluation_json FROM evaluations WHERE ticker = ?1 \
                 ORDER BY decided_at DESC LIMIT 1",
                rusqlite::params![ticker],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

fn chunk_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkRow> {
    Ok(ChunkRow {
        chunk_id: row.get(0)?,
        ticker: row.get(1)?,
        fiscal_year: row.get(2)?,
        quarter: row.get(3)?,
        text: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, ticker: &str, year: i32, quarter: u8, text: &str) -> ChunkRow {
        ChunkRow {
            chunk_id: id.to_string(),
            ticker: ticker.to_string(),
            fiscal_year: year,
            quarter,
            text: text.to_string(),
        }
    }

    #[test]
    fn upsert_records_new_quarters_once() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let added = store
            .upsert_chunks(&[
                row("a1", "AAPL", 2024, 3, "Net sales increased"),
                row("a2", "AAPL", 2024, 3, "Services revenue"),
                row("a3", "AAPL", 2024, 2, "iPhone revenue"),
            ])
            .unwrap();
        assert_eq!(
            added,
            vec![QuarterId::new("AAPL", 2024, 3), QuarterId::new("AAPL", 2024, 2)]
        );

        let again = store
            .upsert_chunks(&[row("a4", "AAPL", 2024, 3, "Gross margin")])
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(store.count_chunks().unwrap(), 4);
    }

    #[test]
    fn upsert_replaces_existing_chunk() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_chunks(&[row("a1", "AAPL", 2024, 3, "old")])
            .unwrap();
        store
            .upsert_chunks(&[row("a1", "AAPL", 2024, 3, "new")])
            .unwrap();
        let rows = store.chunks_matching("AAPL", None).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "new");
    }

    #[test]
    fn chunks_matching_filters_ticker_and_quarter() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_chunks(&[
                row("o1", "ORCL", 2024, 1, "cloud revenue"),
                row("o2", "ORCL", 2024, 2, "cloud revenue"),
                row("g1", "GOOGL", 2024, 1, "cloud revenue"),
            ])
            .unwrap();

        let all = store.chunks_matching("ORCL", None).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|r| r.ticker == "ORCL"));

        let q1 = store
            .chunks_matching("ORCL", Some(&QuarterId::new("ORCL", 2024, 1)))
            .unwrap();
        assert_eq!(q1.len(), 1);
        assert_eq!(q1[0].chunk_id, "o1");
    }

    #[test]
    fn search_ranks_matches_within_filter() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_chunks(&[
                row("o1", "ORCL", 2024, 1, "cloud revenue grew"),
                row("o2", "ORCL", 2024, 2, "cloud services"),
                row("o3", "ORCL", 2024, 2, "share repurchases"),
                row("g1", "GOOGL", 2024, 1, "cloud revenue grew"),
            ])
            .unwrap();

        let hits = store
            .search_chunks("ORCL", None, "\"cloud\" OR \"revenue\"", 10)
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|(r, _)| r.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["o1", "o2"]);
        assert!(hits[0].1 > hits[1].1);
        assert!(hits[1].1 > 0.0);

        let q2 = QuarterId::new("ORCL", 2024, 2);
        let hits = store
            .search_chunks("ORCL", Some(&q2), "\"cloud\"", 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.chunk_id, "o2");
    }

    #[test]
    fn search_follows_replaced_text() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_chunks(&[row("a1", "AAPL", 2024, 3, "iphone units")])
            .unwrap();
        store
            .upsert_chunks(&[row("a1", "AAPL", 2024, 3, "services margin")])
            .unwrap();

        assert!(store
            .search_chunks("AAPL", None, "\"iphone\"", 5)
            .unwrap()
            .is_empty());
        let hits = store
            .search_chunks("AAPL", None, "\"margin\"", 5)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.text, "services margin");
    }

    #[test]
    fn load_quarters_sorted() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_chunks(&[
                row("m2", "MSFT", 2024, 2, "x"),
                row("m1", "MSFT", 2023, 4, "x"),
                row("a1", "AAPL", 2024, 1, "x"),
            ])
            .unwrap();
        let quarters = store.load_quarters().unwrap();
        assert_eq!(
            quarters,
            vec![
                QuarterId::new("AAPL", 2024, 1),
                QuarterId::new("MSFT", 2023, 4),
                QuarterId::new("MSFT", 2024, 2),
            ]
        );
    }

    #[test]
    fn latest_evaluation_missing() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.latest_evaluation("AAPL").unwrap().is_none());
    }

    #[test]
    fn open_file_backed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let mut store = SqliteStore::open(path.to_str().unwrap()).unwrap();
        store
            .upsert_chunks(&[row("a1", "AAPL", 2024, 3, "Net sales")])
            .unwrap();
        drop(store);

        let reopened = SqliteStore::open(path.to_str().unwrap()).unwrap();
        assert_eq!(reopened.count_chunks().unwrap(), 1);
        assert_eq!(reopened.load_quarters().unwrap().len(), 1);
    }
}
