/// Tables of the research store: filing chunks, indexed quarters and past
/// evaluations.
///
/// `chunks_fts` is an external-content FTS5 index over `chunks.text`, kept in
/// sync by triggers. Chunk writes must go through INSERT or UPDATE (not
/// `INSERT OR REPLACE`, whose implicit delete skips the trigger).
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS chunks (
///     chunk_id    TEXT PRIMARY KEY,
///     ticker      TEXT NOT NULL,
///     fiscal_year INTEGER NOT NULL,
///     quarter     INTEGER NOT NULL,
///     text        TEXT NOT NULL,
///     ingested_at TEXT NOT NULL
/// );
/// ```
pub const STORE_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS chunks (
    chunk_id    TEXT PRIMARY KEY,
    ticker      TEXT NOT NULL,
    fiscal_year INTEGER NOT NULL,
    quarter     INTEGER NOT NULL,
    text        TEXT NOT NULL,
    ingested_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_ticker ON chunks(ticker);
CREATE INDEX IF NOT EXISTS idx_chunks_ticker_quarter ON chunks(ticker, fiscal_year, quarter);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    text,
    content='chunks',
    content_rowid='rowid',
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, text) VALUES ('delete', old.rowid, old.text);
    INSERT INTO chunks_fts(rowid, text) VALUES (new.rowid, new.text);
END;

CREATE TABLE IF NOT EXISTS ticker_quarters (
    ticker      TEXT NOT NULL,
    fiscal_year INTEGER NOT NULL,
    quarter     INTEGER NOT NULL,
    recorded_at TEXT NOT NULL,
    PRIMARY KEY (ticker, fiscal_year, quarter)
);

CREATE TABLE IF NOT EXISTS evaluations (
    id                   TEXT PRIMARY KEY,
    ticker               TEXT NOT NULL,
    decided_at           TEXT NOT NULL,
    final_recommendation TEXT NOT NULL,
    degraded             INTEGER NOT NULL,
    evaluation_json      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_evaluations_ticker ON evaluations(ticker, decided_at);
";

/// Tables of the portfolio ledger. Amounts are stored as decimal strings.
///
/// `proposal_id` is unique so an approved proposal can reach the trade log
/// at most once.
pub const LEDGER_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS trades_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    proposal_id TEXT NOT NULL UNIQUE,
    ticker      TEXT NOT NULL,
    action      TEXT NOT NULL,
    quantity    TEXT NOT NULL,
    price       TEXT NOT NULL,
    cash_delta  TEXT NOT NULL,
    executed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trades_ticker ON trades_log(ticker);

CREATE TABLE IF NOT EXISTS cash_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    kind        TEXT NOT NULL,
    amount      TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
";

/// A raw chunk row as read from SQLite.
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub chunk_id: String,
    pub ticker: String,
    pub fiscal_year: i32,
    pub quarter: u8,
    pub text: String,
}

/// Cash log entry kinds.
pub mod cash_kinds {
    pub const DEPOSIT: &str = "deposit";
    pub const WITHDRAW: &str = "withdraw";
    pub const TRADE: &str = "trade";
}
