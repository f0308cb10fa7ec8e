pub mod document_index;
pub mod error;
pub mod evaluations;
pub mod ingest;
pub mod memory;
pub mod quarters;
pub mod sqlite;

pub use document_index::{DocumentIndex, SqliteDocumentIndex};
pub use error::StoreError;
pub use evaluations::EvaluationLog;
pub use ingest::{IngestReport, Ingestor};
pub use quarters::TickerQuarterIndex;
pub use sqlite::{SharedStore, SqliteStore};
