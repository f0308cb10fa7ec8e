use serde::{Deserialize, Serialize};

use crate::quarter::{normalize_ticker, QuarterId};

/// A passage of filing text returned by the document index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub ticker: String,
    pub quarter: QuarterId,
    pub text: String,
    /// Higher is more relevant. Only comparable within one query.
    pub relevance_score: f64,
}

/// Filter for a document index query. The ticker cannot be omitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkFilter {
    pub ticker: String,
    pub quarter: Option<QuarterId>,
}

impl ChunkFilter {
    pub fn ticker(ticker: &str) -> Self {
        Self {
            ticker: normalize_ticker(ticker),
            quarter: None,
        }
    }

    pub fn quarter(quarter: &QuarterId) -> Self {
        Self {
            ticker: quarter.ticker.clone(),
            quarter: Some(quarter.clone()),
        }
    }

    /// True when the chunk satisfies every constraint of this filter.
    pub fn admits(&self, chunk: &RetrievedChunk) -> bool {
        if chunk.ticker != self.ticker || chunk.quarter.ticker != self.ticker {
            return false;
        }
        match &self.quarter {
            Some(q) => chunk.quarter == *q,
            None => true,
        }
    }
}

/// Already-chunked filing text handed to ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewChunk {
    /// Derived from ticker, quarter and text when absent.
    #[serde(default)]
    pub chunk_id: Option<String>,
    pub ticker: String,
    pub fiscal_year: i32,
    pub quarter: u8,
    pub text: String,
}

impl NewChunk {
    pub fn quarter_id(&self) -> QuarterId {
        QuarterId::new(&self.ticker, self.fiscal_year, self.quarter)
    }
}

/// Output of the retrieval planner for one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalPlan {
    pub ticker: String,
    pub chunks: Vec<RetrievedChunk>,
    /// False when the ticker had no indexed quarters and the plan is purely
    /// relevance-ranked.
    pub guaranteed_context: bool,
}

impl RetrievalPlan {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }
}
