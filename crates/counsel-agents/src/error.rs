use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("No data available for {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("{what} timed out after {seconds} seconds")]
    UpstreamTimeout { what: String, seconds: u64 },

    #[error("Claude CLI error: {0}")]
    Cli(String),

    #[error("Agent response parse error: {0}")]
    Parse(String),

    #[error("Store error: {0}")]
    Store(#[from] counsel_store::StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
