use counsel_models::{normalize_ticker, Evaluation};
use tracing::info;

use crate::error::StoreError;
use crate::sqlite::{lock, SharedStore};

/// Past consensus runs, so a ticker that was already researched can be
/// answered without dispatching the analysts again.
pub struct EvaluationLog {
    store: SharedStore,
}

impl EvaluationLog {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn save(&self, evaluation: &Evaluation) -> Result<(), StoreError> {
        lock(&self.store)?.save_evaluation(evaluation)?;
        info!(
            ticker = %evaluation.ticker,
            recommendation = %evaluation.consensus.final_recommendation,
            "Evaluation saved"
        );
        Ok(())
    }

    pub fn latest(&self, ticker: &str) -> Result<Option<Evaluation>, StoreError> {
        lock(&self.store)?.latest_evaluation(&normalize_ticker(ticker))
    }
}
