use std::collections::BTreeMap;

use async_trait::async_trait;
use counsel_models::{normalize_ticker, PriceContext, PriceFeedConfig};

use crate::error::AgentError;

/// Source of market data shown to analysts next to the filings.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// `Ok(None)` when the feed has nothing for the ticker.
    async fn quote(&self, ticker: &str) -> Result<Option<PriceContext>, AgentError>;
}

/// Serves fixed quotes from configuration.
#[derive(Debug, Clone, Default)]
pub struct StubPriceFeed {
    quotes: BTreeMap<String, PriceContext>,
}

impl StubPriceFeed {
    pub fn new(config: &PriceFeedConfig) -> Self {
        let quotes = config
            .quotes
            .iter()
            .map(|(ticker, quote)| {
                let ticker = normalize_ticker(ticker);
                let mut quote = quote.clone();
                quote.ticker = ticker.clone();
                (ticker, quote)
            })
            .collect();
        Self { quotes }
    }
}

#[async_trait]
impl PriceFeed for StubPriceFeed {
    async fn quote(&self, ticker: &str) -> Result<Option<PriceContext>, AgentError> {
        Ok(self.quotes.get(&normalize_ticker(ticker)).cloned())
    }
}
