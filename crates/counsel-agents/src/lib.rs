pub mod analyst;
pub mod claude_cli;
pub mod consensus;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod parser;
pub mod price;
pub mod prompts;
pub mod retrieval;

pub mod test_support;

pub use analyst::{AnalysisAgent, ClaudeAnalyst};
pub use consensus::ConsensusAggregator;
pub use error::AgentError;
pub use orchestrator::Counsel;
pub use price::{PriceFeed, StubPriceFeed};
pub use retrieval::RetrievalPlanner;
