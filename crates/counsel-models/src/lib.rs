pub mod agent_message;
pub mod chunk;
pub mod config;
pub mod portfolio;
pub mod quarter;
pub mod store_schema;
pub mod trade;
pub mod verdict;

pub use agent_message::{AnalysisRequest, AnalystOutput, PeerPosition, PriceContext};
pub use chunk::{ChunkFilter, NewChunk, RetrievalPlan, RetrievedChunk};
pub use config::{
    AgentsConfig, AnalystConfig, CounselConfig, PriceFeedConfig, RetrievalConfig, StoreConfig,
    TradeConfig,
};
pub use portfolio::{PortfolioSnapshot, Position, TradeRecord};
pub use quarter::{normalize_ticker, QuarterId};
pub use trade::{
    ApprovalDecision, ApprovalPrompt, ProposalState, RejectionReason, TradeAction, TradeOrder,
    TradeProposal,
};
pub use verdict::{
    AgentVerdict, Agreement, AgreementLevel, ConsensusResult, DebateLevel, DebateRecord,
    Evaluation, PositionChange, Recommendation, VoteTally,
};
