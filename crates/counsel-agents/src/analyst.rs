use std::time::Duration;

use async_trait::async_trait;
use counsel_models::{AnalysisRequest, AnalystConfig, AnalystOutput};

use crate::claude_cli::{invoke_claude, ClaudeCliConfig};
use crate::context::build_user_prompt;
use crate::error::AgentError;
use crate::parser::parse_analyst_output;
use crate::prompts::analyst_system_prompt;

/// One member of the counsel. Mockable for testing.
#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    fn id(&self) -> &str;

    /// Topic appended to the retrieval query for this analyst.
    fn focus(&self) -> Option<&str> {
        None
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalystOutput, AgentError>;
}

/// An analyst backed by the Claude CLI.
pub struct ClaudeAnalyst {
    pub id: String,
    pub focus: Option<String>,
    pub cli_config: ClaudeCliConfig,
}

impl ClaudeAnalyst {
    pub fn new(id: String, focus: Option<String>, model: String, timeout: Duration) -> Self {
        Self {
            id,
            focus,
            cli_config: ClaudeCliConfig { model, timeout },
        }
    }

    pub fn from_config(config: &AnalystConfig, default_model: &str, timeout: Duration) -> Self {
        Self::new(
            config.name.clone(),
            config.focus.clone(),
            config
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            timeout,
        )
    }
}

#[async_trait]
impl AnalysisAgent for ClaudeAnalyst {
    fn id(&self) -> &str {
        &self.id
    }

    fn focus(&self) -> Option<&str> {
        self.focus.as_deref()
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalystOutput, AgentError> {
        let system_prompt = analyst_system_prompt(&self.id, self.focus());
        let user_prompt = build_user_prompt(request);
        let raw = invoke_claude(&system_prompt, &user_prompt, &self.cli_config).await?;
        parse_analyst_output(&raw)
    }
}
