use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::AgentError;

/// Model and deadline for one analyst's `claude` invocations.
#[derive(Debug, Clone)]
pub struct ClaudeCliConfig {
    pub model: String,
    pub timeout: Duration,
}

impl Default for ClaudeCliConfig {
    fn default() -> Self {
        Self {
            model: "claude-haiku-4-5".to_string(),
            timeout: Duration::from_secs(90),
        }
    }
}

/// Run `claude -p` with the given prompts and return stdout.
///
/// The child is killed if the deadline passes or the calling task is
/// dropped, so a cancelled analyst never leaves a process behind.
pub async fn invoke_claude(
    system_prompt: &str,
    user_prompt: &str,
    config: &ClaudeCliConfig,
) -> Result<String, AgentError> {
    debug!(model = %config.model, prompt_bytes = user_prompt.len(), "Invoking claude CLI");

    let child = Command::new("claude")
        .args([
            "-p",
            user_prompt,
            "--system-prompt",
            system_prompt,
            "--model",
            &config.model,
            "--output-format",
            "text",
        ])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(config.timeout, child)
        .await
        .map_err(|_| AgentError::UpstreamTimeout {
            what: format!("claude ({})", config.model),
            seconds: config.timeout.as_secs(),
        })?
        .map_err(|e| AgentError::Cli(format!("Failed to spawn claude: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!(status = %output.status, stderr = %stderr, "Claude CLI failed");
        return Err(AgentError::Cli(format!(
            "claude exited {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if stdout.trim().is_empty() {
        return Err(AgentError::Cli("claude returned an empty response".to_string()));
    }
    Ok(stdout)
}

/// True when a `claude` binary on PATH answers `--version`.
pub async fn check_cli_available() -> bool {
    Command::new("claude")
        .arg("--version")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClaudeCliConfig::default();
        assert_eq!(config.model, "claude-haiku-4-5");
        assert_eq!(config.timeout, Duration::from_secs(90));
    }
}
