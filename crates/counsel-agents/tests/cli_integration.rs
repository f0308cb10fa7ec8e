//! Tests that call the real `claude` CLI.
//!
//! Ignored by default. They need the CLI on PATH and valid credentials:
//! ```bash
//! cargo test -p counsel-agents --test cli_integration -- --ignored
//! ```

use std::time::Duration;

use counsel_agents::claude_cli::{check_cli_available, invoke_claude, ClaudeCliConfig};
use counsel_agents::parser::{extract_json, validate_output};
use counsel_agents::{AnalysisAgent, ClaudeAnalyst};
use counsel_models::{AnalysisRequest, QuarterId, RetrievedChunk};
use uuid::Uuid;

#[tokio::test]
#[ignore]
async fn cli_is_available() {
    assert!(check_cli_available().await, "claude CLI not found on PATH");
}

#[tokio::test]
#[ignore]
async fn cli_output_is_parseable_json() {
    if !check_cli_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let config = ClaudeCliConfig {
        model: "claude-haiku-4-5".to_string(),
        timeout: Duration::from_secs(60),
    };
    let raw = invoke_claude(
        "Respond ONLY with a JSON object with a single field \"status\" set to \"ok\".",
        "ping",
        &config,
    )
    .await
    .expect("claude invocation failed");

    let json = extract_json(&raw).unwrap_or_else(|e| panic!("{e}\nRaw output:\n{raw}"));
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["status"], "ok");
}

#[tokio::test]
#[ignore]
async fn analyst_returns_a_valid_verdict() {
    if !check_cli_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let analyst = ClaudeAnalyst::new(
        "socrates".to_string(),
        Some("revenue and margins".to_string()),
        "claude-haiku-4-5".to_string(),
        Duration::from_secs(120),
    );
    let request = AnalysisRequest {
        request_id: Uuid::new_v4(),
        ticker: "AAPL".to_string(),
        query: "financial strength and earnings revenue growth".to_string(),
        chunks: vec![RetrievedChunk {
            chunk_id: "aapl-q3".to_string(),
            ticker: "AAPL".to_string(),
            quarter: QuarterId::new("AAPL", 2025, 3),
            text: "Total net sales were 94.0 billion, up 10 percent. Services revenue \
                   reached an all-time high of 27.4 billion."
                .to_string(),
            relevance_score: 1.0,
        }],
        price_context: None,
        guaranteed_context: true,
        peer_positions: Vec::new(),
    };

    let output = analyst.analyze(&request).await.expect("analysis failed");
    let verdict = validate_output("socrates", "AAPL", &output).expect("invalid output");
    assert!(verdict.valid);
}

#[tokio::test]
#[ignore]
async fn invalid_model_is_reported() {
    if !check_cli_available().await {
        eprintln!("Skipping: claude CLI not available");
        return;
    }

    let config = ClaudeCliConfig {
        model: "nonexistent-model-12345".to_string(),
        timeout: Duration::from_secs(30),
    };
    assert!(invoke_claude("You are a test.", "hello", &config).await.is_err());
}
