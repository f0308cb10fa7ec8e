use counsel_models::{normalize_ticker, AgentVerdict, AnalystOutput, Recommendation};
use rust_decimal::Decimal;

use crate::error::AgentError;

/// Pull the first JSON object out of a model reply.
///
/// Accepts a bare object, an object inside a fenced code block, or an object
/// preceded by prose.
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    let candidates = [
        Some(trimmed.to_string()).filter(|t| t.starts_with('{')),
        fenced_block(trimmed),
        first_balanced_object(trimmed),
    ];
    for candidate in candidates.into_iter().flatten() {
        if serde_json::from_str::<serde_json::Value>(&candidate).is_ok_and(|v| v.is_object()) {
            return Ok(candidate);
        }
    }

    Err(AgentError::Parse(format!(
        "No valid JSON object found in response (length={})",
        text.len()
    )))
}

/// Contents of the first ``` fence, with an optional language tag dropped.
fn fenced_block(text: &str) -> Option<String> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim().to_string())
}

/// First `{ ... }` span whose braces balance, ignoring braces in strings.
fn first_balanced_object(text: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| text[s..=i].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse an analyst reply into the loose wire shape.
pub fn parse_analyst_output(raw: &str) -> Result<AnalystOutput, AgentError> {
    let json = extract_json(raw)?;
    serde_json::from_str(&json)
        .map_err(|e| AgentError::Parse(format!("Failed to parse analyst output: {e}\nJSON: {json}")))
}

/// Check an analyst's output against the request it answered and turn it
/// into a voting verdict. The error string explains the first violation.
pub fn validate_output(
    agent_id: &str,
    ticker: &str,
    output: &AnalystOutput,
) -> Result<AgentVerdict, String> {
    let recommendation: Recommendation = output
        .recommendation
        .as_deref()
        .ok_or_else(|| "missing recommendation".to_string())?
        .parse()?;

    let rationale = output
        .rationale
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| "missing rationale".to_string())?;

    if let Some(stock) = output.stock.as_deref().filter(|s| !s.trim().is_empty()) {
        if normalize_ticker(stock) != normalize_ticker(ticker) {
            return Err(format!("answered for {stock} instead of {ticker}"));
        }
    }

    if let Some(c) = output.confidence {
        if c < Decimal::ZERO || c > Decimal::ONE {
            return Err(format!("confidence {c} outside [0, 1]"));
        }
    }

    Ok(AgentVerdict::valid(
        agent_id,
        recommendation,
        rationale,
        output.confidence,
    ))
}
