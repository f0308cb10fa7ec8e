use counsel_models::{AnalysisRequest, PeerPosition, PriceContext, RetrievedChunk};

const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Render retrieved chunks as labelled passages, in plan order.
pub fn format_chunks(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return "No filing excerpts were found.".to_string();
    }
    chunks
        .iter()
        .map(|c| format!("{}\n{}", c.quarter, c.text.trim()))
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR)
}

pub fn format_price(price: Option<&PriceContext>) -> String {
    let Some(p) = price else {
        return "No market price data available.".to_string();
    };
    let mut lines = Vec::new();
    if let Some(last) = p.last_price {
        lines.push(format!("- Last price: {last}"));
    }
    match (p.low, p.high) {
        (Some(low), Some(high)) => lines.push(format!("- Recent range: {low} to {high}")),
        (Some(low), None) => lines.push(format!("- Recent low: {low}")),
        (None, Some(high)) => lines.push(format!("- Recent high: {high}")),
        (None, None) => {}
    }
    if let Some(pe) = p.pe_ratio {
        lines.push(format!("- Price to earnings: {pe}"));
    }
    if lines.is_empty() {
        return "No market price data available.".to_string();
    }
    lines.join("\n")
}

/// Other analysts' standing verdicts, one bullet each.
pub fn format_peers(peers: &[PeerPosition]) -> String {
    peers
        .iter()
        .map(|p| format!("- {} ({}): {}", p.agent_id, p.recommendation, p.rationale.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The user prompt for one analyst: question, filings, then market data.
/// Follow-up rounds add the other analysts' positions at the end.
pub fn build_user_prompt(request: &AnalysisRequest) -> String {
    let coverage = if request.guaranteed_context {
        "Excerpts from the most recent quarters come first."
    } else {
        "No quarter coverage was guaranteed; excerpts are ranked by relevance only."
    };
    let mut prompt = format!(
        "## Company\n{ticker}\n\n## Question\n{query}\n\n## Filing excerpts\n{coverage}\n\n{chunks}\n\n## Market data\n{price}",
        ticker = request.ticker,
        query = request.query,
        chunks = format_chunks(&request.chunks),
        price = format_price(request.price_context.as_ref()),
    );
    if !request.peer_positions.is_empty() {
        prompt.push_str(&format!(
            "\n\n## Other analysts\nThe counsel disagreed. Weigh these positions against the \
             excerpts, then keep or change your recommendation and say why.\n{}",
            format_peers(&request.peer_positions)
        ));
    }
    prompt
}
