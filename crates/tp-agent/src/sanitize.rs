use crate::error::AgentError;
use tp_core::types::{CodeChange, WireChange};

/// Strips a surrounding markdown fence and narrows the text to the outermost
/// JSON array when the generator wrapped it in prose.
pub fn sanitize_response(raw: &str) -> &str {
    let mut text = raw.trim();
    for fence in ["```json", "```JSON", "```"] {
        if let Some(rest) = text.strip_prefix(fence) {
            text = rest;
            break;
        }
    }
    text = text.strip_suffix("```").unwrap_or(text).trim();

    match (text.find('['), text.rfind(']')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    }
}

pub fn parse_changes(raw: &str) -> Result<Vec<CodeChange>, AgentError> {
    let wire: Vec<WireChange> = serde_json::from_str(sanitize_response(raw))
        .map_err(|source| AgentError::Parse { source })?;
    wire.into_iter()
        .map(|change| change.decode().map_err(AgentError::from))
        .collect()
}
