//! Turning raw model text into typed results.
//!
//! Kept apart from the network call so each step can be exercised on fixed strings.

use crate::processing::claim::{AnswerResult, StructuredExtraction};
use crate::processing::types::ParseError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Strip Markdown code fences and surrounding chatter from a model reply.
///
/// Prefers the contents of the first fenced block. Without fences, a reply that does not start
/// with `{` is narrowed to the span between the first `{` and the last `}`.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        // Skip an info string such as `json` on the opening fence line.
        let body = match after_fence.find('\n') {
            Some(newline) if !after_fence[..newline].trim().contains('{') => {
                &after_fence[newline + 1..]
            }
            _ => after_fence.trim_start_matches("json"),
        };
        let block = match body.find("```") {
            Some(end) => &body[..end],
            None => body,
        };
        return block.trim();
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    let cleaned = strip_code_fences(raw);
    if cleaned.is_empty() {
        return Err(ParseError::Empty);
    }
    let value: Value = serde_json::from_str(cleaned).map_err(ParseError::InvalidJson)?;
    serde_json::from_value(value).map_err(ParseError::UnexpectedShape)
}

/// Parse the structuring reply into `{data, extraction_confidence}`.
pub fn parse_structured_extraction(raw: &str) -> Result<StructuredExtraction, ParseError> {
    parse_json(raw)
}

/// Parse the answering reply into `{answer, answer_confidence}`.
pub fn parse_answer(raw: &str) -> Result<AnswerResult, ParseError> {
    parse_json(raw)
}
