//! Normalizes the upstream completion body into plain text plus a finish reason.
//!
//! Three shapes are understood: chat completions (`choices[0].message.content`
//! as a string or a list of parts), legacy completions (`choices[0].text`) and
//! candidate-style bodies (`candidates[0].content.parts[].text`). Anything else
//! degrades to empty text; extraction never fails a request.

use crate::request::is_truthy;
use serde_json::Value;

pub const DEFAULT_FINISH_REASON: &str = "stop";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub finish_reason: String,
}

/// The single upstream outcome of a request, fixed once produced.
#[derive(Debug, Clone)]
pub struct UpstreamResult {
    pub completion_text: String,
    pub finish_reason: String,
    /// Upstream `model` field, or the requested model when absent or falsy.
    pub model_echo: Value,
    pub raw_body: Value,
}

impl UpstreamResult {
    pub fn from_body(raw_body: Value, requested_model: &Value) -> Self {
        let Extracted {
            text,
            finish_reason,
        } = extract(&raw_body);
        let model_echo = raw_body
            .get("model")
            .filter(|m| is_truthy(m))
            .unwrap_or(requested_model)
            .clone();
        Self {
            completion_text: text,
            finish_reason,
            model_echo,
            raw_body,
        }
    }
}

pub fn extract(raw: &Value) -> Extracted {
    Extracted {
        text: extract_text(raw),
        finish_reason: extract_finish_reason(raw),
    }
}

fn extract_text(raw: &Value) -> String {
    let choice = raw.get("choices").and_then(|c| c.get(0));

    if let Some(content) = choice
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
    {
        match content {
            Value::String(s) => return s.clone(),
            Value::Array(parts) => return parts.iter().map(chat_part_text).collect(),
            _ => {}
        }
    }

    if let Some(text) = choice.and_then(|c| c.get("text")).and_then(|t| t.as_str()) {
        return text.to_string();
    }

    if let Some(parts) = raw
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
    {
        return parts
            .iter()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();
    }

    String::new()
}

/// A chat content part is either a bare string or an object carrying `text`
/// (preferred when non-empty) or `content`.
fn chat_part_text(part: &Value) -> &str {
    if let Some(s) = part.as_str() {
        return s;
    }
    let non_empty = |key: &str| {
        part.get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    };
    non_empty("text").or_else(|| non_empty("content")).unwrap_or("")
}

fn extract_finish_reason(raw: &Value) -> String {
    let from_choice = raw
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("finish_reason"))
        .and_then(|r| r.as_str())
        .filter(|r| !r.is_empty())
        .map(str::to_string);
    let from_candidate = || {
        raw.get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("finishReason"))
            .and_then(|r| r.as_str())
            .filter(|r| !r.is_empty())
            .map(str::to_lowercase)
    };
    from_choice
        .or_else(from_candidate)
        .unwrap_or_else(|| DEFAULT_FINISH_REASON.to_string())
}
