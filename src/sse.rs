//! Event-stream wire framing.

use serde_json::Value;

/// Keep-alive comment frame. Event-stream clients ignore it.
pub const HEARTBEAT_FRAME: &str = ": \n\n";

/// Literal payload of the final frame of a successful stream.
pub const DONE_SENTINEL: &str = "[DONE]";

pub const CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Written verbatim; only used for the `[DONE]` sentinel.
    Literal(String),
    Json(Value),
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Literal(value.to_string())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

/// Encodes one `data:` frame. JSON string escaping keeps embedded newlines
/// from breaking the framing.
pub fn encode(payload: &Payload) -> String {
    match payload {
        Payload::Literal(text) => format!("data: {text}\n\n"),
        Payload::Json(value) => format!("data: {value}\n\n"),
    }
}
