use crate::error::{AppError, AppResult};
use serde_json::{Map, Value, json};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// A client chat request. `messages` entries are opaque and forwarded as-is;
/// every field not named here lands in `extra` and is passed through.
///
/// Named fields keep whatever JSON the client sent. Defaults apply only to
/// keys that are absent.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: Value,
    pub messages: Vec<Value>,
    pub temperature: Value,
    /// Present whenever the client sent the key, `null` included.
    pub max_tokens: Option<Value>,
    pub stream: bool,
    pub extra: Map<String, Value>,
}

impl CompletionRequest {
    /// Splits a raw body into the named fields and the passthrough remainder.
    /// A non-object body is treated like an empty one.
    pub fn from_value(body: Value) -> AppResult<Self> {
        let mut obj = match body {
            Value::Object(obj) => obj,
            _ => Map::new(),
        };

        let messages = match obj.remove("messages") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(AppError::validation(
                    "invalid_messages",
                    "messages is required and must be an array",
                )
                .with_param("messages"));
            }
        };

        let model = obj
            .remove("model")
            .unwrap_or_else(|| json!(DEFAULT_MODEL));
        let temperature = obj
            .remove("temperature")
            .unwrap_or_else(|| json!(DEFAULT_TEMPERATURE));
        let max_tokens = obj.remove("max_tokens");
        let stream = obj.remove("stream").is_some_and(|v| is_truthy(&v));

        Ok(Self {
            model,
            messages,
            temperature,
            max_tokens,
            stream,
            extra: obj,
        })
    }

    /// Body sent upstream. `stream` is always `false`: the upstream call is
    /// blocking no matter what the client asked for.
    pub fn upstream_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), self.model.clone());
        body.insert("messages".to_string(), Value::Array(self.messages.clone()));
        body.insert("temperature".to_string(), self.temperature.clone());
        for (key, value) in &self.extra {
            body.insert(key.clone(), value.clone());
        }
        body.insert("stream".to_string(), Value::Bool(false));
        if let Some(max_tokens) = &self.max_tokens {
            body.insert("max_tokens".to_string(), max_tokens.clone());
        }
        Value::Object(body)
    }
}

/// JavaScript-style truthiness: `"stream": "true"` or `1` turns streaming on.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn missing_or_mistyped_messages_is_rejected() {
        for body in [
            json!({ "model": "m" }),
            json!({ "messages": "hi" }),
            json!({ "messages": { "role": "user" } }),
            json!(null),
        ] {
            let err = CompletionRequest::from_value(body).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST);
            assert_eq!(err.error_type, "invalid_request_error");
        }
    }

    #[test]
    fn defaults_apply_when_fields_absent() {
        let req = CompletionRequest::from_value(json!({ "messages": [] })).unwrap();
        assert_eq!(req.model, json!(DEFAULT_MODEL));
        assert_eq!(req.temperature, json!(DEFAULT_TEMPERATURE));
        assert!(!req.stream);
        assert!(req.max_tokens.is_none());
        assert!(req.extra.is_empty());
    }

    #[test]
    fn upstream_body_forces_blocking_and_keeps_extras() {
        let req = CompletionRequest::from_value(json!({
            "model": "gpt-x",
            "messages": [{ "role": "user", "content": "hi" }],
            "temperature": 0.2,
            "stream": true,
            "top_p": 0.9,
            "user": "u-1"
        }))
        .unwrap();
        assert!(req.stream);
        let body = req.upstream_body();
        assert_eq!(
            body,
            json!({
                "model": "gpt-x",
                "messages": [{ "role": "user", "content": "hi" }],
                "temperature": 0.2,
                "stream": false,
                "top_p": 0.9,
                "user": "u-1"
            })
        );
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn max_tokens_forwarded_when_present() {
        let req = CompletionRequest::from_value(json!({
            "messages": [],
            "max_tokens": 64
        }))
        .unwrap();
        assert_eq!(req.upstream_body()["max_tokens"], json!(64));
    }

    #[test]
    fn present_fields_are_forwarded_even_when_null_or_mistyped() {
        let req = CompletionRequest::from_value(json!({
            "messages": [],
            "model": 42,
            "temperature": null,
            "max_tokens": null
        }))
        .unwrap();
        let body = req.upstream_body();
        assert_eq!(body["model"], json!(42));
        assert_eq!(body["temperature"], Value::Null);
        assert_eq!(body.get("max_tokens"), Some(&Value::Null));

        let req = CompletionRequest::from_value(json!({
            "messages": [],
            "model": null,
            "temperature": "warm"
        }))
        .unwrap();
        let body = req.upstream_body();
        assert_eq!(body["model"], Value::Null);
        assert_eq!(body["temperature"], "warm");
    }

    #[test]
    fn stream_flag_follows_truthiness() {
        for (flag, expected) in [
            (json!(true), true),
            (json!("true"), true),
            (json!(1), true),
            (json!({}), true),
            (json!(false), false),
            (json!(0), false),
            (json!(""), false),
            (json!(null), false),
        ] {
            let req = CompletionRequest::from_value(json!({ "messages": [], "stream": flag }))
                .unwrap();
            assert_eq!(req.stream, expected, "{flag}");
            assert_eq!(req.upstream_body()["stream"], json!(false));
        }
    }
}
