use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_CHUNK_TARGET_LENGTH: usize = 30;
pub const DEFAULT_CHUNK_DELAY_MS: u64 = 35;
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 120_000;
pub const MIN_CHUNK_DELAY_MS: u64 = 10;
pub const MAX_CHUNK_DELAY_MS: u64 = 120;

/// Process-level settings, read once at startup.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub listen: String,
    pub metrics_path: String,
    pub upstream_base_url: String,
    /// Credential used when the client sends none and fallback is allowed.
    pub fallback_api_key: Option<String>,
    pub allow_env_key_fallback: bool,
    pub upstream_timeout_ms: u64,
    /// Merged into every upstream call after the bearer credential.
    pub extra_headers: Vec<(String, String)>,
    pub cors_allow_origin: String,
    pub stream: StreamConfig,
}

/// Pacing knobs consumed by the stream synthesis engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub heartbeat_interval_ms: u64,
    pub chunk_target_length: usize,
    pub chunk_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            chunk_target_length: DEFAULT_CHUNK_TARGET_LENGTH,
            chunk_delay_ms: DEFAULT_CHUNK_DELAY_MS,
        }
    }
}

impl StreamConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(
            self.chunk_delay_ms
                .clamp(MIN_CHUNK_DELAY_MS, MAX_CHUNK_DELAY_MS),
        )
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            fallback_api_key: None,
            allow_env_key_fallback: false,
            upstream_timeout_ms: DEFAULT_UPSTREAM_TIMEOUT_MS,
            extra_headers: Vec::new(),
            cors_allow_origin: "*".to_string(),
            stream: StreamConfig::default(),
        }
    }
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let extra_headers = get("UPSTREAM_EXTRA_HEADERS_JSON")
            .map(|raw| parse_extra_headers(&raw))
            .unwrap_or_default();

        Self {
            listen: get("PSEUDOSTREAM_LISTEN").unwrap_or(defaults.listen),
            metrics_path: get("PSEUDOSTREAM_METRICS_PATH")
                .map(|path| normalize_route(path.trim()))
                .unwrap_or(defaults.metrics_path),
            upstream_base_url: get("SOURCE_API_URL").unwrap_or(defaults.upstream_base_url),
            fallback_api_key: get("OPENAI_API_KEY"),
            allow_env_key_fallback: get("ALLOW_ENV_API_KEY")
                .map(|v| is_truthy(&v))
                .unwrap_or(false),
            upstream_timeout_ms: parse_number(get("UPSTREAM_TIMEOUT_MS"))
                .unwrap_or(defaults.upstream_timeout_ms)
                .max(1),
            extra_headers,
            cors_allow_origin: get("CORS_ALLOW_ORIGIN").unwrap_or(defaults.cors_allow_origin),
            stream: StreamConfig {
                heartbeat_interval_ms: parse_number(get("HEARTBEAT_INTERVAL_MS"))
                    .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS)
                    .max(1),
                chunk_target_length: parse_number(get("CHUNK_TARGET_LENGTH"))
                    .map(|v| v as usize)
                    .unwrap_or(DEFAULT_CHUNK_TARGET_LENGTH)
                    .max(1),
                chunk_delay_ms: parse_number(get("CHUNK_DELAY_MS"))
                    .unwrap_or(DEFAULT_CHUNK_DELAY_MS)
                    .clamp(MIN_CHUNK_DELAY_MS, MAX_CHUNK_DELAY_MS),
            },
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }
}

fn normalize_route(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim(), "1" | "true")
}

fn parse_number(raw: Option<String>) -> Option<u64> {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
}

/// Parses a JSON object of header names to values. Anything malformed is
/// dropped with a warning; a bad value never prevents startup.
pub fn parse_extra_headers(raw: &str) -> Vec<(String, String)> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!("ignoring UPSTREAM_EXTRA_HEADERS_JSON: {err}");
            return Vec::new();
        }
    };
    let Some(obj) = value.as_object() else {
        tracing::warn!("ignoring UPSTREAM_EXTRA_HEADERS_JSON: not a JSON object");
        return Vec::new();
    };
    obj.iter()
        .filter_map(|(name, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((name.clone(), rendered))
        })
        .collect()
}
