use crate::config::ProxyConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamErrorKind {
    Network,
    Timeout,
    Http,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamCallError {
    pub kind: UpstreamErrorKind,
    pub status: Option<StatusCode>,
    /// Upstream error body, when it was valid JSON.
    pub body: Option<Value>,
    pub message: String,
}

impl UpstreamCallError {
    pub fn new(kind: UpstreamErrorKind, status: Option<StatusCode>, message: String) -> Self {
        Self {
            kind,
            status,
            body: None,
            message,
        }
    }

    pub fn with_body(mut self, body: Option<Value>) -> Self {
        self.body = body;
        self
    }

    /// `error.message` from the upstream body.
    pub fn upstream_message(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.get("error"))
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .filter(|m| !m.is_empty())
    }

    /// `error.type` from the upstream body.
    pub fn upstream_type(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.get("error"))
            .and_then(|e| e.get("type"))
            .and_then(|t| t.as_str())
            .filter(|t| !t.is_empty())
    }

    /// Relays the failure on a non-streaming route: upstream status (500 when
    /// there was none) with the upstream JSON body, or a generic body carrying
    /// `fallback_message` when upstream sent nothing usable.
    pub fn passthrough_response(&self, fallback_message: &str) -> Response {
        let status = self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = self.body.clone().unwrap_or_else(|| {
            serde_json::json!({ "error": { "message": fallback_message, "type": "server_error" } })
        });
        (status, Json(body)).into_response()
    }
}

/// The backing provider. Always called in blocking (non-streaming) mode.
#[async_trait]
pub trait ChatUpstream: Send + Sync {
    async fn complete(&self, credential: &str, body: &Value) -> Result<Value, UpstreamCallError>;

    async fn list_models(&self, credential: &str) -> Result<Value, UpstreamCallError>;
}

pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: String,
    extra_headers: HeaderMap,
    timeout: Duration,
}

impl HttpUpstream {
    pub fn new(client: reqwest::Client, config: &ProxyConfig) -> Self {
        Self {
            client,
            base_url: config.upstream_base_url.clone(),
            extra_headers: build_extra_headers(&config.extra_headers),
            timeout: config.upstream_timeout(),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pseudostream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| AppError::server("http_client_init_failed", err.to_string()))?;
        Ok(Self::new(client, config))
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<Value, UpstreamCallError> {
        let resp = req
            .timeout(self.timeout)
            .headers(self.extra_headers.clone())
            .send()
            .await
            .map_err(network_error)?;
        let status = resp.status();
        let text = resp.text().await.map_err(|err| {
            UpstreamCallError::new(UpstreamErrorKind::Network, Some(status), err.to_string())
        })?;
        if !status.is_success() {
            return Err(UpstreamCallError::new(
                UpstreamErrorKind::Http,
                Some(status),
                format!("upstream status {status}"),
            )
            .with_body(serde_json::from_str(&text).ok()));
        }
        serde_json::from_str(&text).map_err(|err| {
            UpstreamCallError::new(
                UpstreamErrorKind::Http,
                None,
                format!("upstream returned invalid JSON: {err}"),
            )
        })
    }
}

#[async_trait]
impl ChatUpstream for HttpUpstream {
    async fn complete(&self, credential: &str, body: &Value) -> Result<Value, UpstreamCallError> {
        let url = join_url(&self.base_url, "/v1/chat/completions");
        self.send(self.client.post(url).bearer_auth(credential).json(body))
            .await
    }

    async fn list_models(&self, credential: &str) -> Result<Value, UpstreamCallError> {
        let url = join_url(&self.base_url, "/v1/models");
        self.send(self.client.get(url).bearer_auth(credential)).await
    }
}

fn network_error(err: reqwest::Error) -> UpstreamCallError {
    let kind = if err.is_timeout() {
        UpstreamErrorKind::Timeout
    } else {
        UpstreamErrorKind::Network
    };
    UpstreamCallError::new(kind, None, err.to_string())
}

fn build_extra_headers(pairs: &[(String, String)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "skipping invalid extra upstream header"),
        }
    }
    headers
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let mut path = path.trim_start_matches('/');
    if base.ends_with("/v1") {
        if path == "v1" {
            path = "";
        } else if let Some(stripped) = path.strip_prefix("v1/") {
            path = stripped;
        }
    }
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path)
    }
}
