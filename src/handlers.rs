use crate::app::AppState;
use crate::auth::resolve_credential;
use crate::engine::{open_stream, relay_blocking};
use crate::error::AppResult;
use crate::request::CompletionRequest;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};

const MODELS_FAILURE_MESSAGE: &str = "Failed to fetch models";

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

/// `POST /chat`: validates, resolves the credential, then either relays the
/// upstream reply or opens a synthesized stream.
pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let request = CompletionRequest::from_value(payload)?;
    let credential = resolve_credential(&headers, &state.config)?;

    let mode = if request.stream { "stream" } else { "blocking" };
    metrics::counter!("pseudostream_requests_total", "mode" => mode).increment(1);
    tracing::debug!(
        model = %request.model,
        messages = request.messages.len(),
        mode,
        "chat request accepted"
    );

    if request.stream {
        return Ok(open_stream(
            state.upstream.clone(),
            credential,
            request,
            state.config.stream,
        ));
    }
    Ok(relay_blocking(state.upstream.as_ref(), &credential, &request).await)
}

/// `GET /models`: upstream model list, passed through.
pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Response> {
    let credential = resolve_credential(&headers, &state.config)?;
    match state.upstream.list_models(&credential).await {
        Ok(body) => Ok(Json(body).into_response()),
        Err(err) => {
            metrics::counter!("pseudostream_upstream_errors_total").increment(1);
            tracing::warn!(status = ?err.status, kind = ?err.kind, "model listing failed: {}", err.message);
            Ok(err.passthrough_response(MODELS_FAILURE_MESSAGE))
        }
    }
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "pseudo-streaming proxy is running",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "features": {
            "streaming": true,
            "non_streaming": true,
            "models": true,
            "cors": true
        },
        "endpoints": {
            "chat": "/api/chat",
            "status": "/api/status",
            "models": "/api/models"
        },
        "environment": {
            "has_api_key": state.config.fallback_api_key.is_some(),
            "source_api_url": state.config.upstream_base_url
        }
    }))
}

/// CORS preflight that reached the router without `Access-Control-Request-Method`.
pub async fn preflight() -> StatusCode {
    StatusCode::OK
}

pub async fn method_not_allowed() -> (StatusCode, Json<Value>) {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
}

pub async fn fallback(method: Method) -> StatusCode {
    if method == Method::OPTIONS {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}
