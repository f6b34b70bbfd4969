use crate::config::ProxyConfig;
use crate::error::{AppError, AppResult};
use crate::upstream::{ChatUpstream, HttpUpstream};
use axum::Router;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderName};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::{Arc, Once, OnceLock};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub upstream: Arc<dyn ChatUpstream>,
    pub metrics: PrometheusHandle,
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_ERROR: OnceLock<AppError> = OnceLock::new();
static METRICS_INIT: Once = Once::new();

pub fn load_state() -> AppResult<AppState> {
    load_state_with_config(ProxyConfig::from_env())
}

pub fn load_state_with_config(config: ProxyConfig) -> AppResult<AppState> {
    let upstream = HttpUpstream::from_config(&config)?;
    state_with_upstream(config, Arc::new(upstream))
}

/// State around a caller-supplied upstream; tests plug in mocks here.
pub fn state_with_upstream(
    config: ProxyConfig,
    upstream: Arc<dyn ChatUpstream>,
) -> AppResult<AppState> {
    let metrics = init_metrics()?;
    tracing::info!(
        upstream = %config.upstream_base_url,
        has_fallback_key = config.fallback_api_key.is_some(),
        allow_env_key_fallback = config.allow_env_key_fallback,
        heartbeat_interval_ms = config.stream.heartbeat_interval_ms,
        chunk_target_length = config.stream.chunk_target_length,
        "proxy configured"
    );
    Ok(AppState {
        config: Arc::new(config),
        upstream,
        metrics,
    })
}

fn init_metrics() -> AppResult<PrometheusHandle> {
    METRICS_INIT.call_once(|| {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(err) => {
                let _ = METRICS_ERROR.set(AppError::server("metrics_init_failed", err.to_string()));
            }
        }
    });

    if let Some(err) = METRICS_ERROR.get() {
        return Err(err.clone());
    }
    METRICS_HANDLE
        .get()
        .cloned()
        .ok_or_else(|| AppError::server("metrics_init_failed", "metrics recorder not available"))
}

pub fn build_app(state: AppState) -> Router {
    let api_router = build_api_router(&state.config.metrics_path);
    let cors = cors_layer(&state.config.cors_allow_origin);
    Router::<AppState>::new()
        .merge(api_router.clone())
        .nest("/api", api_router)
        .fallback(crate::handlers::fallback)
        .with_state(state)
        .layer(cors)
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(TraceLayer::new_for_http())
}

fn build_api_router(metrics_path: &str) -> Router<AppState> {
    use crate::handlers::{chat, list_models, method_not_allowed, metrics, preflight, status};
    Router::new()
        .route("/chat", post(chat).options(preflight))
        .route("/v1/chat/completions", post(chat).options(preflight))
        .route("/models", get(list_models).options(preflight))
        .route("/v1/models", get(list_models).options(preflight))
        .route("/status", get(status).options(preflight))
        .route(metrics_path, get(metrics))
        .method_not_allowed_fallback(method_not_allowed)
}

fn cors_layer(allow_origin: &str) -> CorsLayer {
    let origin = if allow_origin == "*" {
        AllowOrigin::any()
    } else {
        match HeaderValue::from_str(allow_origin) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                tracing::warn!(origin = %allow_origin, "invalid CORS_ALLOW_ORIGIN, allowing any origin");
                AllowOrigin::any()
            }
        }
    };
    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
}

/// Parses the configured listen address.
pub fn listen_addr(config: &ProxyConfig) -> AppResult<std::net::SocketAddr> {
    config.listen.parse().map_err(|err: std::net::AddrParseError| {
        AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "listen_invalid", err.to_string())
    })
}
