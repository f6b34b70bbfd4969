use pseudostream::config::{ProxyConfig, StreamConfig};
use std::collections::HashMap;
use std::time::Duration;

fn config_from(pairs: &[(&str, &str)]) -> ProxyConfig {
    let env: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ProxyConfig::from_lookup(|key| env.get(key).cloned())
}

#[test]
fn empty_environment_yields_defaults() {
    let config = config_from(&[]);
    assert_eq!(config.listen, "0.0.0.0:8080");
    assert_eq!(config.metrics_path, "/metrics");
    assert_eq!(config.upstream_base_url, "https://api.openai.com");
    assert_eq!(config.fallback_api_key, None);
    assert!(!config.allow_env_key_fallback);
    assert_eq!(config.upstream_timeout(), Duration::from_secs(120));
    assert!(config.extra_headers.is_empty());
    assert_eq!(config.cors_allow_origin, "*");
    assert_eq!(config.stream, StreamConfig::default());
    assert_eq!(config.stream.heartbeat_interval(), Duration::from_millis(3_000));
    assert_eq!(config.stream.chunk_target_length, 30);
    assert_eq!(config.stream.chunk_delay(), Duration::from_millis(35));
}

#[test]
fn environment_values_override_defaults() {
    let config = config_from(&[
        ("PSEUDOSTREAM_LISTEN", "127.0.0.1:9000"),
        ("PSEUDOSTREAM_METRICS_PATH", "internal/metrics"),
        ("SOURCE_API_URL", "https://llm.internal/v1"),
        ("OPENAI_API_KEY", "sk-env"),
        ("ALLOW_ENV_API_KEY", "true"),
        ("HEARTBEAT_INTERVAL_MS", "1500"),
        ("CHUNK_TARGET_LENGTH", "12"),
        ("CHUNK_DELAY_MS", "50"),
        ("UPSTREAM_TIMEOUT_MS", "2500"),
        ("UPSTREAM_EXTRA_HEADERS_JSON", r#"{"x-org":"acme"}"#),
        ("CORS_ALLOW_ORIGIN", "https://app.example"),
    ]);
    assert_eq!(config.listen, "127.0.0.1:9000");
    assert_eq!(config.metrics_path, "/internal/metrics");
    assert_eq!(config.upstream_base_url, "https://llm.internal/v1");
    assert_eq!(config.fallback_api_key.as_deref(), Some("sk-env"));
    assert!(config.allow_env_key_fallback);
    assert_eq!(
        config.stream,
        StreamConfig {
            heartbeat_interval_ms: 1_500,
            chunk_target_length: 12,
            chunk_delay_ms: 50,
        }
    );
    assert_eq!(config.upstream_timeout(), Duration::from_millis(2_500));
    assert_eq!(
        config.extra_headers,
        vec![("x-org".to_string(), "acme".to_string())]
    );
    assert_eq!(config.cors_allow_origin, "https://app.example");
}

#[test]
fn blank_and_malformed_values_fall_back() {
    let config = config_from(&[
        ("OPENAI_API_KEY", "   "),
        ("ALLOW_ENV_API_KEY", "yes"),
        ("HEARTBEAT_INTERVAL_MS", "soon"),
        ("CHUNK_TARGET_LENGTH", "-4"),
        ("UPSTREAM_EXTRA_HEADERS_JSON", "{broken"),
        ("PSEUDOSTREAM_LISTEN", ""),
    ]);
    assert_eq!(config.fallback_api_key, None);
    assert!(!config.allow_env_key_fallback);
    assert_eq!(config.stream.heartbeat_interval_ms, 3_000);
    assert_eq!(config.stream.chunk_target_length, 30);
    assert!(config.extra_headers.is_empty());
    assert_eq!(config.listen, "0.0.0.0:8080");
}

#[test]
fn pacing_values_are_bounded() {
    let config = config_from(&[
        ("HEARTBEAT_INTERVAL_MS", "0"),
        ("CHUNK_TARGET_LENGTH", "0"),
        ("CHUNK_DELAY_MS", "1"),
    ]);
    assert_eq!(config.stream.heartbeat_interval_ms, 1);
    assert_eq!(config.stream.chunk_target_length, 1);
    assert_eq!(config.stream.chunk_delay_ms, 10);

    let config = config_from(&[("CHUNK_DELAY_MS", "10000")]);
    assert_eq!(config.stream.chunk_delay(), Duration::from_millis(120));
}

#[test]
fn invalid_listen_address_is_reported() {
    let config = config_from(&[("PSEUDOSTREAM_LISTEN", "not-an-address")]);
    let err = pseudostream::app::listen_addr(&config).unwrap_err();
    assert_eq!(err.code, "listen_invalid");
}
