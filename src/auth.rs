use crate::config::ProxyConfig;
use crate::error::{AppError, AppResult};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

/// Returns the bearer token from the `Authorization` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

/// Picks the credential forwarded upstream.
///
/// The server refuses to operate without a configured fallback key, even when
/// the client supplies its own. A client key always wins over the fallback;
/// the fallback is only used when `ALLOW_ENV_API_KEY` permits it.
pub fn resolve_credential(headers: &HeaderMap, config: &ProxyConfig) -> AppResult<String> {
    let Some(fallback) = config.fallback_api_key.as_deref() else {
        return Err(AppError::server(
            "missing_api_key",
            "OPENAI_API_KEY environment variable is not set",
        ));
    };
    match bearer_token(headers) {
        Some(token) => Ok(token.to_string()),
        None if config.allow_env_key_fallback => Ok(fallback.to_string()),
        None => Err(AppError::unauthorized("Missing Authorization header")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    fn config(fallback: Option<&str>, allow: bool) -> ProxyConfig {
        ProxyConfig {
            fallback_api_key: fallback.map(str::to_string),
            allow_env_key_fallback: allow,
            ..ProxyConfig::default()
        }
    }

    fn with_auth(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn header_key_wins_over_fallback() {
        let cred = resolve_credential(&with_auth("Bearer sk-client"), &config(Some("sk-env"), true));
        assert_eq!(cred.unwrap(), "sk-client");
    }

    #[test]
    fn fallback_used_only_when_allowed() {
        let headers = HeaderMap::new();
        assert_eq!(
            resolve_credential(&headers, &config(Some("sk-env"), true)).unwrap(),
            "sk-env"
        );
        let err = resolve_credential(&headers, &config(Some("sk-env"), false)).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_type, "unauthorized");
    }

    #[test]
    fn missing_fallback_is_a_server_error() {
        let err = resolve_credential(&with_auth("Bearer sk-client"), &config(None, true)).unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.error_type, "server_error");
    }

    #[test]
    fn non_bearer_or_empty_header_is_ignored() {
        assert_eq!(bearer_token(&with_auth("Basic abc")), None);
        assert_eq!(bearer_token(&with_auth("Bearer ")), None);
    }
}
