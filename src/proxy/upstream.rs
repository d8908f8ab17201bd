//! Shared upstream HTTP client (step 9) and the allow-list / request-build
//! logic (step 8).

use reqwest::Client;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::{ProxyError, Result};

pub fn build_client(config: &AppConfig) -> Result<Client> {
    Client::builder()
        .pool_max_idle_per_host(config.max_idle_conns_per_host)
        .pool_idle_timeout(config.idle_conn_timeout)
        .connect_timeout(config.response_header_timeout)
        .timeout(config.request_timeout)
        .build()
        .map_err(|err| ProxyError::Internal(format!("failed to build upstream client: {err}")))
}

/// Enforces the configured method/endpoint allow-list. Endpoints are
/// matched as exact path prefixes.
pub fn check_allowed(
    method: &str,
    path: &str,
    allowed_methods: &[String],
    allowed_endpoints: &[String],
) -> Result<()> {
    if !allowed_methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
        return Err(ProxyError::MethodNotAllowed);
    }
    if !allowed_endpoints.iter().any(|e| path.starts_with(e.as_str())) {
        return Err(ProxyError::EndpointNotAllowed);
    }
    Ok(())
}

/// Bounds the in-memory tee buffer used while streaming; beyond this size
/// caching is disabled for the response but streaming continues in full.
pub fn tee_buffer_limit(config: &AppConfig) -> usize {
    config.http_cache_max_body_bytes
}

pub fn response_header_timeout(config: &AppConfig) -> Duration {
    config.response_header_timeout
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_disallowed_method() {
        let result = check_allowed(
            "DELETE",
            "/v1/models",
            &["GET".to_string(), "POST".to_string()],
            &["/v1/models".to_string()],
        );
        assert!(matches!(result, Err(ProxyError::MethodNotAllowed)));
    }

    #[test]
    fn rejects_disallowed_endpoint() {
        let result = check_allowed(
            "GET",
            "/v1/admin",
            &["GET".to_string()],
            &["/v1/models".to_string()],
        );
        assert!(matches!(result, Err(ProxyError::EndpointNotAllowed)));
    }

    #[test]
    fn allows_matching_method_and_prefix() {
        let result = check_allowed(
            "GET",
            "/v1/models/gpt-4",
            &["GET".to_string()],
            &["/v1/models".to_string()],
        );
        assert!(result.is_ok());
    }
}
