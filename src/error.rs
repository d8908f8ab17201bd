//! Crate-wide error taxonomy.
//!
//! Every error a client can observe maps 1:1 to one of the kinds below, and
//! each kind maps to exactly one HTTP status per the proxy's external
//! contract. Error bodies are always `{"error": "<message>"}` and never
//! carry token material, upstream API keys, or stack traces.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// The full error taxonomy for the proxy's request-handling datapath.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid token format")]
    InvalidTokenFormat,

    #[error("token not found")]
    TokenNotFound,

    #[error("token is inactive")]
    TokenInactive,

    #[error("token has expired")]
    TokenExpired,

    #[error("token rate limit exceeded")]
    TokenRateLimit,

    #[error("project not found")]
    ProjectNotFound,

    #[error("project is inactive")]
    ProjectInactive,

    #[error("upstream unavailable")]
    UpstreamUnavailable,

    #[error("{}", crate::circuit::CIRCUIT_OPEN_MESSAGE)]
    CircuitOpen,

    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("redis unavailable")]
    RedisUnavailable,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("endpoint not allowed")]
    EndpointNotAllowed,

    #[error("missing authentication")]
    MissingAuthentication,

    #[error("internal error")]
    Internal(String),
}

impl ProxyError {
    /// The taxonomy name used in logs and metrics; never sent to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::InvalidTokenFormat => "invalid_token_format",
            ProxyError::TokenNotFound => "token_not_found",
            ProxyError::TokenInactive => "token_inactive",
            ProxyError::TokenExpired => "token_expired",
            ProxyError::TokenRateLimit => "token_rate_limit",
            ProxyError::ProjectNotFound => "project_not_found",
            ProxyError::ProjectInactive => "project_inactive",
            ProxyError::UpstreamUnavailable => "upstream_unavailable",
            ProxyError::CircuitOpen => "circuit_open",
            ProxyError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ProxyError::RedisUnavailable => "redis_unavailable",
            ProxyError::Storage(_) => "storage_error",
            ProxyError::MethodNotAllowed => "method_not_allowed",
            ProxyError::EndpointNotAllowed => "endpoint_not_allowed",
            ProxyError::MissingAuthentication => "invalid_token_format",
            ProxyError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidTokenFormat
            | ProxyError::TokenNotFound
            | ProxyError::TokenInactive
            | ProxyError::TokenExpired
            | ProxyError::MissingAuthentication => StatusCode::UNAUTHORIZED,
            ProxyError::ProjectInactive
            | ProxyError::MethodNotAllowed
            | ProxyError::EndpointNotAllowed => StatusCode::FORBIDDEN,
            ProxyError::ProjectNotFound => StatusCode::NOT_FOUND,
            ProxyError::TokenRateLimit | ProxyError::RateLimitExceeded { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ProxyError::UpstreamUnavailable | ProxyError::Storage(_) | ProxyError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::CircuitOpen => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::RedisUnavailable => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Sanitized, client-visible message. Never echoes internal detail for
    /// storage/internal errors.
    fn public_message(&self) -> String {
        match self {
            ProxyError::Storage(_) => "internal error".to_string(),
            ProxyError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = match &self {
                ProxyError::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
                _ => None,
            };
            let mut resp = (status, Json(ErrorBody { error: self.public_message() })).into_response();
            if let Some(secs) = retry_after {
                resp.headers_mut().insert(
                    axum::http::header::RETRY_AFTER,
                    axum::http::HeaderValue::from_str(&secs.to_string()).unwrap(),
                );
            }
            resp
        } else {
            (status, Json(ErrorBody { error: self.public_message() })).into_response()
        };
        response.extensions_mut().insert(ErrorKind(self.kind()));
        response
    }
}

/// Tag attached to error responses so middleware can log the taxonomy kind
/// without re-parsing the body.
#[derive(Clone, Copy)]
pub struct ErrorKind(pub &'static str);

pub type Result<T> = std::result::Result<T, ProxyError>;
