//! Bearer-token extraction: `Authorization: Bearer …`, `X-API-Key`, or
//! `?token=`, in that preference order.

use axum::http::HeaderMap;

use crate::error::{ProxyError, Result};

pub fn extract_token(headers: &HeaderMap, query: &str) -> Result<String> {
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        let value = value.to_str().map_err(|_| ProxyError::InvalidTokenFormat)?;
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Ok(token.to_string());
        }
        return Err(ProxyError::InvalidTokenFormat);
    }

    if let Some(value) = headers.get("x-api-key") {
        let value = value.to_str().map_err(|_| ProxyError::InvalidTokenFormat)?;
        return Ok(value.to_string());
    }

    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            return Ok(value.to_string());
        }
    }

    Err(ProxyError::MissingAuthentication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn prefers_bearer_over_other_forms() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer sk-abc"));
        assert_eq!(extract_token(&headers, "").unwrap(), "sk-abc");
    }

    #[test]
    fn falls_back_to_x_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sk-abc"));
        assert_eq!(extract_token(&headers, "").unwrap(), "sk-abc");
    }

    #[test]
    fn falls_back_to_query_param() {
        let headers = HeaderMap::new();
        assert_eq!(extract_token(&headers, "token=sk-abc&x=1").unwrap(), "sk-abc");
    }

    #[test]
    fn missing_everything_is_missing_authentication() {
        let headers = HeaderMap::new();
        assert!(matches!(extract_token(&headers, ""), Err(ProxyError::MissingAuthentication)));
    }

    #[test]
    fn malformed_authorization_header_is_invalid_format() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(extract_token(&headers, ""), Err(ProxyError::InvalidTokenFormat)));
    }
}
