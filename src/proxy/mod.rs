//! Wires every component into the `AppState` the axum handler closes over,
//! and the router that dispatches every method/path through the pipeline.

pub mod auth;
pub mod pipeline;
pub mod upstream;
pub mod usage;

use axum::extract::State;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{body::Body, Router};
use std::sync::Arc;

use crate::circuit::{CircuitBreaker, DefaultTransientClassifier, TransientClassifier};
use crate::config::AppConfig;
use crate::events::EventBus;
use crate::httpcache::ResponseCache;
use crate::project::ProjectActiveCache;
use crate::proxy::pipeline::{InboundRequest, ProxyPipeline};
use crate::proxy::usage::UsageAggregator;
use crate::ratelimit::RateLimiter;
use crate::token::{TokenStore, TokenValidator};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ProxyPipeline>,
}

/// Everything the binary needs to assemble to run the proxy; kept separate
/// from `AppState` so the binary can hold onto background task handles
/// (flushers, sweepers) it alone is responsible for stopping.
pub struct Components {
    pub store: Arc<dyn TokenStore>,
    pub validator: TokenValidator,
    pub project_active: ProjectActiveCache,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub cache: Arc<dyn ResponseCache>,
    pub http_client: reqwest::Client,
    pub event_bus: Arc<dyn EventBus>,
    pub usage: UsageAggregator,
    pub config: AppConfig,
}

pub fn build_state(components: Components) -> AppState {
    let rate_limit_window = std::time::Duration::from_secs(60);
    let pipeline = ProxyPipeline {
        store: components.store,
        validator: components.validator,
        project_active: components.project_active,
        rate_limiter: components.rate_limiter,
        breaker: components.breaker,
        classifier: Arc::new(DefaultTransientClassifier) as Arc<dyn TransientClassifier>,
        cache: components.cache,
        http_client: components.http_client,
        event_bus: components.event_bus,
        usage: components.usage,
        config: components.config,
        rate_limit_window,
    };
    AppState { pipeline: Arc::new(pipeline) }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", axum::routing::get(healthz))
        .fallback(any(proxy_handler))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    let breaker_state = format!("{:?}", state.pipeline.breaker.state());
    axum::Json(serde_json::json!({
        "status": "ok",
        "circuit_breaker": breaker_state,
        "event_bus_dropped": state.pipeline.event_bus.dropped_count(),
    }))
}

async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match hyper::body::to_bytes(body).await {
        Ok(bytes) => bytes,
        Err(err) => {
            return crate::error::ProxyError::Internal(format!("failed to read request body: {err}"))
                .into_response()
        }
    };

    let query = parts.uri.query().unwrap_or("").to_string();
    let inbound = InboundRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        query,
        headers: parts.headers,
        body: bytes,
    };

    state.pipeline.handle(inbound).await
}
