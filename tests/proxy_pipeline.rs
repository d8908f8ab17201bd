//! End-to-end coverage of the proxy pipeline's literal scenarios, driven
//! through `proxy::router` via `tower::ServiceExt::oneshot` the way the
//! pack's one real end-to-end test style does it. A live socket is
//! reserved only for the mock upstream, since that's the one collaborator
//! that can't be swapped for an in-process `tower::Service`.

use axum::body::Body;
use axum::http::{header, Method, Request};
use axum::Router;
use chrono::Utc;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body as HyperBody, Request as HyperRequest, Response as HyperResponse, Server};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use llm_proxy::circuit::CircuitBreaker;
use llm_proxy::config::AppConfig;
use llm_proxy::events::InMemoryEventBus;
use llm_proxy::httpcache::InMemoryResponseCache;
use llm_proxy::project::ProjectActiveCache;
use llm_proxy::proxy::usage;
use llm_proxy::proxy::{build_state, router, Components};
use llm_proxy::ratelimit::InMemoryRateLimiter;
use llm_proxy::token::cache::ValidationCache;
use llm_proxy::token::store::memory::InMemoryTokenStore;
use llm_proxy::token::store::{Project, Token};
use llm_proxy::token::{TokenStore, TokenValidator};

/// A scripted response: status code, body, and an optional extra header.
struct MockResponse {
    status: u16,
    body: &'static str,
    header: Option<(&'static str, &'static str)>,
}

/// A local upstream double. Serves queued responses in order, then repeats
/// the last one; records how many requests it actually received so tests
/// can assert the circuit breaker kept it from being called at all.
struct MockUpstream {
    addr: SocketAddr,
    hit_count: Arc<AtomicUsize>,
}

fn spawn_mock_upstream(responses: Vec<MockResponse>) -> MockUpstream {
    let queue = Arc::new(Mutex::new(VecDeque::from(responses)));
    let hit_count = Arc::new(AtomicUsize::new(0));
    let hit_count_for_service = hit_count.clone();

    let make_svc = make_service_fn(move |_conn| {
        let queue = queue.clone();
        let hit_count = hit_count_for_service.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |_req: HyperRequest<HyperBody>| {
                let queue = queue.clone();
                let hit_count = hit_count.clone();
                async move {
                    hit_count.fetch_add(1, Ordering::SeqCst);
                    let mut queue = queue.lock().unwrap();
                    let scripted = if queue.len() > 1 { queue.pop_front() } else { queue.cloned_response() };
                    let scripted = scripted.unwrap_or(MockResponse { status: 200, body: "{}", header: None });
                    let mut builder = HyperResponse::builder().status(scripted.status);
                    if let Some((name, value)) = scripted.header {
                        builder = builder.header(name, value);
                    }
                    Ok::<_, hyper::Error>(builder.body(HyperBody::from(scripted.body)).unwrap())
                }
            }))
        }
    });

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = Server::bind(&addr).serve(make_svc);
    let bound_addr = server.local_addr();

    tokio::spawn(async move {
        let _ = server.await;
    });

    MockUpstream { addr: bound_addr, hit_count }
}

// `MockResponse` isn't `Clone` (it doesn't need to be outside this shim);
// this lets the last queued response repeat indefinitely without draining it.
trait ClonedResponse {
    fn cloned_response(&self) -> Option<MockResponse>;
}

impl ClonedResponse for VecDeque<MockResponse> {
    fn cloned_response(&self) -> Option<MockResponse> {
        self.front().map(|r| MockResponse { status: r.status, body: r.body, header: r.header })
    }
}

fn test_config(upstream_addr: SocketAddr) -> AppConfig {
    let mut config = AppConfig::for_tests();
    config.allowed_methods = vec!["GET".to_string(), "POST".to_string()];
    config.allowed_endpoints = vec!["/v1/models".to_string()];
    config.upstream_base_url = format!("http://{upstream_addr}");
    config
}

/// Assembles the same collaborators `server::assemble` would, then builds
/// the real axum router through `proxy::build_state` + `proxy::router` so
/// tests exercise the router/middleware layer, not just `ProxyPipeline`
/// directly.
fn build_app(config: AppConfig, failure_threshold: u32, cooldown: Duration) -> (Router, Arc<InMemoryTokenStore>) {
    let store = Arc::new(InMemoryTokenStore::new());
    let store_dyn: Arc<dyn TokenStore> = store.clone();

    let validator = TokenValidator::new(
        store_dyn.clone(),
        Arc::new(ValidationCache::new(config.validation_cache_max_size, config.validation_cache_ttl)),
    );
    let project_active = ProjectActiveCache::new(
        store_dyn.clone(),
        config.project_active_cache_max_size,
        config.project_active_cache_ttl,
    );
    let (usage, _flusher) = usage::spawn(store_dyn.clone(), 100, Duration::from_millis(20), 10);

    let components = Components {
        store: store_dyn,
        validator,
        project_active,
        rate_limiter: Arc::new(InMemoryRateLimiter::new(1000.0, 1000.0)),
        breaker: Arc::new(CircuitBreaker::new(failure_threshold, cooldown)),
        cache: Arc::new(InMemoryResponseCache::new(config.http_cache_max_entries)),
        http_client: reqwest::Client::new(),
        event_bus: Arc::new(InMemoryEventBus::new(16)),
        usage,
        config,
    };

    let app = router(build_state(components));
    (app, store)
}

async fn seed_project_and_token(
    store: &InMemoryTokenStore,
    project_id: &str,
    upstream_key: &str,
    max_requests: Option<u64>,
    request_count: u64,
) -> String {
    let now = Utc::now();
    store
        .seed_project(Project {
            id: project_id.to_string(),
            name: project_id.to_string(),
            api_key: upstream_key.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
            deactivated_at: None,
        })
        .await;

    let secret = llm_proxy::token::codec::generate_token();
    store
        .seed_token(Token {
            id: Uuid::now_v7(),
            token: secret.clone(),
            project_id: project_id.to_string(),
            expires_at: Some(now + chrono::Duration::seconds(3600)),
            is_active: true,
            request_count,
            max_requests,
            created_at: now,
            last_used_at: None,
            cache_hit_count: 0,
        })
        .await;
    secret
}

fn bearer_request(secret: &str, method: Method, path: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {secret}"))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn s1_happy_path_forwards_and_reports_miss() {
    let upstream = spawn_mock_upstream(vec![MockResponse { status: 200, body: r#"{"ok":true}"#, header: None }]);

    let (app, store) = build_app(test_config(upstream.addr), 5, Duration::from_secs(30));
    let secret = seed_project_and_token(&store, "P1", "sk-upstream-abc", None, 0).await;

    let response = app.oneshot(bearer_request(&secret, Method::GET, "/v1/models")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(upstream.hit_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn s2_quota_exhausted_rejects_before_upstream_and_leaves_count_unchanged() {
    let upstream = spawn_mock_upstream(vec![MockResponse { status: 200, body: "{}", header: None }]);

    let (app, store) = build_app(test_config(upstream.addr), 5, Duration::from_secs(30));
    let secret = seed_project_and_token(&store, "P1", "sk-upstream-abc", Some(2), 2).await;

    let response = app.oneshot(bearer_request(&secret, Method::GET, "/v1/models")).await.unwrap();
    assert_eq!(response.status(), 429);
    assert_eq!(upstream.hit_count.load(Ordering::SeqCst), 0);

    let token = store.get_by_token(&secret).await.unwrap();
    assert_eq!(token.request_count, 2);
}

#[tokio::test]
async fn s3_revoked_token_is_rejected_and_usage_stays_put() {
    // No mock upstream needed: the token fails validation before dispatch,
    // so the configured upstream address is never contacted.
    let unused_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
    let (app, store) = build_app(test_config(unused_addr), 5, Duration::from_secs(30));
    let secret = seed_project_and_token(&store, "P1", "sk-upstream-abc", None, 0).await;

    let token = store.get_by_token(&secret).await.unwrap();
    store.revoke(token.id).await.unwrap();

    let response = app.oneshot(bearer_request(&secret, Method::GET, "/v1/models")).await.unwrap();
    assert_eq!(response.status(), 401);

    let token = store.get_by_token(&secret).await.unwrap();
    assert_eq!(token.request_count, 0);
}

#[tokio::test]
async fn s4_circuit_opens_after_threshold_then_recovers_after_cooldown() {
    let upstream = spawn_mock_upstream(vec![
        MockResponse { status: 502, body: "bad gateway", header: None },
        MockResponse { status: 502, body: "bad gateway", header: None },
        MockResponse { status: 502, body: "bad gateway", header: None },
        MockResponse { status: 200, body: "{}", header: None },
    ]);

    let cooldown = Duration::from_millis(50);
    let (app, store) = build_app(test_config(upstream.addr), 3, cooldown);
    let secret = seed_project_and_token(&store, "P1", "sk-upstream-abc", None, 0).await;

    for _ in 0..3 {
        let response = app.clone().oneshot(bearer_request(&secret, Method::GET, "/v1/models")).await.unwrap();
        assert_eq!(response.status(), 502);
    }

    let response = app.clone().oneshot(bearer_request(&secret, Method::GET, "/v1/models")).await.unwrap();
    assert_eq!(response.status(), 503);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(body.as_ref(), br#"{"error":"Upstream unavailable (circuit breaker open)"}"#);
    assert_eq!(upstream.hit_count.load(Ordering::SeqCst), 3, "short-circuited request must not reach upstream");

    tokio::time::sleep(cooldown + Duration::from_millis(20)).await;

    let response = app.clone().oneshot(bearer_request(&secret, Method::GET, "/v1/models")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(upstream.hit_count.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn s5_cacheable_response_is_served_without_a_second_upstream_call() {
    let upstream = spawn_mock_upstream(vec![MockResponse {
        status: 200,
        body: r#"{"models":[]}"#,
        header: Some(("cache-control", "max-age=60")),
    }]);

    let (app, store) = build_app(test_config(upstream.addr), 5, Duration::from_secs(30));
    let secret = seed_project_and_token(&store, "P1", "sk-upstream-abc", None, 0).await;

    let first = app.clone().oneshot(bearer_request(&secret, Method::GET, "/v1/models")).await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(upstream.hit_count.load(Ordering::SeqCst), 1);

    let second = app.clone().oneshot(bearer_request(&secret, Method::GET, "/v1/models")).await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(upstream.hit_count.load(Ordering::SeqCst), 1, "second request must be served from cache");

    let second_body = hyper::body::to_bytes(second.into_body()).await.unwrap();
    assert_eq!(second_body.as_ref(), br#"{"models":[]}"#);

    // Cache-hit accounting is batched asynchronously; give the flusher a
    // moment to land the increment.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let token = store.get_by_token(&secret).await.unwrap();
    assert_eq!(token.cache_hit_count, 1);
}

#[tokio::test]
async fn s6_redis_rate_limiter_falls_back_to_in_memory_on_connection_failure() {
    use llm_proxy::ratelimit::{LimitConfig, RateLimiter, RedisRateLimiter};

    // Nothing is listening on this port; every Redis call fails fast with a
    // connection error, exercising the fallback path without a live server.
    let limiter = RedisRateLimiter::new(
        "redis://127.0.0.1:1",
        "ratelimit:",
        None,
        LimitConfig { max: 5, window: Duration::from_secs(60) },
        10.0,
        20.0,
        true,
    )
    .unwrap();

    assert!(limiter.is_redis_available());
    let allowed = limiter.allow("tenant-1").await.unwrap();
    assert!(allowed, "fallback bucket should still admit the request");
    assert!(!limiter.is_redis_available(), "a failed Redis call must flip availability to false");
}
