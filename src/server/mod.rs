//! HTTP server: assembles every proxy component into an axum app and serves
//! it with graceful shutdown.
//!
//! ## Server Architecture
//!
//! The server follows a layered architecture:
//! ```text
//! Client
//!        v HTTP (Bearer / X-API-Key / ?token=)
//! Server Layer (this module) <- axum router, CORS, tracing
//!        v
//! Proxy Pipeline <- auth, validation, rate limit, circuit breaker, cache
//!        v
//! Upstream LLM provider
//! ```

use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::circuit::CircuitBreaker;
use crate::config::AppConfig;
use crate::events::{EventBus, InMemoryEventBus, RedisStreamEventBus};
use crate::httpcache::{InMemoryResponseCache, RedisResponseCache, ResponseCache};
use crate::project::ProjectActiveCache;
use crate::proxy::upstream::build_client;
use crate::proxy::usage::{self, UsageFlusher};
use crate::proxy::{build_state, router, Components};
use crate::ratelimit::{InMemoryRateLimiter, LimitConfig, RateLimiter, RedisRateLimiter};
use crate::token::cache::{self, ValidationCache};
use crate::token::revoker::{spawn_automatic_revocation, AutomaticRevocationTask, Revoker};
use crate::token::{TokenStore, TokenValidator};

/// Handles to every background task spawned while assembling the server, so
/// the binary can bring them down gracefully alongside the HTTP listener.
pub struct Background {
    validation_sweeper: tokio::task::JoinHandle<()>,
    http_cache_sweeper: Option<tokio::task::JoinHandle<()>>,
    revocation_task: AutomaticRevocationTask,
    usage_flusher: UsageFlusher,
    event_bus: Arc<dyn EventBus>,
}

impl Background {
    pub async fn shutdown(self, deadline: Duration) {
        self.validation_sweeper.abort();
        if let Some(handle) = self.http_cache_sweeper {
            handle.abort();
        }
        self.revocation_task.stop().await;
        self.usage_flusher.stop().await;
        self.event_bus.stop(deadline).await;
    }
}

/// Builds every collaborator the pipeline depends on, choosing the Redis
/// backends over their in-memory counterparts whenever `config.redis_url`
/// is set.
pub fn assemble(
    store: Arc<dyn TokenStore>,
    config: AppConfig,
) -> anyhow::Result<(axum::Router, Background)> {
    let validation_cache =
        Arc::new(ValidationCache::new(config.validation_cache_max_size, config.validation_cache_ttl));
    let validation_sweeper =
        cache::spawn_sweeper(validation_cache.clone(), config.validation_cache_sweep_interval);

    let validator = TokenValidator::new(store.clone(), validation_cache);
    let project_active = ProjectActiveCache::new(
        store.clone(),
        config.project_active_cache_max_size,
        config.project_active_cache_ttl,
    );

    let default_limit = LimitConfig {
        max: config.rate_limit_fallback_capacity as u64,
        window: Duration::from_secs(60),
    };

    let mut http_cache_sweeper = None;
    let (rate_limiter, http_cache, event_bus): (Arc<dyn RateLimiter>, Arc<dyn ResponseCache>, Arc<dyn EventBus>) =
        match &config.redis_url {
            Some(redis_url) => {
                info!("using Redis-backed rate limiter, HTTP cache, and event bus");
                let rate_limiter = RedisRateLimiter::new(
                    redis_url,
                    "ratelimit:",
                    config.key_hash_secret.clone(),
                    default_limit,
                    config.rate_limit_fallback_rate,
                    config.rate_limit_fallback_capacity,
                    true,
                )?;
                let client = redis::Client::open(redis_url.as_str())?;
                let http_cache = RedisResponseCache::new(client.clone(), "httpcache:", config.redis_scan_count);
                let event_bus = RedisStreamEventBus::new(
                    client,
                    "proxy-events",
                    config.event_bus_buffer,
                    "proxy-consumers",
                );
                (Arc::new(rate_limiter), Arc::new(http_cache), Arc::new(event_bus))
            }
            None => {
                info!("no REDIS_URL configured; using in-process rate limiter, HTTP cache, and event bus");
                let rate_limiter =
                    InMemoryRateLimiter::new(config.rate_limit_fallback_rate, config.rate_limit_fallback_capacity);
                let http_cache = Arc::new(InMemoryResponseCache::new(config.http_cache_max_entries));
                http_cache_sweeper = Some(crate::httpcache::memory::spawn_sweeper(
                    http_cache.clone(),
                    config.validation_cache_sweep_interval,
                ));
                (Arc::new(rate_limiter), http_cache, Arc::new(InMemoryEventBus::new(config.event_bus_buffer)))
            }
        };

    let breaker = Arc::new(CircuitBreaker::new(config.circuit_failure_threshold, config.circuit_cooldown));
    let http_client = build_client(&config)?;

    let (usage, usage_flusher) = usage::spawn(
        store.clone(),
        config.usage_channel_capacity,
        config.usage_flush_interval,
        config.usage_flush_batch_size,
    );

    let revoker = Arc::new(Revoker::new(store.clone()));
    let revocation_task = spawn_automatic_revocation(revoker, config.automatic_revocation_interval);

    let components = Components {
        store,
        validator,
        project_active,
        rate_limiter,
        breaker,
        cache: http_cache,
        http_client,
        event_bus: event_bus.clone(),
        usage,
        config,
    };

    let state = build_state(components);
    let app = router(state).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive());

    let background =
        Background { validation_sweeper, http_cache_sweeper, revocation_task, usage_flusher, event_bus };

    Ok((app, background))
}

/// Binds, serves, and waits for `Ctrl-C` before tearing down background
/// tasks within `config.shutdown_deadline`.
pub async fn serve(store: Arc<dyn TokenStore>, config: AppConfig) -> anyhow::Result<()> {
    let addr_str = format!("{}:{}", config.host, config.port);
    let shutdown_deadline = config.shutdown_deadline;
    let (app, background) = assemble(store, config)?;

    let addr = addr_str.parse()?;
    info!(%addr_str, "llm-proxy listening");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down background tasks");
    background.shutdown(shutdown_deadline).await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("received Ctrl-C, starting graceful shutdown");
}
