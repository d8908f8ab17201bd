//! Distributed sliding-window counter over Redis, with an in-memory
//! fallback on Redis failure.

use async_trait::async_trait;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use redis::AsyncCommands;
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::{InMemoryRateLimiter, LimitConfig, RateLimiter};
use crate::error::{ProxyError, Result};

type HmacSha256 = Hmac<Sha256>;

pub struct RedisRateLimiter {
    client: redis::Client,
    key_prefix: String,
    key_hash_secret: Option<String>,
    default: LimitConfig,
    overrides: DashMap<String, LimitConfig>,
    fallback: Arc<InMemoryRateLimiter>,
    redis_available: AtomicBool,
}

impl RedisRateLimiter {
    /// `_fallback_enabled` is accepted for call-site compatibility but no
    /// longer changes behavior: a caller must never be denied purely because
    /// Redis is unreachable, so the in-memory fallback always engages on
    /// Redis failure.
    pub fn new(
        redis_url: &str,
        key_prefix: impl Into<String>,
        key_hash_secret: Option<String>,
        default: LimitConfig,
        fallback_rate: f64,
        fallback_capacity: f64,
        _fallback_enabled: bool,
    ) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|err| ProxyError::Storage(format!("invalid redis url: {err}")))?;
        Ok(Self {
            client,
            key_prefix: key_prefix.into(),
            key_hash_secret,
            default,
            overrides: DashMap::new(),
            fallback: Arc::new(InMemoryRateLimiter::new(fallback_rate, fallback_capacity)),
            redis_available: AtomicBool::new(true),
        })
    }

    pub fn is_redis_available(&self) -> bool {
        self.redis_available.load(Ordering::Relaxed)
    }

    fn hashed_id(&self, key: &str) -> String {
        match &self.key_hash_secret {
            Some(secret) => {
                let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                    .expect("HMAC accepts keys of any length");
                mac.update(key.as_bytes());
                let digest = mac.finalize().into_bytes();
                digest.iter().take(8).map(|b| format!("{b:02x}")).collect::<String>()
            }
            None => key.to_string(),
        }
    }

    fn limit_for(&self, key: &str) -> LimitConfig {
        self.overrides.get(key).map(|l| *l).unwrap_or(self.default)
    }

    fn window_key(&self, key: &str, window: std::time::Duration) -> String {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let window_secs = window.as_secs().max(1);
        let window_start = (now / window_secs) * window_secs;
        format!("{}{}:{}", self.key_prefix, self.hashed_id(key), window_start)
    }

    fn mark_available(&self) {
        self.redis_available.store(true, Ordering::Relaxed);
    }

    fn mark_unavailable(&self) {
        self.redis_available.store(false, Ordering::Relaxed);
    }
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn allow(&self, key: &str) -> Result<bool> {
        let limit = self.limit_for(key);
        let redis_key = self.window_key(key, limit.window);

        let result: std::result::Result<u64, redis::RedisError> = async {
            let mut conn = self.client.get_async_connection().await?;
            let count: u64 = conn.incr(&redis_key, 1u64).await?;
            if count == 1 {
                let ttl = limit.window.as_secs() + 1;
                let _: () = conn.expire(&redis_key, ttl as i64).await?;
            }
            Ok(count)
        }
        .await;

        match result {
            Ok(count) => {
                self.mark_available();
                Ok(count <= limit.max)
            }
            Err(err) => {
                self.mark_unavailable();
                tracing::warn!(error = %err, "redis rate limiter unavailable, using in-memory fallback");
                self.fallback.allow(key).await
            }
        }
    }

    async fn remaining(&self, key: &str) -> Result<u64> {
        let limit = self.limit_for(key);
        let redis_key = self.window_key(key, limit.window);

        let result: std::result::Result<Option<u64>, redis::RedisError> = async {
            let mut conn = self.client.get_async_connection().await?;
            conn.get(&redis_key).await
        }
        .await;

        match result {
            Ok(current) => {
                self.mark_available();
                Ok(limit.max.saturating_sub(current.unwrap_or(0)))
            }
            Err(err) => {
                self.mark_unavailable();
                tracing::warn!(error = %err, "redis rate limiter unavailable, using in-memory fallback");
                self.fallback.remaining(key).await
            }
        }
    }

    async fn reset(&self, key: &str) {
        let limit = self.limit_for(key);
        let redis_key = self.window_key(key, limit.window);
        if let Ok(mut conn) = self.client.get_async_connection().await {
            let _: std::result::Result<(), redis::RedisError> = conn.del(&redis_key).await;
        }
        self.fallback.reset(key).await;
    }

    async fn set_limit(&self, key: &str, limit: Option<LimitConfig>) {
        match limit {
            Some(limit) => {
                self.overrides.insert(key.to_string(), limit);
            }
            None => {
                self.overrides.remove(key);
            }
        }
        self.fallback.set_limit(key, limit).await;
    }
}
