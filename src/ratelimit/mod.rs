//! Rate limiter (component E): a single contract with two interchangeable
//! backends — an in-process token bucket and a Redis-backed sliding-window
//! counter that falls back to the former on Redis failure.

pub mod memory;
pub mod redis_backed;

use async_trait::async_trait;

use crate::error::Result;

pub use memory::InMemoryRateLimiter;
pub use redis_backed::RedisRateLimiter;

#[derive(Debug, Clone, Copy)]
pub struct LimitConfig {
    pub max: u64,
    pub window: std::time::Duration,
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Consumes one unit of quota for `key`, returning whether it was
    /// admitted.
    async fn allow(&self, key: &str) -> Result<bool>;

    /// Units of quota left in the current window, floored at zero.
    async fn remaining(&self, key: &str) -> Result<u64>;

    /// Clears any state held for `key`, reverting it to a fresh window.
    async fn reset(&self, key: &str);

    /// Overrides the default limit for a single key; `None` reverts to the
    /// configured default.
    async fn set_limit(&self, key: &str, limit: Option<LimitConfig>);
}
