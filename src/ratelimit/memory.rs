//! In-memory token bucket: the per-process rate limiter, and the fallback
//! the Redis-backed limiter defers to when Redis is unreachable.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Instant;

use super::{LimitConfig, RateLimiter};
use crate::error::Result;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    rate: f64,
    capacity: f64,
}

impl Bucket {
    fn new(rate: f64, capacity: f64) -> Self {
        Self { tokens: capacity, last_refill: Instant::now(), rate, capacity }
    }

    /// Lazily refills by elapsed time times rate, capped at capacity.
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
            self.last_refill = now;
        }
    }

    fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn remaining(&mut self) -> u64 {
        self.refill();
        self.tokens.floor().max(0.0) as u64
    }
}

pub struct InMemoryRateLimiter {
    buckets: DashMap<String, Bucket>,
    overrides: DashMap<String, LimitConfig>,
    default_rate: f64,
    default_capacity: f64,
}

impl InMemoryRateLimiter {
    pub fn new(default_rate: f64, default_capacity: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            overrides: DashMap::new(),
            default_rate,
            default_capacity,
        }
    }

    fn rate_capacity_for(&self, key: &str) -> (f64, f64) {
        match self.overrides.get(key) {
            Some(limit) => {
                let rate = limit.max as f64 / limit.window.as_secs_f64().max(1.0);
                (rate, limit.max as f64)
            }
            None => (self.default_rate, self.default_capacity),
        }
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn allow(&self, key: &str) -> Result<bool> {
        let (rate, capacity) = self.rate_capacity_for(key);
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket::new(rate, capacity));
        bucket.rate = rate;
        bucket.capacity = capacity;
        Ok(bucket.try_consume())
    }

    async fn remaining(&self, key: &str) -> Result<u64> {
        let (rate, capacity) = self.rate_capacity_for(key);
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket::new(rate, capacity));
        Ok(bucket.remaining())
    }

    async fn reset(&self, key: &str) {
        self.buckets.remove(key);
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
        self.buckets.remove(key);
    }
}
