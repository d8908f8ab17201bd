//! HTTP response cache (component G): keyed memoization of safe, idempotent
//! GETs in front of the upstream.

pub mod key;
pub mod memory;
pub mod redis_backed;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub use key::{cache_key, parse_cache_control_max_age, CacheKeyParts};
pub use memory::InMemoryResponseCache;
pub use redis_backed::RedisResponseCache;

/// A cached upstream response, keyed by method + URL + the values of the
/// headers named in the response's `Vary`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CachedResponse {
    pub status_code: u16,
    pub headers: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
    pub vary: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<CachedResponse>;

    /// No-op when `entry.expires_at` is already past.
    async fn set(&self, key: &str, entry: CachedResponse);

    async fn purge(&self, key: &str) -> bool;

    /// Scans for every key under `prefix` and deletes it, returning the
    /// count actually removed. Implementations may abort early on a
    /// backend error, returning the partial count seen so far.
    async fn purge_prefix(&self, prefix: &str) -> u64;
}

/// Whether an upstream response is safe to memoize at all, independent of
/// TTL: only 2xx, and never when the response carries `no-store`,
/// `private`, or `Set-Cookie`.
pub fn is_cache_eligible(status: u16, cache_control: Option<&str>, has_set_cookie: bool) -> bool {
    if !(200..300).contains(&status) {
        return false;
    }
    if has_set_cookie {
        return false;
    }
    if let Some(cc) = cache_control {
        let lower = cc.to_ascii_lowercase();
        if lower.contains("no-store") || lower.contains("private") {
            return false;
        }
    }
    true
}
