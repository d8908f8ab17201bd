//! Validation cache (component D): a bounded, TTL'd memoization of
//! successful token validations so the hot path rarely hits the store.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::token::store::Token;

#[derive(Clone)]
struct Entry {
    token: Token,
    valid_until: DateTime<Utc>,
}

#[derive(Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
}

impl CacheStats {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
        )
    }
}

/// Maps token secret to `(token, valid_until)`, size-bounded with
/// earliest-expiry eviction. TTL is independent of the token's own
/// `expires_at` and must never extend it.
pub struct ValidationCache {
    entries: RwLock<HashMap<String, Entry>>,
    max_size: usize,
    ttl: chrono::Duration,
    stats: Arc<CacheStats>,
}

impl ValidationCache {
    pub fn new(max_size: usize, ttl: std::time::Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_size,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(300)),
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        self.stats.clone()
    }

    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns the cached token if present and not past its cache-side TTL
    /// and not past the token's own `expires_at`.
    pub async fn get(&self, secret: &str) -> Option<Token> {
        let now = Utc::now();
        let hit = {
            let entries = self.entries.read().await;
            entries.get(secret).and_then(|entry| {
                if entry.valid_until > now && !entry.token.is_expired(now) {
                    Some(entry.token.clone())
                } else {
                    None
                }
            })
        };
        if hit.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    /// Inserts a successful validation. Inactive tokens are never inserted
    /// by callers (enforced by the validator, not this cache).
    pub async fn insert(&self, secret: String, token: Token) {
        let valid_until = Utc::now() + self.ttl;
        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_size && !entries.contains_key(&secret) {
            self.evict_oldest(&mut entries);
        }
        entries.insert(secret, Entry { token, valid_until });
    }

    /// Removes a single entry, e.g. after a tracked call on a limited token
    /// observes a state change that must be seen promptly.
    pub async fn invalidate(&self, secret: &str) {
        self.entries.write().await.remove(secret);
    }

    /// Drops every entry past its cache-side TTL. Intended to be driven by
    /// a periodic background sweep, not the request path.
    pub async fn sweep_expired(&self) {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.valid_until > now);
        let removed = before - entries.len();
        if removed > 0 {
            self.stats.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }
    }

    /// Evicts roughly 10% of entries with the earliest `valid_until`, at
    /// least one so the bound is always restored before insertion.
    fn evict_oldest(&self, entries: &mut HashMap<String, Entry>) {
        let target = std::cmp::max(1, entries.len() / 10);
        let mut by_expiry: Vec<(String, DateTime<Utc>)> =
            entries.iter().map(|(k, v)| (k.clone(), v.valid_until)).collect();
        by_expiry.sort_by_key(|(_, valid_until)| *valid_until);
        for (key, _) in by_expiry.into_iter().take(target) {
            entries.remove(&key);
        }
        self.stats.evictions.fetch_add(target as u64, Ordering::Relaxed);
    }
}

/// Periodically sweeps a [`ValidationCache`] on the configured interval
/// until the returned handle is dropped or `stop` is awaited.
pub fn spawn_sweeper(
    cache: Arc<ValidationCache>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            cache.sweep_expired().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_token(secret: &str) -> Token {
        Token {
            id: Uuid::now_v7(),
            token: secret.to_string(),
            project_id: "proj-1".to_string(),
            expires_at: None,
            is_active: true,
            request_count: 0,
            max_requests: None,
            created_at: Utc::now(),
            last_used_at: None,
            cache_hit_count: 0,
        }
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = ValidationCache::new(10, std::time::Duration::from_secs(60));
        assert!(cache.get("sk-missing").await.is_none());
        cache.insert("sk-a".to_string(), sample_token("sk-a")).await;
        assert!(cache.get("sk-a").await.is_some());
        let (hits, misses, _) = cache.stats().snapshot();
        assert_eq!(hits, 1);
        assert_eq!(misses, 1);
    }

    #[tokio::test]
    async fn size_bound_is_enforced() {
        let cache = ValidationCache::new(5, std::time::Duration::from_secs(60));
        for i in 0..20 {
            let secret = format!("sk-{i}");
            cache.insert(secret.clone(), sample_token(&secret)).await;
        }
        assert!(cache.size().await <= 5);
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = ValidationCache::new(10, std::time::Duration::from_secs(60));
        cache.insert("sk-a".to_string(), sample_token("sk-a")).await;
        cache.invalidate("sk-a").await;
        assert!(cache.get("sk-a").await.is_none());
    }

    #[tokio::test]
    async fn ttl_never_outlives_token_expiry() {
        let cache = ValidationCache::new(10, std::time::Duration::from_secs(3600));
        let mut token = sample_token("sk-a");
        token.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        cache.insert("sk-a".to_string(), token).await;
        assert!(cache.get("sk-a").await.is_none());
    }
}
