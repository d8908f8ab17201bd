//! In-memory HTTP cache: hash map protected by an RwLock, lazy eviction on
//! `get` plus a periodic sweep, soonest-expiry eviction on overflow.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{CachedResponse, ResponseCache};

pub struct InMemoryResponseCache {
    entries: RwLock<HashMap<String, CachedResponse>>,
    max_size: usize,
}

impl InMemoryResponseCache {
    pub fn new(max_size: usize) -> Self {
        Self { entries: RwLock::new(HashMap::new()), max_size }
    }

    pub async fn sweep_expired(&self) {
        let now = Utc::now();
        self.entries.write().await.retain(|_, v| !v.is_expired(now));
    }

    fn evict_soonest_expiry(entries: &mut HashMap<String, CachedResponse>) {
        if let Some(key) = entries
            .iter()
            .min_by_key(|(_, v)| v.expires_at)
            .map(|(k, _)| k.clone())
        {
            entries.remove(&key);
        }
    }
}

#[async_trait]
impl ResponseCache for InMemoryResponseCache {
    async fn get(&self, key: &str) -> Option<CachedResponse> {
        let now = Utc::now();
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(key) {
                if !entry.is_expired(now) {
                    return Some(entry.clone());
                }
            } else {
                return None;
            }
        }
        self.entries.write().await.remove(key);
        None
    }

    async fn set(&self, key: &str, entry: CachedResponse) {
        if entry.is_expired(Utc::now()) {
            return;
        }
        let mut entries = self.entries.write().await;
        while entries.len() >= self.max_size && !entries.contains_key(key) {
            Self::evict_soonest_expiry(&mut entries);
        }
        entries.insert(key.to_string(), entry);
    }

    async fn purge(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    async fn purge_prefix(&self, prefix: &str) -> u64 {
        let mut entries = self.entries.write().await;
        let keys: Vec<String> =
            entries.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        let count = keys.len() as u64;
        for key in keys {
            entries.remove(&key);
        }
        count
    }
}

pub fn spawn_sweeper(
    cache: Arc<InMemoryResponseCache>,
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
    use chrono::Duration;

    fn entry(ttl_secs: i64) -> CachedResponse {
        CachedResponse {
            status_code: 200,
            headers: HashMap::new(),
            body: b"body".to_vec(),
            vary: String::new(),
            expires_at: Utc::now() + Duration::seconds(ttl_secs),
        }
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = InMemoryResponseCache::new(10);
        cache.set("k", entry(-1)).await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn size_cap_evicts_soonest_expiry() {
        let cache = InMemoryResponseCache::new(2);
        cache.set("soon", entry(1)).await;
        cache.set("later", entry(100)).await;
        cache.set("newest", entry(100)).await;
        assert!(cache.get("soon").await.is_none());
        assert!(cache.get("later").await.is_some());
        assert!(cache.get("newest").await.is_some());
    }

    #[tokio::test]
    async fn purge_prefix_removes_matching_keys_only() {
        let cache = InMemoryResponseCache::new(10);
        cache.set("GET:/v1/models:", entry(60)).await;
        cache.set("GET:/v1/embeddings:", entry(60)).await;
        cache.set("POST:/v1/models:", entry(60)).await;
        let removed = cache.purge_prefix("GET:").await;
        assert_eq!(removed, 2);
        assert!(cache.get("POST:/v1/models:").await.is_some());
    }
}
