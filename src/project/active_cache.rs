//! Cached project-active store (component K): a short-TTL memoization of
//! "is this project active?" in front of the token store.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::token::store::TokenStore;

struct Entry {
    active: bool,
    expires_at: DateTime<Utc>,
}

/// Wraps a backing active-check with a size-bounded TTL cache. Errors from
/// the backend are never cached; both `true` and `false` are.
pub struct ProjectActiveCache {
    store: Arc<dyn TokenStore>,
    entries: RwLock<HashMap<String, Entry>>,
    max_size: usize,
    ttl: chrono::Duration,
}

impl ProjectActiveCache {
    pub fn new(store: Arc<dyn TokenStore>, max_size: usize, ttl: std::time::Duration) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
            max_size,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(60)),
        }
    }

    pub async fn is_active(&self, project_id: &str) -> Result<bool> {
        let now = Utc::now();
        if let Some(entry) = self.entries.read().await.get(project_id) {
            if entry.expires_at > now {
                return Ok(entry.active);
            }
        }

        let active = self.store.get_project(project_id).await?.is_active;

        let mut entries = self.entries.write().await;
        if entries.len() >= self.max_size && !entries.contains_key(project_id) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(project_id.to_string(), Entry { active, expires_at: now + self.ttl });

        Ok(active)
    }
}
