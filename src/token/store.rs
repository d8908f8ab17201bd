//! Token store adapter (component B): the data model and the storage
//! contract the rest of the proxy depends on. Persistence itself — the
//! relational schema, migrations, backups — lives outside this crate; this
//! module only defines the shape of that collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{ProxyError, Result};

/// A tenant unit owning one upstream API key and a set of tokens.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub api_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

/// A proxy token: the bearer secret a client application presents, distinct
/// from the upstream provider's API key it resolves to.
#[derive(Debug, Clone)]
pub struct Token {
    pub id: Uuid,
    pub token: String,
    pub project_id: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub request_count: u64,
    /// `None` or `Some(0)` both mean unlimited.
    pub max_requests: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub cache_hit_count: u64,
}

impl Token {
    /// Whether this token has an enforced request ceiling.
    pub fn is_limited(&self) -> bool {
        !matches!(self.max_requests, None | Some(0))
    }

    /// `request_count >= max_requests` for limited tokens; unlimited tokens
    /// are never rate-limited by this predicate.
    pub fn is_over_limit(&self) -> bool {
        match self.max_requests {
            Some(max) if max > 0 => self.request_count >= max,
            _ => false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now)
    }
}

/// Abstract CRUD and usage-accounting surface over projects and tokens.
/// Every method may fail with `not_found`, `conflict` (duplicate id/name),
/// or a storage error; `increment_usage` must be atomic with respect to
/// concurrent callers on the same token.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Token>;
    async fn get_by_token(&self, secret: &str) -> Result<Token>;
    async fn create(&self, token: Token) -> Result<Token>;
    async fn update(&self, token: Token) -> Result<Token>;
    async fn increment_usage(&self, secret: &str) -> Result<Token>;
    async fn list_by_project(&self, project_id: &str) -> Result<Vec<Token>>;
    async fn list_all(&self) -> Result<Vec<Token>>;
    async fn revoke(&self, id: Uuid) -> Result<()>;
    async fn delete(&self, id: Uuid) -> Result<()>;
    async fn batch_revoke(&self, ids: &[Uuid]) -> Result<u64>;
    async fn revoke_project(&self, project_id: &str) -> Result<u64>;
    async fn revoke_expired(&self) -> Result<u64>;
    async fn reset_usage(&self, id: Uuid) -> Result<()>;
    async fn update_limit(&self, id: Uuid, max_requests: Option<u64>) -> Result<()>;
    async fn increment_usage_batch(
        &self,
        deltas: HashMap<String, u64>,
        last_used_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Batched analog of cache-hit accounting. Not part of the normative
    /// `increment_usage`/`increment_usage_batch` pair in spec.md §4.B (that
    /// pair tracks `request_count`); added because `cache_hit_count` also
    /// needs async, non-blocking accounting on the cache-hit path (§4.I
    /// step 6) and sharing the request-count batch would conflate the two
    /// counters.
    async fn increment_cache_hits_batch(
        &self,
        deltas: HashMap<String, u64>,
        last_used_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn get_project(&self, project_id: &str) -> Result<Project>;
}

/// Reference, in-memory `TokenStore` used by this crate's own tests. Never
/// wired into the production binary — persistent storage is an external
/// collaborator.
pub mod memory {
    use super::*;
    use tokio::sync::RwLock;

    #[derive(Default)]
    pub struct InMemoryTokenStore {
        tokens: RwLock<HashMap<Uuid, Token>>,
        projects: RwLock<HashMap<String, Project>>,
    }

    impl InMemoryTokenStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn seed_project(&self, project: Project) {
            self.projects.write().await.insert(project.id.clone(), project);
        }

        pub async fn seed_token(&self, token: Token) {
            self.tokens.write().await.insert(token.id, token);
        }
    }

    #[async_trait]
    impl TokenStore for InMemoryTokenStore {
        async fn get_by_id(&self, id: Uuid) -> Result<Token> {
            self.tokens.read().await.get(&id).cloned().ok_or(ProxyError::TokenNotFound)
        }

        async fn get_by_token(&self, secret: &str) -> Result<Token> {
            self.tokens
                .read()
                .await
                .values()
                .find(|t| t.token == secret)
                .cloned()
                .ok_or(ProxyError::TokenNotFound)
        }

        async fn create(&self, token: Token) -> Result<Token> {
            let mut tokens = self.tokens.write().await;
            if tokens.contains_key(&token.id) {
                return Err(ProxyError::Storage("duplicate token id".to_string()));
            }
            tokens.insert(token.id, token.clone());
            Ok(token)
        }

        async fn update(&self, token: Token) -> Result<Token> {
            let mut tokens = self.tokens.write().await;
            if !tokens.contains_key(&token.id) {
                return Err(ProxyError::TokenNotFound);
            }
            tokens.insert(token.id, token.clone());
            Ok(token)
        }

        async fn increment_usage(&self, secret: &str) -> Result<Token> {
            let mut tokens = self.tokens.write().await;
            let token = tokens
                .values_mut()
                .find(|t| t.token == secret)
                .ok_or(ProxyError::TokenNotFound)?;
            token.request_count += 1;
            token.last_used_at = Some(Utc::now());
            Ok(token.clone())
        }

        async fn list_by_project(&self, project_id: &str) -> Result<Vec<Token>> {
            Ok(self
                .tokens
                .read()
                .await
                .values()
                .filter(|t| t.project_id == project_id)
                .cloned()
                .collect())
        }

        async fn list_all(&self) -> Result<Vec<Token>> {
            Ok(self.tokens.read().await.values().cloned().collect())
        }

        async fn revoke(&self, id: Uuid) -> Result<()> {
            let mut tokens = self.tokens.write().await;
            let token = tokens.get_mut(&id).ok_or(ProxyError::TokenNotFound)?;
            if !token.is_active {
                return Err(ProxyError::Storage("already_revoked".to_string()));
            }
            token.is_active = false;
            Ok(())
        }

        async fn delete(&self, id: Uuid) -> Result<()> {
            self.tokens.write().await.remove(&id).map(|_| ()).ok_or(ProxyError::TokenNotFound)
        }

        async fn batch_revoke(&self, ids: &[Uuid]) -> Result<u64> {
            let mut tokens = self.tokens.write().await;
            let mut count = 0;
            for id in ids {
                if let Some(token) = tokens.get_mut(id) {
                    if token.is_active {
                        token.is_active = false;
                        count += 1;
                    }
                }
            }
            Ok(count)
        }

        async fn revoke_project(&self, project_id: &str) -> Result<u64> {
            let mut tokens = self.tokens.write().await;
            let mut count = 0;
            for token in tokens.values_mut() {
                if token.project_id == project_id && token.is_active {
                    token.is_active = false;
                    count += 1;
                }
            }
            Ok(count)
        }

        async fn revoke_expired(&self) -> Result<u64> {
            let now = Utc::now();
            let mut tokens = self.tokens.write().await;
            let mut count = 0;
            for token in tokens.values_mut() {
                if token.is_active && token.is_expired(now) {
                    token.is_active = false;
                    count += 1;
                }
            }
            Ok(count)
        }

        async fn reset_usage(&self, id: Uuid) -> Result<()> {
            let mut tokens = self.tokens.write().await;
            let token = tokens.get_mut(&id).ok_or(ProxyError::TokenNotFound)?;
            token.request_count = 0;
            Ok(())
        }

        async fn update_limit(&self, id: Uuid, max_requests: Option<u64>) -> Result<()> {
            let mut tokens = self.tokens.write().await;
            let token = tokens.get_mut(&id).ok_or(ProxyError::TokenNotFound)?;
            token.max_requests = max_requests;
            Ok(())
        }

        async fn increment_usage_batch(
            &self,
            deltas: HashMap<String, u64>,
            last_used_at: DateTime<Utc>,
        ) -> Result<()> {
            let mut tokens = self.tokens.write().await;
            for (secret, delta) in deltas {
                if let Some(token) = tokens.values_mut().find(|t| t.token == secret) {
                    token.request_count += delta;
                    token.last_used_at = Some(last_used_at);
                }
            }
            Ok(())
        }

        async fn increment_cache_hits_batch(
            &self,
            deltas: HashMap<String, u64>,
            last_used_at: DateTime<Utc>,
        ) -> Result<()> {
            let mut tokens = self.tokens.write().await;
            for (secret, delta) in deltas {
                if let Some(token) = tokens.values_mut().find(|t| t.token == secret) {
                    token.cache_hit_count += delta;
                    token.last_used_at = Some(last_used_at);
                }
            }
            Ok(())
        }

        async fn get_project(&self, project_id: &str) -> Result<Project> {
            self.projects
                .read()
                .await
                .get(project_id)
                .cloned()
                .ok_or(ProxyError::ProjectNotFound)
        }
    }
}
