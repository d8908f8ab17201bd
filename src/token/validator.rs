//! Token validator (component C): enforces the active/expired/quota rules
//! in a fixed order, backed by the validation cache.

use std::sync::Arc;

use crate::error::{ProxyError, Result};
use crate::token::cache::ValidationCache;
use crate::token::codec;
use crate::token::store::{Token, TokenStore};

pub struct TokenValidator {
    store: Arc<dyn TokenStore>,
    cache: Arc<ValidationCache>,
}

/// Outcome of a successful validation: enough to drive admission and usage
/// accounting without a second store round-trip.
pub struct Validated {
    pub project_id: String,
    pub token: Token,
}

impl TokenValidator {
    pub fn new(store: Arc<dyn TokenStore>, cache: Arc<ValidationCache>) -> Self {
        Self { store, cache }
    }

    /// Format check → lookup (cached) → active → expiry → quota, in that
    /// order; the first failing predicate determines the error kind.
    pub async fn validate(&self, secret: &str) -> Result<Validated> {
        codec::validate_format(secret)?;

        let token = match self.cache.get(secret).await {
            Some(token) => token,
            None => {
                let token = self.store.get_by_token(secret).await?;
                if token.is_active && !token.is_over_limit() {
                    self.cache.insert(secret.to_string(), token.clone()).await;
                }
                token
            }
        };

        if !token.is_active {
            return Err(ProxyError::TokenInactive);
        }
        if token.is_expired(chrono::Utc::now()) {
            return Err(ProxyError::TokenExpired);
        }
        if token.is_over_limit() {
            return Err(ProxyError::TokenRateLimit);
        }

        Ok(Validated { project_id: token.project_id.clone(), token })
    }

    /// Validates, then accounts usage for limited tokens synchronously so
    /// the *next* call observes the new count. Unlimited tokens are left to
    /// the async usage aggregator (see `proxy::usage`) and are not
    /// incremented here.
    pub async fn validate_with_tracking(&self, secret: &str) -> Result<Validated> {
        let validated = self.validate(secret).await?;

        if validated.token.is_limited() {
            let updated = self
                .store
                .increment_usage(secret)
                .await
                .map_err(|_| ProxyError::Storage("usage increment failed".to_string()))?;
            self.cache.invalidate(secret).await;
            if updated.is_active && !updated.is_over_limit() {
                self.cache.insert(secret.to_string(), updated.clone()).await;
            }
            return Ok(Validated { project_id: updated.project_id.clone(), token: updated });
        }

        Ok(validated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::store::memory::InMemoryTokenStore;
    use chrono::Utc;
    use uuid::Uuid;

    async fn seed(max_requests: Option<u64>, request_count: u64) -> (Arc<InMemoryTokenStore>, String) {
        let store = Arc::new(InMemoryTokenStore::new());
        let secret = codec::generate_token();
        let token = crate::token::store::Token {
            id: Uuid::now_v7(),
            token: secret.clone(),
            project_id: "proj-1".to_string(),
            expires_at: None,
            is_active: true,
            request_count,
            max_requests,
            created_at: Utc::now(),
            last_used_at: None,
            cache_hit_count: 0,
        };
        store.seed_token(token).await;
        (store, secret)
    }

    fn validator(store: Arc<InMemoryTokenStore>) -> TokenValidator {
        let cache = Arc::new(ValidationCache::new(100, std::time::Duration::from_secs(300)));
        TokenValidator::new(store, cache)
    }

    #[tokio::test]
    async fn invalid_format_short_circuits_before_store() {
        let store = Arc::new(InMemoryTokenStore::new());
        let v = validator(store);
        let result = v.validate("not-a-token").await;
        assert!(matches!(result, Err(ProxyError::InvalidTokenFormat)));
    }

    #[tokio::test]
    async fn limited_token_rejects_after_quota_reached() {
        let (store, secret) = seed(Some(2), 2).await;
        let v = validator(store);
        let result = v.validate_with_tracking(&secret).await;
        assert!(matches!(result, Err(ProxyError::TokenRateLimit)));
    }

    #[tokio::test]
    async fn limited_token_increments_synchronously() {
        let (store, secret) = seed(Some(5), 0).await;
        let v = validator(store.clone());
        for _ in 0..5 {
            assert!(v.validate_with_tracking(&secret).await.is_ok());
        }
        let result = v.validate_with_tracking(&secret).await;
        assert!(matches!(result, Err(ProxyError::TokenRateLimit)));
    }

    #[tokio::test]
    async fn unlimited_token_never_rate_limited() {
        let (store, secret) = seed(None, 1_000_000).await;
        let v = validator(store);
        assert!(v.validate(&secret).await.is_ok());
    }
}
