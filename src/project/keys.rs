//! Project-API-key lookup (component L): a pure lookup feeding the proxy
//! with the upstream secret. Never cached in-core — secrets are held only
//! in the store.

use async_trait::async_trait;

use crate::error::{ProxyError, Result};
use crate::token::store::TokenStore;

#[async_trait]
pub trait ProjectKeyLookup: Send + Sync {
    async fn get_api_key_for_project(&self, project_id: &str) -> Result<String>;
}

#[async_trait]
impl<T: TokenStore + ?Sized> ProjectKeyLookup for T {
    async fn get_api_key_for_project(&self, project_id: &str) -> Result<String> {
        self.get_project(project_id)
            .await
            .map(|p| p.api_key)
            .map_err(|_| ProxyError::Internal("upstream key lookup failed".to_string()))
    }
}
