//! Redis-backed HTTP cache: JSON-encoded entries with Redis TTL enforcing
//! expiry. Errors are logged and swallowed by callers — caching is
//! advisory, never load-bearing for correctness.

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;

use super::{CachedResponse, ResponseCache};

pub struct RedisResponseCache {
    client: redis::Client,
    key_prefix: String,
    scan_count: usize,
}

impl RedisResponseCache {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>, scan_count: usize) -> Self {
        Self { client, key_prefix: key_prefix.into(), scan_count }
    }

    fn redis_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl ResponseCache for RedisResponseCache {
    async fn get(&self, key: &str) -> Option<CachedResponse> {
        let redis_key = self.redis_key(key);
        let result: Result<Option<String>, redis::RedisError> = async {
            let mut conn = self.client.get_async_connection().await?;
            conn.get(&redis_key).await
        }
        .await;

        match result {
            Ok(Some(json)) => match serde_json::from_str::<CachedResponse>(&json) {
                Ok(entry) if !entry.is_expired(Utc::now()) => Some(entry),
                Ok(_) => None,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to decode cached response");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "http cache get failed, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &str, entry: CachedResponse) {
        let now = Utc::now();
        if entry.is_expired(now) {
            return;
        }
        let ttl = (entry.expires_at - now).num_seconds().max(1) as u64;
        let redis_key = self.redis_key(key);
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode response for cache");
                return;
            }
        };

        let result: Result<(), redis::RedisError> = async {
            let mut conn = self.client.get_async_connection().await?;
            conn.set_ex(&redis_key, json, ttl).await
        }
        .await;

        if let Err(err) = result {
            tracing::warn!(error = %err, "http cache set failed");
        }
    }

    async fn purge(&self, key: &str) -> bool {
        let redis_key = self.redis_key(key);
        let result: Result<u64, redis::RedisError> = async {
            let mut conn = self.client.get_async_connection().await?;
            conn.del(&redis_key).await
        }
        .await;
        matches!(result, Ok(n) if n > 0)
    }

    async fn purge_prefix(&self, prefix: &str) -> u64 {
        let pattern = format!("{}{}*", self.key_prefix, prefix);
        let mut conn = match self.client.get_async_connection().await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(error = %err, "http cache purge_prefix failed to connect");
                return 0;
            }
        };

        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let scan: Result<(u64, Vec<String>), redis::RedisError> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(self.scan_count)
                .query_async(&mut conn)
                .await;

            let (next_cursor, keys) = match scan {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!(error = %err, "http cache purge_prefix scan failed, returning partial count");
                    return removed;
                }
            };

            if !keys.is_empty() {
                let deleted: Result<u64, redis::RedisError> = conn.del(&keys).await;
                removed += deleted.unwrap_or(0);
            }

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        removed
    }
}
