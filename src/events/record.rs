//! The event record emitted once per completed request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub type ProxyEvent = Arc<ProxyEventRecord>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEventRecord {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    /// Wall-clock time to handle the request, in milliseconds.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
    /// Redacted: `Authorization` and any configured sensitive headers are
    /// stripped before the event is built.
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    /// Bounded to a configured maximum size; larger bodies are truncated.
    pub response_body: Vec<u8>,
    pub project_id: Option<String>,
    /// Obfuscated via [`crate::token::obfuscate_token`]; never the raw
    /// secret.
    pub token_id: Option<String>,
    pub cache: CacheResult,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheResult {
    Hit,
    Miss,
    Bypass,
}
