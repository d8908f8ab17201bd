//! `llm-proxy` server binary.
//!
//! Loads configuration from `.env` plus the environment, wires a token
//! store, and serves the transparent proxy until `Ctrl-C`.

use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{info, warn};

use llm_proxy::config::{AppConfig, ServerArgs};
use llm_proxy::server;
use llm_proxy::token::codec::obfuscate_token;
use llm_proxy::token::store::memory::InMemoryTokenStore;
use llm_proxy::token::store::{Project, Token};
use llm_proxy::token::TokenStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(err) = dotenv() {
        eprintln!("no .env file loaded ({err}); reading configuration from the environment");
    }

    tracing_subscriber::fmt::init();

    let args = ServerArgs::parse();
    let config = AppConfig::from_args(&args);
    info!(?config, "starting llm-proxy");

    let store = default_store().await;

    server::serve(store, config).await
}

/// Persistence is an external collaborator (SQL, Redis, whatever the
/// deployment backs tokens with); this binary has none of those wired in,
/// so it falls back to an in-memory store seeded with one demo project and
/// token purely so the proxy is reachable out of the box.
async fn default_store() -> Arc<dyn TokenStore> {
    warn!("no persistent token store configured; using a seeded in-memory store (tokens do not survive a restart)");

    let store = InMemoryTokenStore::new();
    let now = chrono::Utc::now();

    store
        .seed_project(Project {
            id: "demo".to_string(),
            name: "demo project".to_string(),
            api_key: std::env::var("DEMO_UPSTREAM_API_KEY").unwrap_or_else(|_| "sk-demo-upstream".to_string()),
            is_active: true,
            created_at: now,
            updated_at: now,
            deactivated_at: None,
        })
        .await;

    let demo_token = llm_proxy::token::codec::generate_token();
    info!(token = %obfuscate_token(&demo_token), "seeded demo token for project \"demo\"");

    store
        .seed_token(Token {
            id: uuid::Uuid::now_v7(),
            token: demo_token,
            project_id: "demo".to_string(),
            expires_at: None,
            is_active: true,
            request_count: 0,
            max_requests: None,
            created_at: now,
            last_used_at: None,
            cache_hit_count: 0,
        })
        .await;

    Arc::new(store)
}
