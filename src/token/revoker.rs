//! Revoker (component F): soft revocation, batch/project-wide/expired-sweep
//! variants, and a periodic background sweep with a graceful-stop handshake.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{ProxyError, Result};
use crate::token::store::TokenStore;

pub struct Revoker {
    store: Arc<dyn TokenStore>,
}

impl Revoker {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Flips `is_active` to false. Returns `already_revoked` (surfaced as a
    /// storage error kind) if the token was already inactive.
    pub async fn revoke(&self, id: Uuid) -> Result<()> {
        self.store.revoke(id).await
    }

    /// Hard-deletes a token. An administrative operation, distinct from
    /// `revoke`, which traffic can never reverse through the store.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.store.delete(id).await
    }

    /// Counts successful flips, silently ignoring ids that are missing or
    /// already revoked.
    pub async fn batch_revoke(&self, ids: &[Uuid]) -> Result<u64> {
        self.store.batch_revoke(ids).await
    }

    pub async fn revoke_project(&self, project_id: &str) -> Result<u64> {
        self.store.revoke_project(project_id).await
    }

    pub async fn revoke_expired(&self) -> Result<u64> {
        self.store.revoke_expired().await
    }
}

/// Handle returned by [`spawn_automatic_revocation`]; dropping it does not
/// stop the task. Call `stop().await` for a graceful, acknowledged halt.
pub struct AutomaticRevocationTask {
    stop_tx: mpsc::Sender<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl AutomaticRevocationTask {
    pub async fn stop(self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.stop_tx.send(ack_tx).await.is_ok() {
            let _ = ack_rx.await;
        }
        let _ = self.handle.await;
    }
}

/// Ticks `revoke_expired` at `interval` until stopped. Mirrors the
/// graceful-stop pattern used elsewhere in this crate's background tasks: a
/// stop signal is sent on one channel, and acknowledged on another before
/// the caller proceeds.
pub fn spawn_automatic_revocation(
    revoker: Arc<Revoker>,
    interval: std::time::Duration,
) -> AutomaticRevocationTask {
    let (stop_tx, mut stop_rx) = mpsc::channel::<oneshot::Sender<()>>(1);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = revoker.revoke_expired().await {
                        tracing::warn!(error = %err, "automatic revocation sweep failed");
                    }
                }
                ack = stop_rx.recv() => {
                    if let Some(ack_tx) = ack {
                        let _ = ack_tx.send(());
                    }
                    break;
                }
            }
        }
    });

    AutomaticRevocationTask { stop_tx, handle }
}
