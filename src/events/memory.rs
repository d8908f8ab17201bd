//! In-memory event bus: a `tokio::sync::broadcast` channel shared by every
//! subscriber. A subscriber that falls behind loses the events it couldn't
//! keep up with (lossy fan-out); the publisher never blocks.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::{EventBus, EventSubscription, ProxyEvent};

pub struct InMemoryEventBus {
    sender: broadcast::Sender<ProxyEvent>,
    dropped: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
}

impl InMemoryEventBus {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        Self { sender, dropped: Arc::new(AtomicU64::new(0)), stopped: Arc::new(AtomicBool::new(false)) }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    fn publish(&self, event: ProxyEvent) {
        // `send` only errors when there are no subscribers, which is not a
        // drop in the spec's sense (nobody was waiting for it).
        let _ = self.sender.send(event);
    }

    fn subscribe(&self) -> Box<dyn EventSubscription> {
        Box::new(MemorySubscription { receiver: self.sender.subscribe(), dropped: self.dropped.clone() })
    }

    async fn stop(&self, deadline: std::time::Duration) {
        self.stopped.store(true, Ordering::SeqCst);
        tokio::time::sleep(deadline.min(std::time::Duration::from_millis(50))).await;
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct MemorySubscription {
    receiver: broadcast::Receiver<ProxyEvent>,
    dropped: Arc<AtomicU64>,
}

#[async_trait]
impl EventSubscription for MemorySubscription {
    async fn recv(&mut self) -> Option<ProxyEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped.fetch_add(n, Ordering::Relaxed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
