//! Event bus (component J): buffered fan-out pub/sub for per-request
//! observability events, grounded on the broadcast-channel event bus this
//! codebase already uses elsewhere, generalized to a pluggable in-memory /
//! Redis-stream contract and a lossy-on-overflow subscriber policy.

pub mod memory;
pub mod record;
pub mod redis_stream;

pub use memory::InMemoryEventBus;
pub use record::{CacheResult, ProxyEvent, ProxyEventRecord};
pub use redis_stream::RedisStreamEventBus;

use async_trait::async_trait;

/// `Publish` never blocks the request path; `Subscribe` hands back an owned
/// stream of events; `Stop` drains subscribers within a bounded deadline.
#[async_trait]
pub trait EventBus: Send + Sync {
    fn publish(&self, event: ProxyEvent);
    fn subscribe(&self) -> Box<dyn EventSubscription>;
    async fn stop(&self, deadline: std::time::Duration);
    fn dropped_count(&self) -> u64;
}

#[async_trait]
pub trait EventSubscription: Send {
    /// Returns `None` once the bus has stopped and no events remain.
    async fn recv(&mut self) -> Option<ProxyEvent>;
}
