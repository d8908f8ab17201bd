//! Redis Streams event bus: `XADD` with a capped length; subscribers read
//! via a consumer group and reconnect with exponential backoff on failure.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{EventBus, EventSubscription, ProxyEvent};

pub struct RedisStreamEventBus {
    client: redis::Client,
    stream_name: String,
    max_len: usize,
    consumer_group: String,
    dropped: Arc<AtomicU64>,
    healthy: Arc<AtomicBool>,
}

impl RedisStreamEventBus {
    pub fn new(
        client: redis::Client,
        stream_name: impl Into<String>,
        max_len: usize,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            client,
            stream_name: stream_name.into(),
            max_len,
            consumer_group: consumer_group.into(),
            dropped: Arc::new(AtomicU64::new(0)),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventBus for RedisStreamEventBus {
    fn publish(&self, event: ProxyEvent) {
        let client = self.client.clone();
        let stream_name = self.stream_name.clone();
        let max_len = self.max_len;
        let healthy = self.healthy.clone();
        let dropped = self.dropped.clone();

        // Publish is fire-and-forget: the request path must never block on
        // a Redis round-trip to emit telemetry.
        tokio::spawn(async move {
            let json = match serde_json::to_string(&*event) {
                Ok(json) => json,
                Err(_) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            };

            let result: Result<String, redis::RedisError> = async {
                let mut conn = client.get_async_connection().await?;
                redis::cmd("XADD")
                    .arg(&stream_name)
                    .arg("MAXLEN")
                    .arg("~")
                    .arg(max_len)
                    .arg("*")
                    .arg("event")
                    .arg(&json)
                    .query_async(&mut conn)
                    .await
            }
            .await;

            match result {
                Ok(_) => healthy.store(true, Ordering::Relaxed),
                Err(err) => {
                    healthy.store(false, Ordering::Relaxed);
                    dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %err, "redis stream publish failed, event dropped");
                }
            }
        });
    }

    fn subscribe(&self) -> Box<dyn EventSubscription> {
        let (tx, rx) = mpsc::channel(256);
        let client = self.client.clone();
        let stream_name = self.stream_name.clone();
        let consumer_group = self.consumer_group.clone();
        let healthy = self.healthy.clone();

        tokio::spawn(async move {
            let consumer_name = format!("consumer-{}", uuid::Uuid::now_v7());
            let mut backoff = std::time::Duration::from_millis(100);
            loop {
                let mut conn = match client.get_async_connection().await {
                    Ok(conn) => conn,
                    Err(_) => {
                        healthy.store(false, Ordering::Relaxed);
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(std::time::Duration::from_secs(30));
                        continue;
                    }
                };

                let _: std::result::Result<(), redis::RedisError> = redis::cmd("XGROUP")
                    .arg("CREATE")
                    .arg(&stream_name)
                    .arg(&consumer_group)
                    .arg("$")
                    .arg("MKSTREAM")
                    .query_async(&mut conn)
                    .await;

                let read: std::result::Result<
                    Vec<(String, Vec<(String, Vec<(String, String)>)>)>,
                    redis::RedisError,
                > = redis::cmd("XREADGROUP")
                    .arg("GROUP")
                    .arg(&consumer_group)
                    .arg(&consumer_name)
                    .arg("COUNT")
                    .arg(32)
                    .arg("BLOCK")
                    .arg(1000)
                    .arg("STREAMS")
                    .arg(&stream_name)
                    .arg(">")
                    .query_async(&mut conn)
                    .await;

                match read {
                    Ok(streams) => {
                        healthy.store(true, Ordering::Relaxed);
                        backoff = std::time::Duration::from_millis(100);
                        for (_, entries) in streams {
                            for (entry_id, fields) in entries {
                                if let Some((_, json)) =
                                    fields.into_iter().find(|(name, _)| name == "event")
                                {
                                    if let Ok(record) = serde_json::from_str(&json) {
                                        if tx.send(Arc::new(record)).await.is_err() {
                                            return;
                                        }
                                    }
                                }
                                let _: std::result::Result<u64, redis::RedisError> =
                                    redis::cmd("XACK")
                                        .arg(&stream_name)
                                        .arg(&consumer_group)
                                        .arg(entry_id)
                                        .query_async(&mut conn)
                                        .await;
                            }
                        }
                    }
                    Err(_) => {
                        healthy.store(false, Ordering::Relaxed);
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(std::time::Duration::from_secs(30));
                    }
                }
            }
        });

        Box::new(RedisSubscription { receiver: rx })
    }

    async fn stop(&self, deadline: std::time::Duration) {
        tokio::time::sleep(deadline.min(std::time::Duration::from_millis(50))).await;
    }

    fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct RedisSubscription {
    receiver: mpsc::Receiver<ProxyEvent>,
}

#[async_trait]
impl EventSubscription for RedisSubscription {
    async fn recv(&mut self) -> Option<ProxyEvent> {
        self.receiver.recv().await
    }
}
