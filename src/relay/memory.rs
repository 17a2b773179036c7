//! In-process relay backed by tokio broadcast channels.
//!
//! Messages never leave the process. Publishing with no subscriber attached
//! succeeds and the message is dropped, matching the at-most-once contract of
//! the Redis backend.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use super::{Relay, RelayError, RelayHealth, RelayHealthStats, RelayStream};

/// Per-topic buffer before slow subscribers start lagging
const TOPIC_CAPACITY: usize = 1024;

/// In-memory relay.
pub struct MemoryRelay {
    /// topic -> broadcast sender
    topics: DashMap<String, broadcast::Sender<String>>,
    published: AtomicU64,
    delivered: AtomicU64,
    health: RelayHealth,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            health: RelayHealth::local(),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Total messages accepted by `publish`
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Total subscriber deliveries (one message to two subscribers counts twice)
    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Number of live subscriptions on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Relay for MemoryRelay {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn publish(&self, topic: &str, message: &str) -> Result<(), RelayError> {
        self.published.fetch_add(1, Ordering::Relaxed);

        match self.sender(topic).send(message.to_string()) {
            Ok(receivers) => {
                self.delivered.fetch_add(receivers as u64, Ordering::Relaxed);
                tracing::trace!(topic = %topic, receivers = receivers, "Published to memory relay");
            }
            Err(_) => {
                tracing::trace!(topic = %topic, "No memory relay subscribers, message dropped");
            }
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<RelayStream, RelayError> {
        let receiver = self.sender(topic).subscribe();
        let topic = topic.to_string();

        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let message = match item {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(topic = %topic, error = %e, "Memory relay subscriber lagged");
                    None
                }
            };
            futures::future::ready(message)
        });

        Ok(stream.boxed())
    }

    fn health(&self) -> RelayHealthStats {
        self.health.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let relay = MemoryRelay::new();
        relay.publish("websocket_messages", "{}").await.unwrap();

        assert_eq!(relay.published_count(), 1);
        assert_eq!(relay.delivered_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_order() {
        let relay = MemoryRelay::new();
        let mut stream = relay.subscribe("topic").await.unwrap();
        assert_eq!(relay.subscriber_count("topic"), 1);

        relay.publish("topic", "m1").await.unwrap();
        relay.publish("topic", "m2").await.unwrap();
        relay.publish("other", "ignored").await.unwrap();

        assert_eq!(stream.next().await.as_deref(), Some("m1"));
        assert_eq!(stream.next().await.as_deref(), Some("m2"));
        assert_eq!(relay.delivered_count(), 2);
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_messages() {
        let relay = MemoryRelay::new();
        relay.publish("topic", "early").await.unwrap();

        let mut stream = relay.subscribe("topic").await.unwrap();
        relay.publish("topic", "late").await.unwrap();

        assert_eq!(stream.next().await.as_deref(), Some("late"));
        let nothing = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(nothing.is_err());
    }
}
