//! Redis Pub/Sub relay.
//!
//! Publishing goes through a lazily created multiplexed connection that is
//! dropped and re-established after connection errors. Each subscription uses
//! its own dedicated Pub/Sub connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tokio::sync::RwLock;

use super::{Relay, RelayError, RelayHealth, RelayHealthStats, RelayStream};

/// Redis-backed relay.
pub struct RedisRelay {
    /// Redis client for creating connections
    client: Client,
    /// Multiplexed connection used for PUBLISH (shared across tasks)
    connection: RwLock<Option<MultiplexedConnection>>,
    /// Health tracker
    health: Arc<RelayHealth>,
    /// Bound on connection establishment
    connect_timeout: Duration,
}

impl RedisRelay {
    /// Create a relay for the given URL. Does not connect yet.
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self, RelayError> {
        let client = Client::open(url)?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            health: Arc::new(RelayHealth::new()),
            connect_timeout,
        })
    }

    /// Get the publish connection, establishing it if needed.
    async fn get_connection(&self) -> Result<MultiplexedConnection, RelayError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, RelayError> {
        let mut conn_guard = self.connection.write().await;

        // Double-check in case another task connected while we waited
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        self.health.set_reconnecting();

        let connect = self.client.get_multiplexed_tokio_connection();
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(conn)) => {
                *conn_guard = Some(conn.clone());
                self.health.set_connected();
                tracing::info!("Relay publish connection established");
                Ok(conn)
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Failed to connect to Redis relay");
                Err(RelayError::Redis(e))
            }
            Err(_) => {
                let ms = self.connect_timeout.as_millis() as u64;
                tracing::error!(timeout_ms = ms, "Timed out connecting to Redis relay");
                Err(RelayError::Timeout(ms))
            }
        }
    }

    /// Forget the publish connection so the next call reconnects
    async fn reset_connection(&self) {
        let mut conn_guard = self.connection.write().await;
        *conn_guard = None;
        self.health.set_reconnecting();
    }

    /// Ping Redis to check connectivity.
    pub async fn ping(&self) -> Result<(), RelayError> {
        let mut conn = self.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl Relay for RedisRelay {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn publish(&self, topic: &str, message: &str) -> Result<(), RelayError> {
        let mut conn = self.get_connection().await?;

        let result: redis::RedisResult<i64> = conn.publish(topic, message).await;
        match result {
            Ok(receivers) => {
                tracing::trace!(topic = %topic, receivers = receivers, "Published to Redis relay");
                Ok(())
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    self.reset_connection().await;
                }
                Err(RelayError::Redis(e))
            }
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<RelayStream, RelayError> {
        let connect = self.client.get_async_pubsub();
        let mut pubsub = match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(result) => result?,
            Err(_) => return Err(RelayError::Timeout(self.connect_timeout.as_millis() as u64)),
        };

        pubsub.subscribe(topic).await?;
        self.health.set_connected();
        tracing::debug!(topic = %topic, "Subscribed to Redis relay topic");

        let health = self.health.clone();
        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| {
                let payload = match msg.get_payload::<String>() {
                    Ok(p) => Some(p),
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to get relay message payload");
                        None
                    }
                };
                futures::future::ready(payload)
            })
            .chain(futures::stream::once(async move {
                // Subscription connection ended; mark unhealthy, emit nothing
                health.set_reconnecting();
                None::<String>
            }).filter_map(futures::future::ready));

        Ok(stream.boxed())
    }

    fn health(&self) -> RelayHealthStats {
        self.health.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_rejected() {
        let result = RedisRelay::new("not a url", Duration::from_millis(100));
        assert!(matches!(result, Err(RelayError::Redis(_))));
    }

    #[test]
    fn test_new_relay_starts_reconnecting() {
        let relay = RedisRelay::new("redis://127.0.0.1:6379", Duration::from_millis(100)).unwrap();
        assert_eq!(relay.backend_name(), "redis");
        assert!(!relay.health.is_healthy());
    }

    #[tokio::test]
    async fn test_publish_to_unreachable_redis_fails_without_panicking() {
        // Port 1 is reserved and refuses connections
        let relay = RedisRelay::new("redis://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        assert!(relay.publish("topic", "{}").await.is_err());
        assert!(relay.subscribe("topic").await.is_err());
    }
}
