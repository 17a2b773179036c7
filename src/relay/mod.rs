//! Event relay: the pub/sub channel between publishers and gateways.
//!
//! Two backends implement [`Relay`]:
//!
//! - `RedisRelay`: Redis Pub/Sub, shared by every process of the deployment
//! - `MemoryRelay`: in-process stand-in used when no relay URL is configured
//!   or Redis cannot be reached at startup
//!
//! Delivery is best-effort and at-most-once in both backends: a subscriber
//! that attaches after a message is published never sees it.
//!
//! Use `create_relay()` to pick the backend from configuration.

mod factory;
mod health;
mod memory;
mod redis_relay;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

pub use factory::create_relay;
pub use health::{RelayHealth, RelayHealthStats, RelayHealthStatus};
pub use memory::MemoryRelay;
pub use redis_relay::RedisRelay;

/// Stream of raw messages received on a subscribed topic.
///
/// The stream ends when the underlying subscription is lost.
pub type RelayStream = BoxStream<'static, String>;

/// Errors that can occur while talking to the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The relay did not answer in time
    #[error("Relay timed out after {0}ms")]
    Timeout(u64),

    /// The relay cannot be used right now
    #[error("Relay unavailable: {0}")]
    Unavailable(String),
}

/// Publish/subscribe capability shared by all relay backends.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Short backend name for logs and health output
    fn backend_name(&self) -> &'static str;

    /// True when messages never leave this process
    fn is_local(&self) -> bool {
        false
    }

    /// Publish a serialized message on a topic.
    async fn publish(&self, topic: &str, message: &str) -> Result<(), RelayError>;

    /// Subscribe to a topic. Messages published before this returns are not
    /// delivered.
    async fn subscribe(&self, topic: &str) -> Result<RelayStream, RelayError>;

    /// Current connection health
    fn health(&self) -> RelayHealthStats;
}
