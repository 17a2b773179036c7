//! Relay backend factory

use std::sync::Arc;

use crate::config::RelayConfig;

use super::{MemoryRelay, RedisRelay, Relay};

/// Create a relay backend based on configuration.
///
/// - no `url`: in-memory relay (single process only)
/// - `url` set: Redis relay, verified with a PING bounded by `connect_timeout_ms`
///
/// When Redis cannot be reached and `fallback_to_memory` is set, the
/// in-memory relay is returned instead. Otherwise the Redis relay is kept and
/// reconnects on first use.
pub async fn create_relay(config: &RelayConfig) -> Arc<dyn Relay> {
    let Some(url) = config.url.as_deref().filter(|u| !u.is_empty()) else {
        tracing::info!(backend = "memory", "No relay URL configured, using in-memory relay");
        return Arc::new(MemoryRelay::new());
    };

    let relay = match RedisRelay::new(url, config.connect_timeout()) {
        Ok(relay) => relay,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid relay URL, falling back to in-memory relay");
            return Arc::new(MemoryRelay::new());
        }
    };

    match relay.ping().await {
        Ok(()) => {
            tracing::info!(backend = "redis", topic = %config.topic, "Creating Redis relay");
            Arc::new(relay)
        }
        Err(e) if config.fallback_to_memory => {
            tracing::error!(
                error = %e,
                "Redis relay unreachable, falling back to in-memory relay"
            );
            Arc::new(MemoryRelay::new())
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Redis relay unreachable, will keep retrying on use"
            );
            Arc::new(relay)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_no_url_uses_memory() {
        let relay = create_relay(&RelayConfig::default()).await;
        assert_eq!(relay.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_unreachable_redis_falls_back_to_memory() {
        let config = RelayConfig {
            url: Some("redis://127.0.0.1:1".to_string()),
            connect_timeout_ms: 200,
            ..Default::default()
        };
        let relay = create_relay(&config).await;
        assert_eq!(relay.backend_name(), "memory");
    }

    #[tokio::test]
    async fn test_unreachable_redis_kept_without_fallback() {
        let config = RelayConfig {
            url: Some("redis://127.0.0.1:1".to_string()),
            connect_timeout_ms: 200,
            fallback_to_memory: false,
            ..Default::default()
        };
        let relay = create_relay(&config).await;
        assert_eq!(relay.backend_name(), "redis");
    }
}
