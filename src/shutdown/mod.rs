//! Graceful shutdown of the gateway process.
//!
//! 1. Signal background tasks (relay subscription, heartbeat) to stop
//! 2. Send every live connection a close frame (1000, "Server shutting down")
//! 3. Give the per-connection send tasks a moment to flush it

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::gateway::Gateway;

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time allowed for close frames to reach clients (default: 2 seconds)
    pub close_grace: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            close_grace: Duration::from_secs(2),
        }
    }
}

/// Coordinates shutdown of the gateway and background tasks
pub struct GracefulShutdown {
    gateway: Arc<Gateway>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(gateway: Arc<Gateway>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(gateway, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        gateway: Arc<Gateway>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            gateway,
            shutdown_tx,
            config,
        }
    }

    /// Execute the shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.gateway.registry().len())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();

        tracing::info!(reason = %reason, "Starting graceful shutdown - signaling background tasks");
        let _ = self.shutdown_tx.send(());

        tracing::info!("Closing client connections");
        let connections_closed = self.gateway.stop().await;

        if connections_closed > 0 {
            tokio::time::sleep(self.config.close_grace).await;
        }

        let result = ShutdownResult {
            success: true,
            connections_closed,
            duration: start.elapsed(),
        };

        tracing::info!(
            connections_closed = result.connections_closed,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }
}

/// Result of a graceful shutdown operation
#[derive(Debug, Default)]
pub struct ShutdownResult {
    pub success: bool,
    /// Connections sent a close frame
    pub connections_closed: usize,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use crate::config::{RelayConfig, WebSocketConfig};
    use crate::connection_manager::ConnectionRegistry;
    use crate::relay::MemoryRelay;
    use crate::websocket::OutboundMessage;

    fn gateway() -> Arc<Gateway> {
        Arc::new(Gateway::new(
            Arc::new(ConnectionRegistry::new(Duration::from_millis(50))),
            Arc::new(MemoryRelay::new()),
            &RelayConfig::default(),
            &WebSocketConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_shutdown_no_connections() {
        let (tx, _) = broadcast::channel(1);
        let shutdown = GracefulShutdown::new(gateway(), tx);

        let result = shutdown.execute("test shutdown").await;

        assert!(result.success);
        assert_eq!(result.connections_closed, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections_and_signals_tasks() {
        let gateway = gateway();
        let (conn_tx, mut conn_rx) = mpsc::channel(4);
        gateway.registry().register(conn_tx);

        let (tx, mut task_rx) = broadcast::channel(1);
        let shutdown = GracefulShutdown::with_config(
            gateway.clone(),
            tx,
            ShutdownConfig {
                close_grace: Duration::from_millis(10),
            },
        );

        let result = shutdown.execute("SIGTERM").await;

        assert_eq!(result.connections_closed, 1);
        assert!(task_rx.try_recv().is_ok());
        assert_eq!(conn_rx.recv().await, Some(OutboundMessage::shutdown()));
        assert!(gateway.registry().is_empty());
    }
}
