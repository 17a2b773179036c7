//! Relay subscription loop.
//!
//! Subscribes to the relay topic, activates the gateway, forwards every
//! message, and on loss of the subscription deactivates the gateway and tries
//! again after the resubscribe delay. Runs until the shutdown signal fires.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;

use super::Gateway;
use crate::metrics::RelayMetrics;

pub(super) async fn run(gateway: Arc<Gateway>, mut shutdown_rx: broadcast::Receiver<()>) {
    loop {
        match gateway.relay.subscribe(&gateway.topic).await {
            Ok(mut stream) => {
                RelayMetrics::set_subscribed(true);
                let flushed = gateway.activate().await;
                tracing::info!(
                    topic = %gateway.topic,
                    flushed = flushed,
                    "Relay subscription active"
                );

                let stopped = loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            tracing::info!("Received shutdown signal");
                            break true;
                        }
                        message = stream.next() => {
                            match message {
                                Some(raw) => {
                                    RelayMetrics::record_received();
                                    gateway.deliver(&raw).await;
                                }
                                None => {
                                    tracing::warn!("Relay message stream ended");
                                    break false;
                                }
                            }
                        }
                    }
                };

                gateway.deactivate().await;
                RelayMetrics::set_subscribed(false);

                if stopped {
                    return;
                }
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    delay_secs = gateway.resubscribe_delay.as_secs(),
                    "Relay subscription failed"
                );
            }
        }

        RelayMetrics::record_resubscribe();
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("Relay subscription stopped during resubscribe delay");
                return;
            }
            _ = tokio::time::sleep(gateway.resubscribe_delay) => {
                tracing::info!(topic = %gateway.topic, "Re-subscribing to relay");
            }
        }
    }
}
