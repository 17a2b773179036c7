use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::stats::{ConnectionStats, FanoutResult};
use super::types::ConnectionHandle;
use crate::websocket::OutboundMessage;

/// Table of live connections in this process.
///
/// Fan-out works on a snapshot of the table, so connections may register or
/// leave while a broadcast is in flight. A connection that joins mid-broadcast
/// does not get that message; one that leaves is skipped.
pub struct ConnectionRegistry {
    /// connection_id -> ConnectionHandle
    connections: DashMap<Uuid, Arc<ConnectionHandle>>,
    /// Bound on a single send during fan-out
    send_timeout: Duration,
    total_registered: AtomicU64,
    total_pruned: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            send_timeout,
            total_registered: AtomicU64::new(0),
            total_pruned: AtomicU64::new(0),
        }
    }

    /// Register a new connection
    pub fn register(&self, sender: mpsc::Sender<OutboundMessage>) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new(sender));
        self.connections.insert(handle.id, handle.clone());
        self.total_registered.fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            connection_id = %handle.id,
            total = self.connections.len(),
            "Connection registered"
        );

        handle
    }

    /// Unregister a connection. Returns the handle if it was still registered.
    pub fn unregister(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        let (_, handle) = self.connections.remove(&connection_id)?;
        handle.mark_closed();

        tracing::info!(
            connection_id = %connection_id,
            total = self.connections.len(),
            "Connection unregistered"
        );

        Some(handle)
    }

    fn prune(&self, connection_id: Uuid, reason: &str) -> bool {
        if self.unregister(connection_id).is_some() {
            self.total_pruned.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(connection_id = %connection_id, reason = reason, "Pruned connection");
            true
        } else {
            false
        }
    }

    /// Send one serialized message to every registered connection.
    ///
    /// Each send is independent: a closed, slow or failing connection is
    /// removed and the rest still receive the message.
    pub async fn broadcast(&self, message: Arc<str>) -> FanoutResult {
        let mut result = FanoutResult::default();
        let mut sends = FuturesUnordered::new();

        for handle in self.get_all_connections() {
            if !handle.is_open() {
                if self.prune(handle.id, "not open") {
                    result.pruned += 1;
                }
                continue;
            }

            let message = OutboundMessage::Event(message.clone());
            let timeout = self.send_timeout;
            sends.push(async move {
                let outcome = handle.send(message, timeout).await;
                (handle.id, outcome)
            });
        }

        while let Some((connection_id, outcome)) = sends.next().await {
            match outcome {
                Ok(()) => result.delivered += 1,
                Err(e) => {
                    tracing::warn!(connection_id = %connection_id, error = %e, "Send failed");
                    if self.prune(connection_id, "send failed") {
                        result.pruned += 1;
                    }
                }
            }
        }

        result
    }

    /// Get all connections
    pub fn get_all_connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Get connection by ID
    pub fn get_connection(&self, connection_id: Uuid) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Get statistics
    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            total_connections: self.connections.len(),
            total_registered: self.total_registered.load(Ordering::Relaxed),
            total_pruned: self.total_pruned.load(Ordering::Relaxed),
        }
    }

    /// Find connections that have been inactive for longer than the timeout
    pub fn find_stale_connections(&self, timeout_secs: u64) -> Vec<Uuid> {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(timeout_secs as i64);

        self.connections
            .iter()
            .filter(|entry| now.signed_duration_since(entry.value().last_activity()) > timeout)
            .map(|entry| *entry.key())
            .collect()
    }

    /// Remove stale connections and return the count of removed connections
    pub fn cleanup_stale_connections(&self, timeout_secs: u64) -> usize {
        let stale = self.find_stale_connections(timeout_secs);
        let mut count = 0;

        for conn_id in stale {
            tracing::info!(connection_id = %conn_id, "Removing stale connection due to timeout");
            if let Some(handle) = self.unregister(conn_id) {
                handle.try_send_control(OutboundMessage::Close {
                    code: 1001,
                    reason: "Idle timeout".to_string(),
                });
                count += 1;
            }
        }

        count
    }

    /// Send `message` to every connection and remove them all.
    pub fn close_all(&self, message: OutboundMessage) -> usize {
        let ids: Vec<Uuid> = self.connections.iter().map(|r| *r.key()).collect();
        let mut closed = 0;

        for conn_id in ids {
            if let Some(handle) = self.connections.get(&conn_id).map(|h| h.clone()) {
                handle.mark_closing();
                handle.try_send_control(message.clone());
            }
            if self.unregister(conn_id).is_some() {
                closed += 1;
            }
        }

        closed
    }
}
