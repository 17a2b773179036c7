//! Connection handle and related types

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::websocket::OutboundMessage;

/// Lifecycle of a live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open = 0,
    Closing = 1,
    Closed = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Open,
            1 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Why a send to one connection did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("connection is not open")]
    NotOpen,
    #[error("connection send queue is closed")]
    Closed,
    #[error("send timed out")]
    Timeout,
}

/// Handle for a single WebSocket connection
pub struct ConnectionHandle {
    pub id: Uuid,
    sender: mpsc::Sender<OutboundMessage>,
    pub connected_at: DateTime<Utc>,
    /// Last activity timestamp (Unix seconds) - using AtomicI64 for lock-free updates
    last_activity: AtomicI64,
    state: AtomicU8,
    closed: Notify,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::Sender<OutboundMessage>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            sender,
            connected_at: now,
            last_activity: AtomicI64::new(now.timestamp()),
            state: AtomicU8::new(ConnectionState::Open as u8),
            closed: Notify::new(),
        }
    }

    pub fn update_activity(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Open and its send task still running
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open && !self.sender.is_closed()
    }

    /// Move to `Closing`; returns false if the connection was already past `Open`
    pub fn mark_closing(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Open as u8,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn mark_closed(&self) {
        let previous = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if previous != ConnectionState::Closed as u8 {
            self.closed.notify_one();
        }
    }

    /// Resolves once the registry has closed this connection
    pub async fn closed(&self) {
        self.closed.notified().await
    }

    /// Queue a message, waiting at most `timeout` for queue space.
    pub async fn send(&self, message: OutboundMessage, timeout: Duration) -> Result<(), SendError> {
        if self.state() != ConnectionState::Open {
            return Err(SendError::NotOpen);
        }

        match tokio::time::timeout(timeout, self.sender.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SendError::Closed),
            Err(_) => Err(SendError::Timeout),
        }
    }

    /// Queue a control frame regardless of state, without waiting
    pub fn try_send_control(&self, message: OutboundMessage) -> bool {
        self.sender.try_send(message).is_ok()
    }
}
