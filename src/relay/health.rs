//! Relay connection health tracking

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use serde::Serialize;

use crate::event::current_time_ms;

/// Relay connection health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayHealthStatus {
    /// Relay is connected and healthy
    Healthy,
    /// Relay is disconnected, attempting to reconnect
    Reconnecting,
    /// Running on the in-process stand-in; nothing leaves this process
    Local,
}

impl RelayHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayHealthStatus::Healthy => "healthy",
            RelayHealthStatus::Reconnecting => "reconnecting",
            RelayHealthStatus::Local => "local",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => RelayHealthStatus::Healthy,
            2 => RelayHealthStatus::Local,
            _ => RelayHealthStatus::Reconnecting,
        }
    }
}

/// Relay health tracker
pub struct RelayHealth {
    status: AtomicU8,
    last_connected: AtomicI64,
    reconnection_attempts: AtomicU32,
    total_reconnections: AtomicU32,
}

impl RelayHealth {
    pub fn new() -> Self {
        Self::with_status(RelayHealthStatus::Reconnecting)
    }

    /// Tracker for a backend that never leaves the process
    pub fn local() -> Self {
        Self::with_status(RelayHealthStatus::Local)
    }

    fn with_status(status: RelayHealthStatus) -> Self {
        Self {
            status: AtomicU8::new(status as u8),
            last_connected: AtomicI64::new(0),
            reconnection_attempts: AtomicU32::new(0),
            total_reconnections: AtomicU32::new(0),
        }
    }

    /// Mark the relay as connected
    pub fn set_connected(&self) {
        let previous = self
            .status
            .swap(RelayHealthStatus::Healthy as u8, Ordering::AcqRel);
        self.last_connected
            .store(current_time_ms(), Ordering::Release);

        if previous != RelayHealthStatus::Healthy as u8
            && self.reconnection_attempts.load(Ordering::Acquire) > 0
        {
            self.total_reconnections.fetch_add(1, Ordering::AcqRel);
        }
        self.reconnection_attempts.store(0, Ordering::Release);
    }

    /// Mark the relay as reconnecting
    pub fn set_reconnecting(&self) {
        self.status
            .store(RelayHealthStatus::Reconnecting as u8, Ordering::Release);
        self.reconnection_attempts.fetch_add(1, Ordering::AcqRel);
    }

    /// Get current status
    pub fn status(&self) -> RelayHealthStatus {
        RelayHealthStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Local and healthy relays can both carry messages
    pub fn is_healthy(&self) -> bool {
        self.status() != RelayHealthStatus::Reconnecting
    }

    /// Get statistics snapshot
    pub fn stats(&self) -> RelayHealthStats {
        RelayHealthStats {
            status: self.status(),
            last_connected_ms: self.last_connected.load(Ordering::Acquire),
            reconnection_attempts: self.reconnection_attempts.load(Ordering::Acquire),
            total_reconnections: self.total_reconnections.load(Ordering::Acquire),
        }
    }
}

impl Default for RelayHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay health statistics
#[derive(Debug, Clone, Serialize)]
pub struct RelayHealthStats {
    pub status: RelayHealthStatus,
    pub last_connected_ms: i64,
    pub reconnection_attempts: u32,
    pub total_reconnections: u32,
}
