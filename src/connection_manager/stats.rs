//! Connection statistics structures

use serde::Serialize;

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub total_registered: u64,
    pub total_pruned: u64,
}

/// Result of sending one message to every registered connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FanoutResult {
    /// Connections that accepted the message
    pub delivered: usize,
    /// Connections removed because they were not open or the send failed
    pub pruned: usize,
}
