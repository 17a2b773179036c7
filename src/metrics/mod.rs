//! Prometheus metrics for the real-time pipeline.
//!
//! - Connection metrics (active live connections, lifetimes)
//! - Publish metrics (events published, retries, failures)
//! - Relay metrics (subscription health, messages received)
//! - Gateway metrics (buffered messages, fan-out results)
//! - Polling feed metrics

mod helpers;

pub use helpers::{
    encode_metrics, FeedMetrics, GatewayMetrics, HeartbeatMetrics, PublishMetrics, RelayMetrics,
    WsMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "bookmark";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Total number of active live connections
    pub static ref CONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_connections_total", METRIC_PREFIX),
        "Total number of active live connections"
    ).unwrap();

    /// WebSocket connections opened
    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    /// WebSocket connections closed
    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// WebSocket upgrade attempts rejected (plain HTTP on the live endpoint)
    pub static ref WS_UPGRADES_REJECTED: IntCounter = register_int_counter!(
        format!("{}_ws_upgrades_rejected_total", METRIC_PREFIX),
        "Total requests to the live endpoint without a WebSocket upgrade"
    ).unwrap();

    /// Frames received from clients, by frame type
    pub static ref WS_MESSAGES_RECEIVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_ws_messages_received_total", METRIC_PREFIX),
        "Total WebSocket frames received from clients",
        &["type"]
    ).unwrap();

    /// WebSocket connection duration
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    // ============================================================================
    // Publish Metrics
    // ============================================================================

    /// Events handed to the relay, by event type
    pub static ref EVENTS_PUBLISHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_events_published_total", METRIC_PREFIX),
        "Total events published to the relay",
        &["type"]
    ).unwrap();

    /// Publish attempts that were retried
    pub static ref PUBLISH_RETRIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_publish_retries_total", METRIC_PREFIX),
        "Total publish attempts retried after a relay error"
    ).unwrap();

    /// Events dropped after all publish attempts failed
    pub static ref PUBLISH_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_publish_failures_total", METRIC_PREFIX),
        "Total events dropped after exhausting publish attempts"
    ).unwrap();

    // ============================================================================
    // Relay Metrics
    // ============================================================================

    /// Relay subscription status (1 = subscribed, 0 = not subscribed)
    pub static ref RELAY_SUBSCRIPTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_relay_subscription_status", METRIC_PREFIX),
        "Relay subscription status (1=subscribed, 0=not subscribed)"
    ).unwrap();

    /// Relay re-subscription attempts
    pub static ref RELAY_RESUBSCRIBES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_relay_resubscribes_total", METRIC_PREFIX),
        "Total relay re-subscription attempts"
    ).unwrap();

    /// Messages received from the relay
    pub static ref RELAY_MESSAGES_RECEIVED: IntCounter = register_int_counter!(
        format!("{}_relay_messages_received_total", METRIC_PREFIX),
        "Total messages received from the relay"
    ).unwrap();

    // ============================================================================
    // Gateway Metrics
    // ============================================================================

    /// Messages currently held while the relay subscription is inactive
    pub static ref GATEWAY_BUFFERED: IntGauge = register_int_gauge!(
        format!("{}_gateway_buffered_messages", METRIC_PREFIX),
        "Messages buffered while the relay subscription is inactive"
    ).unwrap();

    /// Buffered messages discarded because the buffer was full
    pub static ref GATEWAY_BUFFER_DROPPED: IntCounter = register_int_counter!(
        format!("{}_gateway_buffer_dropped_total", METRIC_PREFIX),
        "Buffered messages dropped because the buffer was full"
    ).unwrap();

    /// Relay messages rejected because they were not valid events
    pub static ref GATEWAY_INVALID_MESSAGES: IntCounter = register_int_counter!(
        format!("{}_gateway_invalid_messages_total", METRIC_PREFIX),
        "Relay messages rejected as malformed events"
    ).unwrap();

    /// Messages delivered to live connections (one per connection)
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages successfully delivered to connections"
    ).unwrap();

    /// Connections pruned during fan-out
    pub static ref CONNECTIONS_PRUNED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_pruned_total", METRIC_PREFIX),
        "Total connections removed after a failed or closed send"
    ).unwrap();

    /// Fan-out latency (one relay message to all connections)
    pub static ref FANOUT_LATENCY: Histogram = register_histogram!(
        format!("{}_fanout_latency_seconds", METRIC_PREFIX),
        "Fan-out latency in seconds",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).unwrap();

    // ============================================================================
    // Heartbeat Metrics
    // ============================================================================

    /// Heartbeat round duration in milliseconds
    pub static ref HEARTBEAT_DURATION_MS: Histogram = register_histogram!(
        format!("{}_heartbeat_duration_ms", METRIC_PREFIX),
        "Heartbeat round duration in milliseconds",
        vec![10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    ).unwrap();

    /// Connections closed by the stale sweep
    pub static ref STALE_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_stale_connections_closed_total", METRIC_PREFIX),
        "Total idle connections closed by the stale sweep"
    ).unwrap();

    // ============================================================================
    // Feed Metrics
    // ============================================================================

    /// Events currently retained for polling clients
    pub static ref FEED_EVENTS: IntGauge = register_int_gauge!(
        format!("{}_feed_events", METRIC_PREFIX),
        "Events retained in the change feed"
    ).unwrap();

    /// Polling requests served
    pub static ref POLL_REQUESTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_poll_requests_total", METRIC_PREFIX),
        "Total incremental update requests served"
    ).unwrap();
}
