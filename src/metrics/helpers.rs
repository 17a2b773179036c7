//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_PRUNED_TOTAL, CONNECTIONS_TOTAL, EVENTS_PUBLISHED_TOTAL, FANOUT_LATENCY,
    FEED_EVENTS, GATEWAY_BUFFERED, GATEWAY_BUFFER_DROPPED, GATEWAY_INVALID_MESSAGES,
    HEARTBEAT_DURATION_MS, MESSAGES_DELIVERED_TOTAL, POLL_REQUESTS_TOTAL, PUBLISH_FAILURES_TOTAL,
    PUBLISH_RETRIES_TOTAL, RELAY_MESSAGES_RECEIVED, RELAY_RESUBSCRIBES_TOTAL,
    RELAY_SUBSCRIPTION_STATUS, STALE_CONNECTIONS_CLOSED, WS_CONNECTIONS_CLOSED,
    WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION, WS_MESSAGES_RECEIVED, WS_UPGRADES_REJECTED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for live connection metrics
pub struct WsMetrics;

impl WsMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
        CONNECTIONS_TOTAL.inc();
    }

    pub fn record_closed(duration_secs: f64) {
        WS_CONNECTIONS_CLOSED.inc();
        CONNECTIONS_TOTAL.dec();
        WS_CONNECTION_DURATION.observe(duration_secs);
    }

    pub fn record_upgrade_rejected() {
        WS_UPGRADES_REJECTED.inc();
    }

    /// Record a frame received from a client (`text`, `ping`, `pong`, `close`)
    pub fn record_frame(kind: &str) {
        WS_MESSAGES_RECEIVED.with_label_values(&[kind]).inc();
    }
}

/// Helper struct for publisher metrics
pub struct PublishMetrics;

impl PublishMetrics {
    pub fn record_published(event_type: &str) {
        EVENTS_PUBLISHED_TOTAL.with_label_values(&[event_type]).inc();
    }

    pub fn record_retry() {
        PUBLISH_RETRIES_TOTAL.inc();
    }

    pub fn record_failure() {
        PUBLISH_FAILURES_TOTAL.inc();
    }
}

/// Helper struct for relay subscription metrics
pub struct RelayMetrics;

impl RelayMetrics {
    pub fn set_subscribed(subscribed: bool) {
        RELAY_SUBSCRIPTION_STATUS.set(if subscribed { 1 } else { 0 });
    }

    pub fn record_resubscribe() {
        RELAY_RESUBSCRIBES_TOTAL.inc();
    }

    pub fn record_received() {
        RELAY_MESSAGES_RECEIVED.inc();
    }
}

/// Helper struct for gateway metrics
pub struct GatewayMetrics;

impl GatewayMetrics {
    pub fn set_buffered(count: usize) {
        GATEWAY_BUFFERED.set(count as i64);
    }

    pub fn record_buffer_dropped() {
        GATEWAY_BUFFER_DROPPED.inc();
    }

    pub fn record_invalid() {
        GATEWAY_INVALID_MESSAGES.inc();
    }

    /// Record the outcome of one fan-out
    pub fn record_fanout(delivered: usize, pruned: usize, latency_secs: f64) {
        MESSAGES_DELIVERED_TOTAL.inc_by(delivered as u64);
        CONNECTIONS_PRUNED_TOTAL.inc_by(pruned as u64);
        FANOUT_LATENCY.observe(latency_secs);
    }
}

/// Helper struct for heartbeat metrics
pub struct HeartbeatMetrics;

impl HeartbeatMetrics {
    /// Record heartbeat round duration
    pub fn record_duration_ms(duration_ms: u64) {
        HEARTBEAT_DURATION_MS.observe(duration_ms as f64);
    }

    /// Record connections closed for inactivity
    pub fn record_stale_closed(count: usize) {
        STALE_CONNECTIONS_CLOSED.inc_by(count as u64);
    }
}

/// Helper struct for change feed metrics
pub struct FeedMetrics;

impl FeedMetrics {
    pub fn set_retained(count: usize) {
        FEED_EVENTS.set(count as i64);
    }

    pub fn record_poll() {
        POLL_REQUESTS_TOTAL.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_metrics() {
        PublishMetrics::record_published("link_created");
        PublishMetrics::record_retry();
        PublishMetrics::record_failure();
        // Just verify no panics
    }

    #[test]
    fn test_ws_metrics() {
        WsMetrics::record_opened();
        WsMetrics::record_frame("ping");
        WsMetrics::record_closed(1.5);
        WsMetrics::record_upgrade_rejected();
        // Just verify no panics
    }

    #[test]
    fn test_gateway_metrics() {
        GatewayMetrics::set_buffered(2);
        GatewayMetrics::record_fanout(10, 1, 0.001);
        RelayMetrics::set_subscribed(true);
        RelayMetrics::record_received();
        FeedMetrics::set_retained(5);
        FeedMetrics::record_poll();
        // Just verify no panics
    }
}
