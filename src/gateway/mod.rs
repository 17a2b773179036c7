//! Realtime gateway: forwards every relay message to every live connection.
//!
//! The gateway owns the process-wide relay subscription (started lazily and
//! at most once) and a FIFO buffer for messages that arrive while that
//! subscription is not active. Activation flushes the buffer in receipt order
//! before any newer message is delivered.

mod bridge;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::config::{RelayConfig, WebSocketConfig};
use crate::connection_manager::{ConnectionRegistry, FanoutResult};
use crate::event::Event;
use crate::metrics::GatewayMetrics;
use crate::relay::Relay;
use crate::telemetry::attributes;
use crate::websocket::OutboundMessage;

/// What happened to one relay message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Not a valid event; dropped
    Rejected,
    /// Held until the subscription becomes active
    Buffered,
    /// Already delivered from the buffer when the subscription came up
    Duplicate,
    /// Sent to the registered connections
    Delivered(FanoutResult),
}

struct Pending {
    id: String,
    message: Arc<str>,
    /// Published by this process, so the relay may still hand it back
    local: bool,
}

#[derive(Default)]
struct DeliveryState {
    active: bool,
    buffer: VecDeque<Pending>,
    /// Ids of local messages flushed from the buffer, skipped if the relay
    /// delivers them again
    flushed_local: VecDeque<String>,
}

#[derive(Default)]
struct GatewayCounters {
    received: AtomicU64,
    rejected: AtomicU64,
    delivered: AtomicU64,
    pruned: AtomicU64,
    buffer_dropped: AtomicU64,
    duplicates: AtomicU64,
}

/// Snapshot for `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub started: bool,
    pub subscription_active: bool,
    pub buffered: usize,
    pub received: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub pruned: u64,
    pub buffer_dropped: u64,
    pub duplicates: u64,
}

pub struct Gateway {
    registry: Arc<ConnectionRegistry>,
    relay: Arc<dyn Relay>,
    topic: String,
    resubscribe_delay: Duration,
    max_buffered: usize,
    /// Guards the active flag and the buffer; held across a fan-out so
    /// deliveries never interleave
    state: Mutex<DeliveryState>,
    active: AtomicBool,
    buffered: AtomicUsize,
    started: AtomicBool,
    shutdown: broadcast::Sender<()>,
    counters: GatewayCounters,
}

impl Gateway {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        relay: Arc<dyn Relay>,
        relay_config: &RelayConfig,
        ws_config: &WebSocketConfig,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            registry,
            relay,
            topic: relay_config.topic.clone(),
            resubscribe_delay: relay_config.resubscribe_delay(),
            max_buffered: ws_config.max_buffered_messages.max(1),
            state: Mutex::new(DeliveryState::default()),
            active: AtomicBool::new(false),
            buffered: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            shutdown,
            counters: GatewayCounters::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn relay(&self) -> &Arc<dyn Relay> {
        &self.relay
    }

    /// Start the relay subscription unless it is already running.
    ///
    /// Safe to call on every upgrade request; returns true only for the call
    /// that actually started it.
    pub fn ensure_started(self: &Arc<Self>) -> bool {
        if self.started.swap(true, Ordering::AcqRel) {
            return false;
        }

        tracing::info!(
            topic = %self.topic,
            backend = self.relay.backend_name(),
            "Starting relay subscription"
        );

        let gateway = self.clone();
        let shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(bridge::run(gateway, shutdown_rx));
        true
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Handle one message received from the relay.
    #[tracing::instrument(name = "gateway.deliver", skip_all)]
    pub async fn deliver(&self, raw: &str) -> Delivery {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let event = match Event::from_json(raw) {
            Ok(event) => event,
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                GatewayMetrics::record_invalid();
                tracing::warn!(error = %e, "Dropping malformed relay message");
                return Delivery::Rejected;
            }
        };

        let span = tracing::Span::current();
        let id_attr = attributes::event_id(event.id());
        span.set_attribute(id_attr.key, id_attr.value);
        let type_attr = attributes::event_type(event.kind().as_str());
        span.set_attribute(type_attr.key, type_attr.value);

        let message: Arc<str> = Arc::from(raw);
        let mut state = self.state.lock().await;

        if !state.active {
            self.push_pending(
                &mut state,
                Pending {
                    id: event.id().to_string(),
                    message,
                    local: false,
                },
            );
            tracing::debug!(
                event_id = %event.id(),
                buffered = state.buffer.len(),
                "Subscription inactive, message buffered"
            );
            return Delivery::Buffered;
        }

        if let Some(pos) = state.flushed_local.iter().position(|id| id == event.id()) {
            state.flushed_local.remove(pos);
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(event_id = %event.id(), "Skipping message already flushed from buffer");
            return Delivery::Duplicate;
        }

        let result = self.fan_out(message).await;
        let delivered_attr = attributes::delivered_count(result.delivered);
        span.set_attribute(delivered_attr.key, delivered_attr.value);
        Delivery::Delivered(result)
    }

    /// Hold a message published by this process while the subscription is
    /// down.
    ///
    /// Returns false when the subscription is active (or was never started) and
    /// the message should travel through the relay as usual. Decided under the
    /// delivery lock, so a held message is flushed before any message the
    /// relay delivers after activation.
    pub async fn hold_if_inactive(&self, id: &str, message: &str) -> bool {
        if !self.is_started() {
            return false;
        }

        let mut state = self.state.lock().await;
        if state.active {
            return false;
        }

        self.counters.received.fetch_add(1, Ordering::Relaxed);
        self.push_pending(
            &mut state,
            Pending {
                id: id.to_string(),
                message: Arc::from(message),
                local: true,
            },
        );
        tracing::debug!(
            event_id = %id,
            buffered = state.buffer.len(),
            "Subscription inactive, local message held"
        );
        true
    }

    fn push_pending(&self, state: &mut DeliveryState, pending: Pending) {
        if state.buffer.len() >= self.max_buffered {
            state.buffer.pop_front();
            self.counters.buffer_dropped.fetch_add(1, Ordering::Relaxed);
            GatewayMetrics::record_buffer_dropped();
            tracing::warn!(
                max_buffered = self.max_buffered,
                "Gateway buffer full, dropping oldest message"
            );
        }
        state.buffer.push_back(pending);
        self.set_buffered(state.buffer.len());
    }

    async fn fan_out(&self, message: Arc<str>) -> FanoutResult {
        let started = Instant::now();
        let result = self.registry.broadcast(message).await;

        self.counters
            .delivered
            .fetch_add(result.delivered as u64, Ordering::Relaxed);
        self.counters
            .pruned
            .fetch_add(result.pruned as u64, Ordering::Relaxed);
        GatewayMetrics::record_fanout(
            result.delivered,
            result.pruned,
            started.elapsed().as_secs_f64(),
        );

        tracing::debug!(
            delivered = result.delivered,
            pruned = result.pruned,
            elapsed_us = started.elapsed().as_micros() as u64,
            "Fan-out complete"
        );

        result
    }

    /// Mark the subscription active, first flushing buffered messages in order.
    ///
    /// Returns the number of messages flushed.
    pub async fn activate(&self) -> usize {
        let mut state = self.state.lock().await;
        let pending: Vec<Pending> = state.buffer.drain(..).collect();
        let flushed = pending.len();

        if flushed > 0 {
            tracing::info!(count = flushed, "Flushing buffered messages");
        }
        for entry in pending {
            self.fan_out(entry.message).await;
            if entry.local {
                if state.flushed_local.len() >= self.max_buffered {
                    state.flushed_local.pop_front();
                }
                state.flushed_local.push_back(entry.id);
            }
        }

        state.active = true;
        self.active.store(true, Ordering::Release);
        self.set_buffered(0);
        flushed
    }

    /// Mark the subscription inactive; later messages are buffered.
    pub async fn deactivate(&self) {
        let mut state = self.state.lock().await;
        state.active = false;
        self.active.store(false, Ordering::Release);
    }

    fn set_buffered(&self, count: usize) {
        self.buffered.store(count, Ordering::Relaxed);
        GatewayMetrics::set_buffered(count);
    }

    /// Stop the relay subscription and close every connection.
    pub async fn stop(&self) -> usize {
        // A stopped gateway is never started again
        self.started.store(true, Ordering::Release);
        let _ = self.shutdown.send(());
        self.deactivate().await;

        let closed = self.registry.close_all(OutboundMessage::shutdown());
        tracing::info!(closed = closed, "Gateway stopped");
        closed
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            started: self.is_started(),
            subscription_active: self.is_active(),
            buffered: self.buffered.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            pruned: self.counters.pruned.load(Ordering::Relaxed),
            buffer_dropped: self.counters.buffer_dropped.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
        }
    }
}
