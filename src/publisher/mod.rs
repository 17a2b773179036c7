//! Broadcast publisher: the producer-facing entry point of the pipeline.
//!
//! Producers hand over a domain event and carry on. The publisher stamps it,
//! serializes it and publishes it on the relay topic, retrying transient
//! failures a fixed number of times. Failures are logged and reported as
//! `None`, never propagated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::{PublisherConfig, RelayConfig};
use crate::event::EventDraft;
use crate::feed::ChangeFeed;
use crate::gateway::Gateway;
use crate::metrics::PublishMetrics;
use crate::relay::Relay;

/// Publisher counters
#[derive(Debug, Default)]
struct PublisherCounters {
    published: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

/// Snapshot of publisher counters
#[derive(Debug, Clone, Serialize)]
pub struct PublisherStats {
    pub published: u64,
    pub failed: u64,
    pub retries: u64,
}

/// Stamps, serializes and publishes events on the relay.
pub struct BroadcastPublisher {
    relay: Arc<dyn Relay>,
    topic: String,
    max_attempts: u32,
    retry_delay: Duration,
    feed: Option<Arc<ChangeFeed>>,
    gateway: Option<Arc<Gateway>>,
    counters: PublisherCounters,
}

impl BroadcastPublisher {
    pub fn new(relay: Arc<dyn Relay>, relay_config: &RelayConfig, config: &PublisherConfig) -> Self {
        Self {
            relay,
            topic: relay_config.topic.clone(),
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
            feed: None,
            gateway: None,
            counters: PublisherCounters::default(),
        }
    }

    /// Also record every published event in a change feed for polling clients.
    pub fn with_feed(mut self, feed: Arc<ChangeFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Hand events to this process's gateway while its relay subscription is
    /// down, so local connections still get them once it comes back.
    pub fn with_gateway(mut self, gateway: Arc<Gateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Publish a domain event.
    ///
    /// Returns the assigned message id, or `None` when the event could not be
    /// serialized or every publish attempt failed.
    #[tracing::instrument(
        skip_all,
        fields(event_type = tracing::field::Empty, message_id = tracing::field::Empty)
    )]
    pub async fn broadcast(&self, draft: impl Into<EventDraft>) -> Option<String> {
        let event = draft.into().into_event();
        let span = tracing::Span::current();
        span.record("event_type", event.kind().as_str());
        span.record("message_id", event.id());

        let message = match event.to_json() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize event");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                PublishMetrics::record_failure();
                return None;
            }
        };

        // Polling clients see the change even if the live path drops it
        if let Some(feed) = &self.feed {
            feed.record(&event);
        }

        if let Some(gateway) = &self.gateway {
            let held = gateway.hold_if_inactive(event.id(), &message).await;
            // A local relay has nobody else to reach
            if held && self.relay.is_local() {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                PublishMetrics::record_published(event.kind().as_str());
                tracing::debug!("Event held for local delivery");
                return Some(event.id().to_string());
            }
        }

        for attempt in 1..=self.max_attempts {
            match self.relay.publish(&self.topic, &message).await {
                Ok(()) => {
                    self.counters.published.fetch_add(1, Ordering::Relaxed);
                    PublishMetrics::record_published(event.kind().as_str());
                    tracing::debug!(
                        attempt = attempt,
                        backend = self.relay.backend_name(),
                        "Event published"
                    );
                    return Some(event.id().to_string());
                }
                Err(e) if attempt < self.max_attempts => {
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    PublishMetrics::record_retry();
                    tracing::warn!(
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Publish failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        attempts = self.max_attempts,
                        error = %e,
                        "Publish failed, giving up"
                    );
                }
            }
        }

        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        PublishMetrics::record_failure();
        None
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.counters.published.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
        }
    }
}
