use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tokio::time::{interval_at, MissedTickBehavior};
use uuid::Uuid;

use crate::config::WebSocketConfig;
use crate::connection_manager::{ConnectionHandle, ConnectionRegistry, SendError};
use crate::metrics::HeartbeatMetrics;
use crate::websocket::OutboundMessage;

/// Upper bound for a single ping to enter a connection queue
const PING_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Pings in flight at once
const PING_CONCURRENCY: usize = 1000;

/// Outcome of one ping round
#[derive(Debug, Default, PartialEq, Eq)]
struct PingRound {
    sent: usize,
    slow: usize,
    dead: Vec<Uuid>,
}

impl PingRound {
    fn record(&mut self, id: Uuid, outcome: Result<(), SendError>) {
        match outcome {
            Ok(()) => self.sent += 1,
            Err(SendError::Timeout) => self.slow += 1,
            Err(_) => self.dead.push(id),
        }
    }
}

/// Keeps idle live connections visible to intermediaries and drops the ones
/// whose peer went away without a close frame.
pub struct HeartbeatTask {
    config: WebSocketConfig,
    registry: Arc<ConnectionRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: WebSocketConfig,
        registry: Arc<ConnectionRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            registry,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let ping_every = Duration::from_secs(self.config.heartbeat_interval.max(1));
        let sweep_every = Duration::from_secs(self.config.cleanup_interval.max(1));
        let idle_limit = self.config.connection_timeout;

        let now = tokio::time::Instant::now();
        let mut ping_timer = interval_at(now + ping_every, ping_every);
        let mut sweep_timer = interval_at(now + sweep_every, sweep_every);
        ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            ping_every_secs = ping_every.as_secs(),
            sweep_every_secs = sweep_every.as_secs(),
            idle_limit_secs = idle_limit,
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => break,
                _ = ping_timer.tick() => self.ping_all(ping_every).await,
                _ = sweep_timer.tick() => self.sweep_idle(idle_limit),
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    async fn ping_all(&self, ping_every: Duration) {
        let connections = self.registry.get_all_connections();
        if connections.is_empty() {
            return;
        }

        let started = Instant::now();
        let round = stream::iter(connections.iter().cloned())
            .map(ping)
            .buffer_unordered(PING_CONCURRENCY)
            .fold(PingRound::default(), |mut round, (id, outcome)| async move {
                round.record(id, outcome);
                round
            })
            .await;

        for id in &round.dead {
            self.registry.unregister(*id);
        }

        let elapsed = started.elapsed();
        HeartbeatMetrics::record_duration_ms(elapsed.as_millis() as u64);

        tracing::debug!(
            connections = connections.len(),
            sent = round.sent,
            slow = round.slow,
            dead = round.dead.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Ping round finished"
        );

        if elapsed > ping_every / 2 {
            tracing::warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                connections = connections.len(),
                "Ping round used more than half of the heartbeat interval"
            );
        }
    }

    fn sweep_idle(&self, idle_limit_secs: u64) {
        let removed = self.registry.cleanup_stale_connections(idle_limit_secs);
        if removed > 0 {
            HeartbeatMetrics::record_stale_closed(removed);
            tracing::info!(removed, idle_limit_secs, "Dropped idle connections");
        }
    }
}

async fn ping(handle: Arc<ConnectionHandle>) -> (Uuid, Result<(), SendError>) {
    let outcome = handle.send(OutboundMessage::Ping, PING_SEND_TIMEOUT).await;
    if let Err(e) = &outcome {
        tracing::debug!(connection_id = %handle.id, error = %e, "Ping not delivered");
    }
    (handle.id, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(Duration::from_millis(100)))
    }

    fn fast_config() -> WebSocketConfig {
        WebSocketConfig {
            heartbeat_interval: 1,
            connection_timeout: 60,
            cleanup_interval: 60,
            ..Default::default()
        }
    }

    #[test]
    fn test_ping_round_classifies_outcomes() {
        let mut round = PingRound::default();
        let gone = Uuid::new_v4();

        round.record(Uuid::new_v4(), Ok(()));
        round.record(Uuid::new_v4(), Err(SendError::Timeout));
        round.record(gone, Err(SendError::Closed));

        assert_eq!(round.sent, 1);
        assert_eq!(round.slow, 1);
        assert_eq!(round.dead, vec![gone]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(HeartbeatTask::new(fast_config(), registry(), shutdown_rx).run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("heartbeat should stop")
            .expect("heartbeat should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_open_connections() {
        let registry = registry();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (tx, mut rx) = mpsc::channel::<OutboundMessage>(10);
        registry.register(tx);

        let task = tokio::spawn(HeartbeatTask::new(fast_config(), registry, shutdown_rx).run());

        let msg = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("ping expected")
            .expect("queue open");
        assert_eq!(msg, OutboundMessage::Ping);

        shutdown_tx.send(()).unwrap();
        let _ = task.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drops_connections_with_closed_queue() {
        let registry = registry();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (tx, rx) = mpsc::channel::<OutboundMessage>(10);
        registry.register(tx);
        drop(rx);

        let task =
            tokio::spawn(HeartbeatTask::new(fast_config(), registry.clone(), shutdown_rx).run());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(registry.is_empty());

        shutdown_tx.send(()).unwrap();
        let _ = task.await;
    }
}
