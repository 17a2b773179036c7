//! Client connection manager.
//!
//! A single task owns the connection state; [`ClientConnectionManager`] is a
//! cheap handle that sends it commands and observes its [`ManagerStatus`].
//!
//! ```text
//! Disconnected -> Connecting -> Live -> (close) -> Connecting -> ... -> Polling
//!                                    \-> close() -> Closed
//! ```

use std::collections::{HashSet, VecDeque};
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

use crate::config::ClientConfig;
use crate::event::{current_time_ms, Event, EventBody, EventKind, LinkRecord};

use super::backoff::{BackoffConfig, ReconnectBackoff};
use super::source::{HttpUpdatesSource, UpdatesSource};
use super::subscribers::{SubscriberSet, Subscription};
use super::transport::{LiveSession, LiveTransport, TransportEvent, WsTransport};
use super::ClientError;

/// Connection mode as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// `connect()` has not been called, or the liveness check found a dead session
    Disconnected,
    /// Opening a session or waiting out a reconnect delay
    Connecting,
    Live,
    /// Reconnect budget spent; reading the polling feed
    Polling,
    Closed,
}

/// Observable manager state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerStatus {
    pub mode: ConnectionMode,
    /// Reconnects scheduled since the last successful open
    pub attempts: u32,
    /// Current backoff delay; grows by the multiplier each time a reconnect is scheduled
    pub next_delay: Duration,
    /// `since` of the next poll
    pub poll_cursor: i64,
    pub reconnect_pending: bool,
    pub polling_active: bool,
    pub liveness_active: bool,
    pub live_retry_active: bool,
    /// Initial state fetch in flight
    pub snapshot_pending: bool,
}

impl ManagerStatus {
    /// True while any timer or background fetch is armed
    pub fn has_timers(&self) -> bool {
        self.reconnect_pending
            || self.polling_active
            || self.liveness_active
            || self.live_retry_active
            || self.snapshot_pending
    }
}

/// Tunables of a manager, usually derived from [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub live_url: String,
    pub backoff: BackoffConfig,
    pub liveness_check_interval: Duration,
    pub poll_interval: Duration,
    /// Interval for trying the live path again while polling; never when `None`
    pub live_retry_interval: Option<Duration>,
    /// Bound on opening a session
    pub open_timeout: Duration,
    /// Event ids remembered for de-duplication; 0 disables it
    pub dedup_window: usize,
    /// Starting `since` for the polling feed
    pub initial_cursor: i64,
}

impl From<&ClientConfig> for ManagerSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            live_url: config.resolved_live_url(),
            backoff: BackoffConfig {
                initial_delay_ms: config.initial_reconnect_delay_ms,
                max_delay_ms: config.max_reconnect_delay_ms,
                multiplier: config.reconnect_multiplier,
                jitter_factor: 0.0,
                max_attempts: config.max_reconnect_attempts,
            },
            liveness_check_interval: config.liveness_check_interval(),
            poll_interval: config.poll_interval(),
            live_retry_interval: config.live_retry_interval(),
            open_timeout: config.request_timeout(),
            dedup_window: config.dedup_window,
            initial_cursor: current_time_ms(),
        }
    }
}

enum Command {
    Connect,
    Close(oneshot::Sender<()>),
}

/// Handle to the connection manager task.
///
/// Dropping the last handle shuts the task down as `close()` would.
pub struct ClientConnectionManager {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ManagerStatus>,
    subscribers: SubscriberSet,
    task: JoinHandle<()>,
}

impl ClientConnectionManager {
    /// Manager over the WebSocket transport and the HTTP updates source
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let source = HttpUpdatesSource::new(config)?;
        Ok(Self::new(
            ManagerSettings::from(config),
            Arc::new(WsTransport::new()),
            Arc::new(source),
        ))
    }

    /// Spawn the manager task. Must be called inside a Tokio runtime.
    pub fn new(
        settings: ManagerSettings,
        transport: Arc<dyn LiveTransport>,
        source: Arc<dyn UpdatesSource>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let subscribers = SubscriberSet::new();
        let backoff = ReconnectBackoff::new(settings.backoff.clone());

        let initial = ManagerStatus {
            mode: ConnectionMode::Disconnected,
            attempts: 0,
            next_delay: backoff.current_delay(),
            poll_cursor: settings.initial_cursor,
            reconnect_pending: false,
            polling_active: false,
            liveness_active: false,
            live_retry_active: false,
            snapshot_pending: false,
        };
        let (status_tx, status_rx) = watch::channel(initial);

        let actor = Actor {
            dedup: DedupWindow::new(settings.dedup_window),
            poll_cursor: settings.initial_cursor,
            settings,
            transport,
            source,
            subscribers: subscribers.clone(),
            status: status_tx,
            commands: commands_rx,
            mode: ConnectionMode::Disconnected,
            backoff,
            session: None,
            reconnect_at: None,
            poll_timer: None,
            liveness_timer: None,
            live_retry_timer: None,
            snapshot: None,
        };
        let task = tokio::spawn(actor.run());

        Self {
            commands: commands_tx,
            status: status_rx,
            subscribers,
            task,
        }
    }

    /// Open the live session. Does nothing while live or connecting.
    pub fn connect(&self) {
        if self.commands.send(Command::Connect).is_err() {
            tracing::debug!("connect() after close() ignored");
        }
    }

    /// Tear everything down: transport, timers and subscribers.
    /// Resolves once teardown is complete.
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Close(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub fn status(&self) -> ManagerStatus {
        self.status.borrow().clone()
    }

    pub fn mode(&self) -> ConnectionMode {
        self.status.borrow().mode
    }

    /// Receiver that sees every status change
    pub fn watch_status(&self) -> watch::Receiver<ManagerStatus> {
        self.status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Recently seen event ids, oldest evicted first
struct DedupWindow {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Remember `id`; false if it was already in the window
    fn insert(&mut self, id: &str) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

/// Records of the initial state and when they were requested
type SnapshotFetch = (i64, Result<Vec<LinkRecord>, ClientError>);

struct Actor {
    settings: ManagerSettings,
    transport: Arc<dyn LiveTransport>,
    source: Arc<dyn UpdatesSource>,
    subscribers: SubscriberSet,
    status: watch::Sender<ManagerStatus>,
    commands: mpsc::UnboundedReceiver<Command>,
    mode: ConnectionMode,
    backoff: ReconnectBackoff,
    session: Option<LiveSession>,
    poll_cursor: i64,
    dedup: DedupWindow,
    reconnect_at: Option<Instant>,
    poll_timer: Option<Interval>,
    liveness_timer: Option<Interval>,
    live_retry_timer: Option<Interval>,
    /// Runs beside the session so live messages keep flowing while it loads
    snapshot: Option<JoinHandle<SnapshotFetch>>,
}

impl Actor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => self.connect().await,
                    Some(Command::Close(ack)) => {
                        self.shutdown();
                        self.publish_status();
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.shutdown();
                        self.publish_status();
                        break;
                    }
                },
                event = next_event(&mut self.session) => self.on_transport_event(event).await,
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.open().await;
                }
                _ = tick(&mut self.poll_timer) => self.poll().await,
                _ = tick(&mut self.liveness_timer) => self.check_liveness().await,
                _ = tick(&mut self.live_retry_timer) => self.retry_live().await,
                fetched = join(&mut self.snapshot) => {
                    self.snapshot = None;
                    self.on_snapshot(fetched);
                }
            }
            self.publish_status();
        }
        tracing::debug!("Connection manager stopped");
    }

    async fn connect(&mut self) {
        match self.mode {
            ConnectionMode::Live | ConnectionMode::Connecting | ConnectionMode::Closed => {
                tracing::debug!(mode = ?self.mode, "connect() ignored");
                return;
            }
            ConnectionMode::Disconnected | ConnectionMode::Polling => {}
        }

        if self.liveness_timer.is_none() {
            self.liveness_timer = Some(new_interval(self.settings.liveness_check_interval));
        }
        self.open().await;
    }

    /// One attempt at opening the live session
    async fn open(&mut self) {
        self.mode = ConnectionMode::Connecting;
        self.publish_status();

        match self.open_session().await {
            Ok(session) => self.on_open(session),
            Err(e) => {
                tracing::warn!(url = %self.settings.live_url, error = %e, "Live session failed to open");
                self.on_close();
            }
        }
    }

    async fn open_session(&self) -> Result<LiveSession, ClientError> {
        tracing::info!(url = %self.settings.live_url, "Opening live session");
        let timeout = self.settings.open_timeout;
        match tokio::time::timeout(timeout, self.transport.open(&self.settings.live_url)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(timeout.as_millis() as u64)),
        }
    }

    fn on_open(&mut self, session: LiveSession) {
        tracing::info!("Live session connected");
        self.backoff.reset();
        self.mode = ConnectionMode::Live;
        self.session = Some(session);
        self.reconnect_at = None;
        self.poll_timer = None;
        self.live_retry_timer = None;
        if self.liveness_timer.is_none() {
            self.liveness_timer = Some(new_interval(self.settings.liveness_check_interval));
        }
        self.load_initial_state();
    }

    /// Fetch the current collection in the background for this session
    fn load_initial_state(&mut self) {
        self.cancel_snapshot();
        let source = self.source.clone();
        self.snapshot = Some(tokio::spawn(async move {
            let requested_at = current_time_ms();
            (requested_at, source.fetch_snapshot().await)
        }));
    }

    fn on_snapshot(&mut self, fetched: Result<SnapshotFetch, JoinError>) {
        match fetched {
            Ok((requested_at, Ok(records))) => {
                let count = records.len();
                // Stamped with the request time so newer live writes win
                let event = Event::stamped(EventBody::InitialStateSnapshot(records), requested_at);
                let delivered = self.subscribers.dispatch(&event);
                tracing::debug!(records = count, subscribers = delivered, "Initial state dispatched");
            }
            Ok((_, Err(e))) => {
                tracing::warn!(error = %e, "Failed to fetch initial state");
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                tracing::error!(error = %e, "Initial state fetch panicked");
            }
        }
    }

    fn cancel_snapshot(&mut self) {
        if let Some(task) = self.snapshot.take() {
            task.abort();
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => self.on_message(&text),
            // The close that follows drives reconnection
            TransportEvent::Error(error) => {
                tracing::warn!(error = %error, "Live session error");
            }
            TransportEvent::Closed => {
                tracing::info!("Live session closed");
                self.session = None;
                self.on_close();
            }
        }
    }

    fn on_close(&mut self) {
        self.session = None;
        self.cancel_snapshot();
        if self.mode == ConnectionMode::Closed {
            return;
        }

        match self.backoff.next_delay() {
            Some(delay) => {
                tracing::info!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = self.backoff.attempts(),
                    "Reconnecting"
                );
                self.mode = ConnectionMode::Connecting;
                self.reconnect_at = Some(Instant::now() + delay);
            }
            None => {
                tracing::warn!(
                    attempts = self.backoff.attempts(),
                    "Max reconnection attempts reached, falling back to polling"
                );
                self.start_polling();
            }
        }
    }

    fn on_message(&mut self, text: &str) {
        let event = match Event::from_json(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed live message");
                return;
            }
        };
        self.deliver(event);
    }

    fn deliver(&mut self, event: Event) {
        if !self.dedup.insert(event.id()) {
            tracing::debug!(event_id = %event.id(), "Duplicate event skipped");
            return;
        }

        // Inserts and deletions reach views before anything is logged
        if matches!(event.kind(), EventKind::Created | EventKind::Deleted) {
            self.subscribers.dispatch(&event);
            tracing::debug!(
                event_type = event.kind().as_str(),
                record_id = event.record_id().unwrap_or_default(),
                event_id = %event.id(),
                "Processed event"
            );
        } else {
            tracing::debug!(
                event_type = event.kind().as_str(),
                event_id = %event.id(),
                subscribers = self.subscribers.len(),
                "Dispatching event"
            );
            self.subscribers.dispatch(&event);
        }
    }

    fn start_polling(&mut self) {
        self.mode = ConnectionMode::Polling;
        self.reconnect_at = None;
        self.liveness_timer = None;
        if self.poll_timer.is_none() {
            self.poll_timer = Some(new_interval(self.settings.poll_interval));
        }
        if let Some(retry) = self.settings.live_retry_interval {
            self.live_retry_timer = Some(new_interval(retry));
        }
        tracing::info!(
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            cursor = self.poll_cursor,
            "Polling started"
        );
    }

    async fn poll(&mut self) {
        let since = self.poll_cursor;
        let page = match self.source.fetch_updates(since).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(since = since, error = %e, "Polling request failed");
                return;
            }
        };

        let mut updates = page.updates;
        if !updates.is_empty() {
            tracing::debug!(since = since, count = updates.len(), "Received updates via polling");
        }
        updates.sort_by_key(Event::timestamp);
        for event in updates {
            self.deliver(event);
        }

        self.poll_cursor = self.poll_cursor.max(page.timestamp);
    }

    async fn check_liveness(&mut self) {
        if self.mode != ConnectionMode::Live {
            return;
        }
        if self.session.as_ref().is_some_and(LiveSession::is_open) {
            return;
        }

        tracing::warn!("Live session is not open, reconnecting");
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.mode = ConnectionMode::Disconnected;
        self.connect().await;
    }

    async fn retry_live(&mut self) {
        if self.mode != ConnectionMode::Polling {
            return;
        }

        match self.open_session().await {
            Ok(session) => self.on_open(session),
            Err(e) => {
                tracing::debug!(error = %e, "Live path still unavailable, continuing to poll");
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
        self.mode = ConnectionMode::Closed;
        self.reconnect_at = None;
        self.poll_timer = None;
        self.liveness_timer = None;
        self.live_retry_timer = None;
        self.cancel_snapshot();
        self.subscribers.clear();
        self.dedup.clear();
        tracing::info!("Connection manager closed");
    }

    fn publish_status(&self) {
        self.status.send_replace(ManagerStatus {
            mode: self.mode,
            attempts: self.backoff.attempts(),
            next_delay: self.backoff.current_delay(),
            poll_cursor: self.poll_cursor,
            reconnect_pending: self.reconnect_at.is_some(),
            polling_active: self.poll_timer.is_some(),
            liveness_active: self.liveness_timer.is_some(),
            live_retry_active: self.live_retry_timer.is_some(),
            snapshot_pending: self.snapshot.is_some(),
        });
    }
}

/// Interval whose first tick is one period away
fn new_interval(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_event(session: &mut Option<LiveSession>) -> TransportEvent {
    match session {
        Some(session) => session.next_event().await,
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

async fn join<T>(task: &mut Option<JoinHandle<T>>) -> Result<T, JoinError> {
    match task {
        Some(task) => task.await,
        None => pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => pending().await,
    }
}
