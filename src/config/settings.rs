use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Redis URL; the in-memory relay is used when unset
    #[serde(default)]
    pub url: Option<String>,
    /// Topic every gateway subscribes to
    #[serde(default = "default_relay_topic")]
    pub topic: String,
    /// Delay before re-subscribing after the subscription is lost, in seconds
    #[serde(default = "default_resubscribe_delay")]
    pub resubscribe_delay_secs: u64,
    /// Bound on establishing a relay connection, in milliseconds
    #[serde(default = "default_relay_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Fall back to the in-memory relay when Redis is unreachable at startup
    #[serde(default = "default_true")]
    pub fallback_to_memory: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    /// Total publish attempts per event
    #[serde(default = "default_publish_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts, in milliseconds
    #[serde(default = "default_publish_retry_delay")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Heartbeat interval in seconds (server sends ping)
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Connection timeout in seconds (disconnect if no activity)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// Cleanup task interval in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Bound on a single send to one connection, in milliseconds
    #[serde(default = "default_send_timeout")]
    pub send_timeout_ms: u64,
    /// Per-connection outbound queue length
    #[serde(default = "default_channel_buffer")]
    pub channel_buffer: usize,
    /// Messages held while the relay subscription is inactive
    #[serde(default = "default_max_buffered_messages")]
    pub max_buffered_messages: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Deletions remembered for polling clients before the oldest are
    /// forgotten. Live records are always kept.
    #[serde(default = "default_max_tombstones")]
    pub max_tombstones: usize,
    /// Look-back used when a poll request carries no cursor, in milliseconds
    #[serde(default = "default_lookback")]
    pub default_lookback_ms: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Origin of the bookmark service, e.g. `http://localhost:8081`
    #[serde(default = "default_client_base_url")]
    pub base_url: String,
    /// Explicit live endpoint; derived from `base_url` when unset
    #[serde(default)]
    pub live_url: Option<String>,
    #[serde(default = "default_live_path")]
    pub live_path: String,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    #[serde(default = "default_updates_path")]
    pub updates_path: String,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_initial_reconnect_delay")]
    pub initial_reconnect_delay_ms: u64,
    #[serde(default = "default_reconnect_multiplier")]
    pub reconnect_multiplier: f64,
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,
    /// Liveness check interval in seconds
    #[serde(default = "default_liveness_interval")]
    pub liveness_check_interval_secs: u64,
    /// Polling interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Try the live path again from polling mode at this interval; never when unset
    #[serde(default)]
    pub live_retry_interval_secs: Option<u64>,
    /// Recently seen event ids remembered for de-duplication
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
    /// Bound on a single HTTP request, in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_true() -> bool {
    true
}

fn default_relay_topic() -> String {
    "websocket_messages".to_string()
}

fn default_resubscribe_delay() -> u64 {
    5
}

fn default_relay_connect_timeout() -> u64 {
    10_000
}

fn default_publish_attempts() -> u32 {
    3
}

fn default_publish_retry_delay() -> u64 {
    100
}

fn default_heartbeat_interval() -> u64 {
    30 // 30 seconds
}

fn default_connection_timeout() -> u64 {
    120 // 2 minutes
}

fn default_cleanup_interval() -> u64 {
    60 // 1 minute
}

fn default_send_timeout() -> u64 {
    5_000
}

fn default_channel_buffer() -> usize {
    32
}

fn default_max_buffered_messages() -> usize {
    1_024
}

fn default_max_tombstones() -> usize {
    10_000
}

fn default_lookback() -> i64 {
    60_000 // last minute
}

fn default_client_base_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_live_path() -> String {
    "/api/websocket".to_string()
}

fn default_snapshot_path() -> String {
    "/api/links".to_string()
}

fn default_updates_path() -> String {
    "/api/updates".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_initial_reconnect_delay() -> u64 {
    1_000
}

fn default_reconnect_multiplier() -> f64 {
    1.5
}

fn default_max_reconnect_delay() -> u64 {
    30_000
}

fn default_liveness_interval() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    3
}

fn default_dedup_window() -> usize {
    256
}

fn default_request_timeout() -> u64 {
    10_000
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "bookmark-realtime".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("relay.topic", "websocket_messages")?
            .set_default("websocket.heartbeat_interval", 30)?
            .set_default("websocket.connection_timeout", 120)?
            .set_default("websocket.cleanup_interval", 60)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Structured environment overrides: SERVER__PORT, RELAY__RESUBSCRIBE_DELAY_SECS, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            )
            // Flat deployment variables win over everything else
            .set_override_option("server.port", env::var("SERVER_PORT").ok())?
            .set_override_option(
                "relay.url",
                env::var("RELAY_URL").or_else(|_| env::var("REDIS_URL")).ok(),
            )?
            .set_override_option("client.base_url", env::var("CLIENT_BASE_URL").ok())?
            .set_override_option("client.live_url", env::var("CLIENT_LIVE_URL").ok())?;

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl RelayConfig {
    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_secs(self.resubscribe_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl PublisherConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl WebSocketConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl ClientConfig {
    /// Live endpoint URL: `live_url` when set, otherwise the base URL with its
    /// scheme switched to `ws`/`wss` and `live_path` appended.
    pub fn resolved_live_url(&self) -> String {
        if let Some(url) = self.live_url.as_ref().filter(|u| !u.is_empty()) {
            return url.clone();
        }

        let base = self.base_url.trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else if base.starts_with("ws://") || base.starts_with("wss://") {
            base.to_string()
        } else {
            format!("ws://{}", base)
        };

        format!("{}{}", ws_base, self.live_path)
    }

    pub fn snapshot_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.snapshot_path)
    }

    pub fn updates_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.updates_path)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_check_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn live_retry_interval(&self) -> Option<Duration> {
        self.live_retry_interval_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: None,
            topic: default_relay_topic(),
            resubscribe_delay_secs: default_resubscribe_delay(),
            connect_timeout_ms: default_relay_connect_timeout(),
            fallback_to_memory: true,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_publish_attempts(),
            retry_delay_ms: default_publish_retry_delay(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            connection_timeout: default_connection_timeout(),
            cleanup_interval: default_cleanup_interval(),
            send_timeout_ms: default_send_timeout(),
            channel_buffer: default_channel_buffer(),
            max_buffered_messages: default_max_buffered_messages(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_tombstones: default_max_tombstones(),
            default_lookback_ms: default_lookback(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_client_base_url(),
            live_url: None,
            live_path: default_live_path(),
            snapshot_path: default_snapshot_path(),
            updates_path: default_updates_path(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            initial_reconnect_delay_ms: default_initial_reconnect_delay(),
            reconnect_multiplier: default_reconnect_multiplier(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            liveness_check_interval_secs: default_liveness_interval(),
            poll_interval_secs: default_poll_interval(),
            live_retry_interval_secs: None,
            dedup_window: default_dedup_window(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8081);

        let relay = RelayConfig::default();
        assert!(relay.url.is_none());
        assert_eq!(relay.topic, "websocket_messages");

        let publisher = PublisherConfig::default();
        assert_eq!(publisher.max_attempts, 3);
        assert_eq!(publisher.retry_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_client_reconnect_defaults() {
        let client = ClientConfig::default();
        assert_eq!(client.max_reconnect_attempts, 5);
        assert_eq!(client.initial_reconnect_delay_ms, 1000);
        assert_eq!(client.reconnect_multiplier, 1.5);
        assert_eq!(client.poll_interval(), Duration::from_secs(3));
        assert_eq!(client.liveness_check_interval(), Duration::from_secs(10));
        assert!(client.live_retry_interval().is_none());
    }

    #[test]
    fn test_live_url_derived_from_origin() {
        let mut client = ClientConfig {
            base_url: "https://links.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(client.resolved_live_url(), "wss://links.example.com/api/websocket");
        assert_eq!(client.updates_url(), "https://links.example.com/api/updates");

        client.base_url = "http://localhost:3000".to_string();
        assert_eq!(client.resolved_live_url(), "ws://localhost:3000/api/websocket");

        client.live_url = Some("ws://edge:9000/live".to_string());
        assert_eq!(client.resolved_live_url(), "ws://edge:9000/live");
    }
}
