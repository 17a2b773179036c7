//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::connection_manager::ConnectionStats;
use crate::feed::FeedStats;
use crate::gateway::GatewayStats;
use crate::publisher::PublisherStats;
use crate::relay::{RelayHealthStats, RelayHealthStatus};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub relay: RelayHealthResponse,
    pub connections: usize,
    pub subscription_active: bool,
}

#[derive(Debug, Serialize)]
pub struct RelayHealthResponse {
    pub backend: String,
    pub status: String,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    pub connections: ConnectionStats,
    pub gateway: GatewayStats,
    pub publisher: PublisherStats,
    pub feed: FeedStats,
    pub relay: RelayStats,
}

#[derive(Debug, Serialize)]
pub struct RelayStats {
    pub backend: String,
    pub topic: String,
    #[serde(flatten)]
    pub health: RelayHealthStats,
}

/// GET /health
///
/// A process on the in-memory relay still serves its own connections, so it
/// reports `degraded` rather than failing.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let relay_health = state.relay.health();

    let status = match relay_health.status {
        RelayHealthStatus::Healthy => "healthy",
        RelayHealthStatus::Local | RelayHealthStatus::Reconnecting => "degraded",
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        relay: RelayHealthResponse {
            backend: state.relay.backend_name().to_string(),
            status: relay_health.status.as_str().to_string(),
            connected: relay_health.status != RelayHealthStatus::Reconnecting,
        },
        connections: state.registry.len(),
        subscription_active: state.gateway.is_active(),
    })
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        connections: state.registry.stats(),
        gateway: state.gateway.stats(),
        publisher: state.publisher.stats(),
        feed: state.feed.stats(),
        relay: RelayStats {
            backend: state.relay.backend_name().to_string(),
            topic: state.publisher.topic().to_string(),
            health: state.relay.health(),
        },
    })
}
