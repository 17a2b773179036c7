use axum::{
    routing::{get, post},
    Router,
};

use tower_http::limit::RequestBodyLimitLayer;

use crate::server::AppState;

use super::events::publish_event;
use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::updates::{get_updates, list_links};

/// Largest accepted event body; a link record is a few hundred bytes
const MAX_EVENT_BODY_BYTES: usize = 64 * 1024;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        // Client read paths
        .route("/api/updates", get(get_updates))
        .route("/api/links", get(list_links))
        // Producer trigger
        .nest(
            "/api/v1",
            Router::new()
                .route("/events", post(publish_event))
                .layer(RequestBodyLimitLayer::new(MAX_EVENT_BODY_BYTES)),
        )
}
