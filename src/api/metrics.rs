//! Prometheus metrics endpoint.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};

use crate::metrics;
use crate::server::AppState;

/// GET /metrics - Prometheus metrics endpoint
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_metrics_from_state(&state);

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Refresh gauges that are cheaper to read at scrape time than to track
fn update_metrics_from_state(state: &AppState) {
    metrics::CONNECTIONS_TOTAL.set(state.registry.len() as i64);

    let gateway = state.gateway.stats();
    metrics::GATEWAY_BUFFERED.set(gateway.buffered as i64);
    metrics::RELAY_SUBSCRIPTION_STATUS.set(i64::from(gateway.subscription_active));

    metrics::FEED_EVENTS.set(state.feed.stats().records as i64);
}
