//! Polling feed and snapshot endpoints used by clients without a live session.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::event::{current_time_ms, LinkRecord};
use crate::metrics::FeedMetrics;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct UpdatesQuery {
    pub since: Option<String>,
}

/// Parse the `since` cursor; absent or empty means "the last lookback window"
fn resolve_since(raw: Option<&str>, now: i64, lookback_ms: i64) -> Result<i64> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(now - lookback_ms),
        Some(value) => value
            .parse::<i64>()
            .map_err(|_| AppError::Validation(format!("invalid since cursor: {}", value))),
    }
}

/// GET /api/updates?since=<ms>
///
/// Events for records changed after `since`, oldest first. `timestamp` is the
/// feed position the page was read at and becomes the client's next cursor.
pub async fn get_updates(
    State(state): State<AppState>,
    Query(query): Query<UpdatesQuery>,
) -> Result<Response> {
    FeedMetrics::record_poll();

    let since = resolve_since(
        query.since.as_deref(),
        current_time_ms(),
        state.settings.feed.default_lookback_ms,
    )?;

    let page = state.feed.changes_since(since);
    tracing::debug!(
        since = since,
        cursor = page.cursor,
        count = page.updates.len(),
        "Serving polling updates"
    );

    match serde_json::to_value(&page.updates) {
        Ok(updates) => {
            Ok(Json(json!({ "timestamp": page.cursor, "updates": updates })).into_response())
        }
        Err(e) => {
            tracing::error!(error = %e, since = since, "Failed to fetch updates");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to fetch updates",
                    "timestamp": since,
                    "updates": Value::Array(Vec::new()),
                })),
            )
                .into_response())
        }
    }
}

/// GET /api/links - current collection, newest first
pub async fn list_links(State(state): State<AppState>) -> Json<Vec<LinkRecord>> {
    Json(state.feed.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_since_defaults_to_lookback() {
        assert_eq!(resolve_since(None, 100_000, 60_000).unwrap(), 40_000);
        assert_eq!(resolve_since(Some(" "), 100_000, 60_000).unwrap(), 40_000);
    }

    #[test]
    fn test_since_is_parsed() {
        assert_eq!(resolve_since(Some("2000"), 100_000, 60_000).unwrap(), 2000);
        assert!(matches!(
            resolve_since(Some("yesterday"), 100_000, 60_000),
            Err(AppError::Validation(_))
        ));
    }
}
