//! HTTP trigger for producers that live outside this process.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::error::{AppError, Result};
use crate::event::{EventDraft, EventKind};
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    /// Assigned message id; `null` when the relay could not take the event
    pub id: Option<String>,
}

/// POST /api/v1/events
///
/// Accepts `{type, payload, timestamp?}`. The response is 202 whether or not
/// the relay accepted the event; producers never depend on delivery.
pub async fn publish_event(
    State(state): State<AppState>,
    body: std::result::Result<Json<EventDraft>, JsonRejection>,
) -> Result<(StatusCode, Json<PublishResponse>)> {
    let Json(draft) = body.map_err(|e| AppError::Validation(e.body_text()))?;

    if draft.body.kind() == EventKind::InitialStateSnapshot {
        return Err(AppError::UnsupportedEvent(EventKind::InitialStateSnapshot));
    }

    let id = state.publisher.broadcast(draft).await;
    if id.is_none() {
        tracing::warn!("Event accepted but not published");
    }

    Ok((StatusCode::ACCEPTED, Json(PublishResponse { id })))
}
