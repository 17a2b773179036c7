//! Errors surfaced by the HTTP API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::event::EventKind;

#[derive(Error, Debug)]
pub enum AppError {
    /// Request could not be parsed or failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Well-formed event of a type the API does not publish
    #[error("Event type {0} cannot be published")]
    UnsupportedEvent(EventKind),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::UnsupportedEvent(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::UnsupportedEvent(_) => "UNSUPPORTED_EVENT",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();
        let message = self.to_string();

        tracing::debug!(code, status = status.as_u16(), %message, "API request rejected");

        let body = json!({ "error": { "code": code, "message": message } });
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::Validation("bad".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::UnsupportedEvent(EventKind::InitialStateSnapshot)
                .into_response()
                .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_message_names_event_type() {
        let err = AppError::UnsupportedEvent(EventKind::InitialStateSnapshot);
        assert_eq!(err.code(), "UNSUPPORTED_EVENT");
        assert!(err.to_string().contains("initial_state_snapshot"));
    }
}
