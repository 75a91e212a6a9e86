//! API error handling for consistent JSON error responses.

use crate::calls::CallError;
use crate::recording::RecordingError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// API error type that converts to JSON responses.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": true,
            "message": self.message,
        }));
        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<RecordingError> for ApiError {
    fn from(err: RecordingError) -> Self {
        let status = match &err {
            RecordingError::NotFound(_) => StatusCode::NOT_FOUND,
            RecordingError::AlreadyRecording { .. } | RecordingError::AlreadyStopped(_) => {
                StatusCode::CONFLICT
            }
            RecordingError::Disabled | RecordingError::NotConfigured(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            RecordingError::RoomNotEnabled(_) => StatusCode::FORBIDDEN,
            RecordingError::Egress(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

impl From<CallError> for ApiError {
    fn from(err: CallError) -> Self {
        let status = match &err {
            CallError::NotFound(_) => StatusCode::NOT_FOUND,
            CallError::AlreadyEnded(_) => StatusCode::CONFLICT,
            CallError::InvalidNumber(_) => StatusCode::BAD_REQUEST,
            CallError::Disabled | CallError::NotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            CallError::Provider(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
