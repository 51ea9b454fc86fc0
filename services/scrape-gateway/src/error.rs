//! Service-specific error types
//!
//! Per-request failures are rendered as JSON:
//! `{"error":{"type":...,"message":...,"request_id":...}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors a request handler returns to the caller.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The pool has no credential to hand out.
    #[error("{message}")]
    NoCredentials { message: String, request_id: String },

    #[error("{message}")]
    InvalidRequest { message: String, request_id: String },

    #[error("{message}")]
    Internal { message: String, request_id: String },
}

impl ApiError {
    pub fn invalid(message: impl Into<String>, request_id: &str) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            request_id: request_id.to_string(),
        }
    }

    /// Map a pool error to its HTTP error.
    pub fn from_pool(err: key_pool::Error, request_id: &str) -> Self {
        let request_id = request_id.to_string();
        match err {
            key_pool::Error::NoCredentialsAvailable { .. } => Self::NoCredentials {
                message: err.to_string(),
                request_id,
            },
            other => Self::Internal {
                message: other.to_string(),
                request_id,
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoCredentials { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::NoCredentials { .. } => "no_credentials",
            ApiError::InvalidRequest { .. } => "invalid_request",
            ApiError::Internal { .. } => "internal",
        }
    }

    fn request_id(&self) -> &str {
        match self {
            ApiError::NoCredentials { request_id, .. }
            | ApiError::InvalidRequest { request_id, .. }
            | ApiError::Internal { request_id, .. } => request_id,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
                "request_id": self.request_id(),
            }
        });
        (
            self.status(),
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
