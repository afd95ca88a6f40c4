//! Error types for stemway-media

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., finalize with missing chunks
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Declared upload size exceeds the configured maximum (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Chunk bytes disagree with the hash supplied by the client (422)
    #[error("Checksum mismatch for chunk {chunk_index}")]
    ChecksumMismatch {
        chunk_index: u32,
        expected: String,
        computed: String,
    },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<stemway_common::Error> for ApiError {
    fn from(err: stemway_common::Error) -> Self {
        use stemway_common::Error;
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Conflict(msg) => ApiError::Conflict(msg),
            Error::InvalidTransition { from, to } => {
                ApiError::Conflict(format!("Invalid transition: {} -> {}", from, to))
            }
            Error::ChecksumMismatch {
                chunk_index,
                expected,
                computed,
            } => ApiError::ChecksumMismatch {
                chunk_index,
                expected,
                computed,
            },
            Error::Io(err) => ApiError::Io(err),
            Error::Config(msg) => ApiError::Internal(msg),
            Error::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg)
            }
            ApiError::ChecksumMismatch {
                chunk_index,
                expected,
                computed,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "CHECKSUM_MISMATCH",
                format!(
                    "Chunk {} hash mismatch: expected {}, computed {}",
                    chunk_index, expected, computed
                ),
            ),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
