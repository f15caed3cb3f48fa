//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracoor_core::api::{CODE_ALREADY_EXISTS, ErrorResponse};
use tracoor_metadata::MetadataError;
use tracoor_storage::StorageError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An artifact with the same natural key is already indexed.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("{0}")]
    Core(#[from] tracoor_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::AlreadyExists(_) => CODE_ALREADY_EXISTS,
            Self::Internal(_) => "internal_error",
            Self::Storage(e) if e.is_not_found() => "not_found",
            Self::Storage(_) => "storage_error",
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => "not_found",
                MetadataError::AlreadyExists(_) => CODE_ALREADY_EXISTS,
                MetadataError::Invalid(_) => "invalid_argument",
                MetadataError::LockHeld { .. } => "lock_held",
                _ => "metadata_error",
            },
            Self::Core(_) => "invalid_argument",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::AlreadyExists(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                StorageError::InvalidKey(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                MetadataError::LockHeld { .. } => StatusCode::CONFLICT,
                MetadataError::Invalid(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
