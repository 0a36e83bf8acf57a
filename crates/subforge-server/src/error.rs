//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use subforge_core::{ConfigError, EnqueueError, ServiceError, StoreError};
use thiserror::Error;

/// API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Duplicate name or URL, or a protected record.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The subscription body held no usable nodes.
    #[error("no usable nodes: {0}")]
    Ingest(String),

    /// A remote fetch failed.
    #[error("download failed: {0}")]
    Download(String),

    /// The document could not be generated.
    #[error("config generation failed: {0}")]
    Config(String),

    /// The refresh queue is full.
    #[error("refresh queue is full, try again later")]
    QueueFull,

    /// The refresh worker has stopped.
    #[error("refresh worker is not running")]
    Unavailable,

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            ApiError::Ingest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "ingest_failed"),
            ApiError::Download(_) => (StatusCode::BAD_GATEWAY, "download_failed"),
            ApiError::Config(_) => (StatusCode::UNPROCESSABLE_ENTITY, "config_error"),
            ApiError::QueueFull => (StatusCode::TOO_MANY_REQUESTS, "queue_full"),
            ApiError::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::Conflict(what) => ApiError::Conflict(what),
            StoreError::Backend(what) => ApiError::Internal(what),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Upstream { source, .. } => source.into(),
            ConfigError::Invalid(msg) => ApiError::Config(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Store(e) => e.into(),
            ServiceError::Ingest(e) => ApiError::Ingest(e.to_string()),
            ServiceError::Download(e) => ApiError::Download(e.to_string()),
            ServiceError::Config(e) => e.into(),
            ServiceError::NotFound(what) => ApiError::NotFound(what),
            ServiceError::Invalid(what) => ApiError::BadRequest(what),
        }
    }
}

impl From<EnqueueError> for ApiError {
    fn from(err: EnqueueError) -> Self {
        match err {
            EnqueueError::Full => ApiError::QueueFull,
            EnqueueError::Closed => ApiError::Unavailable,
        }
    }
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use subforge_core::IngestError;

    #[test]
    fn service_errors_map_to_statuses() {
        let cases = [
            (ServiceError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (ServiceError::Invalid("x".into()), StatusCode::BAD_REQUEST),
            (
                ServiceError::Store(StoreError::Conflict("x".into())),
                StatusCode::CONFLICT,
            ),
            (
                ServiceError::Ingest(IngestError::Empty),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ServiceError::Config(ConfigError::Invalid("dup".into())),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn full_queue_is_too_many_requests() {
        let response = ApiError::from(EnqueueError::Full).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
