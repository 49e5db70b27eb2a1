//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ota_protocol::{ApiError, ErrorCode};
use ota_release::{Error as CoreError, ErrorKind};
use thiserror::Error;

use crate::request_id;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("request body exceeds {max} bytes")]
    PayloadTooLarge { max: u64 },

    #[error("{operation} timed out after {budget_seconds}s")]
    Timeout {
        operation: &'static str,
        budget_seconds: u64,
    },

    #[error("worker task failed: {0}")]
    Join(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Core(e) => match e.kind() {
                ErrorKind::Validation | ErrorKind::PathTraversal => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::VersionMismatch => StatusCode::CONFLICT,
                ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::StorageWrite | ErrorKind::LedgerPersist | ErrorKind::Internal => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::MissingField(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Join(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Core(e) => match e.kind() {
                ErrorKind::Validation => ErrorCode::InvalidRequest,
                ErrorKind::PathTraversal => ErrorCode::PathTraversal,
                ErrorKind::NotFound => ErrorCode::NotFound,
                ErrorKind::StorageWrite => ErrorCode::StorageWrite,
                ErrorKind::LedgerPersist => ErrorCode::LedgerPersist,
                ErrorKind::VersionMismatch => ErrorCode::VersionMismatch,
                ErrorKind::Unavailable => ErrorCode::Unavailable,
                ErrorKind::Internal => ErrorCode::Internal,
            },
            Self::MissingField(_) | Self::BadRequest(_) => ErrorCode::InvalidRequest,
            Self::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Join(_) | Self::Io(_) => ErrorCode::Internal,
        }
    }

    /// Client-facing body. Storage and internal details stay in the logs.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::Core(CoreError::LedgerPersist { version, .. }) => ApiError::with_data(
                ErrorCode::LedgerPersist,
                format!("release {version} is live but its metadata was not persisted; retry POST /ledger/flush"),
                serde_json::json!({ "version": version }),
            ),
            Self::Core(CoreError::VersionMismatch { requested, resident }) => {
                ApiError::version_mismatch(requested, resident)
            }
            Self::Core(e) => match e.kind() {
                ErrorKind::StorageWrite => {
                    ApiError::new(self.code(), "artifact storage write failed; nothing was committed")
                }
                ErrorKind::Internal => ApiError::new(self.code(), "internal server error"),
                _ => ApiError::new(self.code(), e.to_string()),
            },
            Self::MissingField(field) => ApiError::missing_field(field),
            Self::BadRequest(message) => ApiError::invalid_request(message.clone()),
            Self::PayloadTooLarge { max } => ApiError::payload_too_large(*max),
            Self::Timeout {
                operation,
                budget_seconds,
            } => ApiError::timeout(operation, *budget_seconds),
            Self::Join(_) | Self::Io(_) => ApiError::new(self.code(), "internal server error"),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "request rejected");
        }

        let mut body = self.to_api_error();
        if let Some(id) = request_id::current() {
            body = body.with_request_id(id);
        }
        (status, Json(body)).into_response()
    }
}
