//! Error body returned by every endpoint.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes returned in error responses.
///
/// These codes are stable and used for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing or malformed field, empty artifact.
    InvalidRequest,
    /// Identifier or path tried to leave its storage area.
    PathTraversal,
    /// No such artifact, device entry or config.
    NotFound,
    /// Artifact write or rename failed; nothing was committed.
    StorageWrite,
    /// New release is live but the ledger was not persisted.
    LedgerPersist,
    /// Request named a version other than the resident release.
    VersionMismatch,
    /// Upload exceeds the maximum allowed size.
    PayloadTooLarge,
    /// Operation exceeded its time budget.
    Timeout,
    /// Storage is owned by another process.
    Unavailable,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::PathTraversal => "PATH_TRAVERSAL",
            Self::NotFound => "NOT_FOUND",
            Self::StorageWrite => "STORAGE_WRITE",
            Self::LedgerPersist => "LEDGER_PERSIST",
            Self::VersionMismatch => "VERSION_MISMATCH",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::Timeout => "TIMEOUT",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        };
        f.write_str(s)
    }
}

/// Error response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    /// Human-readable, single-line message. Never carries filesystem paths.
    pub message: String,
    /// Machine-readable details (failing field, expected vs actual values).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            request_id: None,
        }
    }

    pub fn with_data(code: ErrorCode, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            data: Some(data),
            ..Self::new(code, message)
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// A required form or JSON field was absent.
    pub fn missing_field(field: &str) -> Self {
        Self::with_data(
            ErrorCode::InvalidRequest,
            format!("missing required field '{}'", field),
            serde_json::json!({ "field": field }),
        )
    }

    pub fn payload_too_large(max: u64) -> Self {
        Self::with_data(
            ErrorCode::PayloadTooLarge,
            format!("request body exceeds maximum of {} bytes", max),
            serde_json::json!({ "max_bytes": max }),
        )
    }

    pub fn timeout(operation: &str, budget_seconds: u64) -> Self {
        Self::with_data(
            ErrorCode::Timeout,
            format!("{} did not finish within {} seconds", operation, budget_seconds),
            serde_json::json!({ "operation": operation, "budget_seconds": budget_seconds }),
        )
    }

    pub fn version_mismatch(requested: &str, resident: &str) -> Self {
        Self::with_data(
            ErrorCode::VersionMismatch,
            format!("version {} is not the resident release", requested),
            serde_json::json!({ "requested": requested, "resident": resident }),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}
