//! Coordinator error type
//!
//! Component errors (`StoreError`, `LedgerError`, `LockError`) are folded
//! into one enum whose `kind()` is stable enough to drive HTTP statuses and
//! CLI exit codes.

use thiserror::Error;

use crate::artifact::StoreError;
use crate::config::ConfigError;
use crate::ident::IdentError;
use crate::ledger::LedgerError;
use crate::lock::LockError;

/// Result type for coordinator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller input was missing or malformed
    Validation,
    /// An identifier tried to address storage outside its area
    PathTraversal,
    /// No such artifact, device entry or blob
    NotFound,
    /// Blob write or rename failed; nothing was committed
    StorageWrite,
    /// New state is live in memory but the ledger write failed
    LedgerPersist,
    /// Request targeted a version that is not the resident one
    VersionMismatch,
    /// The storage root is owned by another process
    Unavailable,
    /// Anything else
    Internal,
}

/// Errors surfaced by the coordinator.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("rejected identifier: {0}")]
    PathTraversal(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("artifact storage write failed: {0}")]
    StorageWrite(#[source] StoreError),

    #[error("release {version} is live but the ledger was not persisted: {source}")]
    LedgerPersist {
        version: String,
        #[source]
        source: LedgerError,
    },

    #[error("version {requested} is not the resident release ({resident})")]
    VersionMismatch { requested: String, resident: String },

    #[error(transparent)]
    Locked(#[from] LockError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::PathTraversal(_) => ErrorKind::PathTraversal,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::StorageWrite(_) => ErrorKind::StorageWrite,
            Error::LedgerPersist { .. } => ErrorKind::LedgerPersist,
            Error::VersionMismatch { .. } => ErrorKind::VersionMismatch,
            Error::Locked(LockError::Timeout { .. }) => ErrorKind::Unavailable,
            Error::Locked(LockError::Io(_)) | Error::Config(_) => ErrorKind::Internal,
        }
    }
}

impl From<IdentError> for Error {
    fn from(err: IdentError) -> Self {
        if err.is_path_traversal() {
            Error::PathTraversal(err.to_string())
        } else {
            Error::Validation(err.to_string())
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Ident(e) => e.into(),
            StoreError::InvalidKey(key) => Error::PathTraversal(format!("storage key {key:?}")),
            e @ StoreError::EmptyArtifact { .. } => Error::Validation(e.to_string()),
            e @ (StoreError::NotFound { .. } | StoreError::BlobMissing(_)) => {
                Error::NotFound(e.to_string())
            }
            e => Error::StorageWrite(e),
        }
    }
}
