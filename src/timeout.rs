//! Per-operation time budgets
//!
//! Storage calls are blocking; the network layer runs each one under a budget
//! picked by the kind of work it does. A call that overruns its budget is
//! reported as timed out to the caller. The call itself still finishes or
//! fails atomically in the background, since every mutation is
//! write-temp-then-rename.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kinds of coordinator work, each with its own budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    /// Snapshot reads, listings, downloads being opened
    Read,
    /// Publish, promote, provision, config writes, ledger flush
    Write,
    /// Fleet-wide promotion
    Bulk,
}

/// Timeout configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Budget for read operations (default: 10)
    pub read_seconds: u64,

    /// Budget for single-artifact writes (default: 300)
    pub write_seconds: u64,

    /// Budget for bulk promotion (default: 1800)
    pub bulk_seconds: u64,

    /// How long to wait for the storage lock at startup (default: 10)
    pub lock_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_seconds: 10,
            write_seconds: 300,
            bulk_seconds: 1800,
            lock_seconds: 10,
        }
    }
}

impl TimeoutConfig {
    /// Validate bounds.
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        // read_seconds must be in (0, 300]
        if self.read_seconds == 0 || self.read_seconds > 300 {
            return Err(TimeoutValidationError::ReadOutOfBounds {
                value: self.read_seconds,
            });
        }

        // write_seconds must be in [read_seconds, 3600]
        if self.write_seconds < self.read_seconds || self.write_seconds > 3600 {
            return Err(TimeoutValidationError::WriteOutOfBounds {
                value: self.write_seconds,
                min: self.read_seconds,
            });
        }

        // bulk_seconds must be in [write_seconds, 86400]
        if self.bulk_seconds < self.write_seconds || self.bulk_seconds > 86400 {
            return Err(TimeoutValidationError::BulkOutOfBounds {
                value: self.bulk_seconds,
                min: self.write_seconds,
            });
        }

        // lock_seconds must be in (0, 300]
        if self.lock_seconds == 0 || self.lock_seconds > 300 {
            return Err(TimeoutValidationError::LockOutOfBounds {
                value: self.lock_seconds,
            });
        }

        Ok(())
    }

    /// Budget for one operation of `class`.
    pub fn budget(&self, class: OperationClass) -> Duration {
        let seconds = match class {
            OperationClass::Read => self.read_seconds,
            OperationClass::Write => self.write_seconds,
            OperationClass::Bulk => self.bulk_seconds,
        };
        Duration::from_secs(seconds)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_seconds)
    }
}

/// Timeout validation errors
#[derive(Debug, thiserror::Error)]
pub enum TimeoutValidationError {
    #[error("timeouts.read_seconds must be in (0, 300], got {value}")]
    ReadOutOfBounds { value: u64 },

    #[error("timeouts.write_seconds must be in [{min}, 3600], got {value}")]
    WriteOutOfBounds { value: u64, min: u64 },

    #[error("timeouts.bulk_seconds must be in [{min}, 86400], got {value}")]
    BulkOutOfBounds { value: u64, min: u64 },

    #[error("timeouts.lock_seconds must be in (0, 300], got {value}")]
    LockOutOfBounds { value: u64 },
}
