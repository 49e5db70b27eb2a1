//! Identifier validation
//!
//! Device ids, artifact versions and config keys all end up as path segments
//! under the storage root, so each is checked against a strict allow-list
//! before it is used to build a path. Nothing is sanitized-and-continued:
//! a bad identifier is rejected.

use std::fmt;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of any identifier used as a path segment.
pub const MAX_IDENT_LEN: usize = 128;

/// Identifier validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentError {
    #[error("{what} must not be empty")]
    Empty { what: &'static str },

    #[error("{what} exceeds {max} characters")]
    TooLong { what: &'static str, max: usize },

    #[error("{what} contains a path traversal sequence: {value:?}")]
    PathTraversal { what: &'static str, value: String },

    #[error("{what} contains disallowed characters: {value:?}")]
    Disallowed { what: &'static str, value: String },
}

impl IdentError {
    /// Whether the rejection was caused by path-segment abuse.
    pub fn is_path_traversal(&self) -> bool {
        matches!(self, IdentError::PathTraversal { .. })
    }
}

fn segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static pattern"))
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+-]*$").expect("static pattern"))
}

fn check(what: &'static str, value: &str, pattern: &Regex) -> Result<(), IdentError> {
    if value.is_empty() {
        return Err(IdentError::Empty { what });
    }
    if value.len() > MAX_IDENT_LEN {
        return Err(IdentError::TooLong {
            what,
            max: MAX_IDENT_LEN,
        });
    }
    if value.contains("..") || value.contains('/') || value.contains('\\') {
        return Err(IdentError::PathTraversal {
            what,
            value: value.to_string(),
        });
    }
    if !pattern.is_match(value) {
        return Err(IdentError::Disallowed {
            what,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Validate a declared artifact version string.
pub fn validate_version(version: &str) -> Result<(), IdentError> {
    check("version", version, version_pattern())
}

/// Validate a device-config key.
pub fn validate_config_key(key: &str) -> Result<(), IdentError> {
    check("config key", key, segment_pattern())
}

/// Validated device identifier.
///
/// Opaque to the coordinator; only ASCII alphanumerics, `-` and `_` are
/// accepted so the id can address a per-device storage directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    pub fn parse(raw: &str) -> Result<Self, IdentError> {
        check("device id", raw, segment_pattern())?;
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = IdentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}
