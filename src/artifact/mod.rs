//! Artifact references and on-disk slots
//!
//! An artifact is one versioned installable package. Each storage area
//! ("latest", or one per device) holds at most one blob plus a `slot.json`
//! manifest naming it. The manifest is written LAST and is the commit marker:
//! a blob the manifest does not name is not visible to anyone.

mod store;

pub use store::{ArtifactStore, Commit, Slot, StoreError, StoreResult, DEVICES_DIR, LATEST_DIR};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version for slot.json
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for slot.json
pub const MANIFEST_SCHEMA_ID: &str = "ota-release/slot@1";

/// File name of the per-slot commit marker
pub const MANIFEST_FILENAME: &str = "slot.json";

/// Default blob naming, kept compatible with already-deployed download URLs.
pub const DEFAULT_NAME_TEMPLATE: &str = "app-v{version}.apk";

/// Immutable reference to one stored artifact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Declared version; the identity key.
    pub version: String,

    /// Locator relative to the storage root, `/`-separated.
    pub storage_key: String,

    /// Blob size in bytes
    pub size_bytes: u64,

    /// SHA-256 of the blob, lowercase hex
    pub content_hash: String,
}

impl ArtifactRef {
    /// Same version and same bytes, regardless of where the copy lives.
    pub fn same_content(&self, other: &ArtifactRef) -> bool {
        self.version == other.version && self.content_hash == other.content_hash
    }

    /// Last path segment of the storage key.
    pub fn file_name(&self) -> &str {
        self.storage_key
            .rsplit('/')
            .next()
            .unwrap_or(self.storage_key.as_str())
    }
}

/// Commit marker for a slot (slot.json).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotManifest {
    pub schema_version: u32,
    pub schema_id: String,
    pub artifact: ArtifactRef,
    pub committed_at: DateTime<Utc>,
}

impl SlotManifest {
    pub fn new(artifact: ArtifactRef) -> Self {
        Self {
            schema_version: MANIFEST_SCHEMA_VERSION,
            schema_id: MANIFEST_SCHEMA_ID.to_string(),
            artifact,
            committed_at: Utc::now(),
        }
    }
}

/// Render the blob file name for a version.
pub fn artifact_file_name(template: &str, version: &str) -> String {
    template.replace("{version}", version)
}

/// Recover a version from a legacy `app-v{version}.apk` file name.
///
/// Only used to adopt blobs that were dropped into the latest area without a
/// manifest. Splits on the first `-v` and the final `.apk`, so it misreads
/// versions that contain those substrings; declared versions never go
/// through here.
pub fn legacy_version_from_file_name(name: &str) -> Option<String> {
    let (_, rest) = name.split_once("-v")?;
    let version = rest.strip_suffix(".apk")?;
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}
