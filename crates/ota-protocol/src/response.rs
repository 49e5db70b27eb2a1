//! Response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// `GET /latest-version`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestVersion {
    pub version: String,
    /// Where the artifact can be downloaded
    pub url: String,
    pub release_notes: String,
}

/// `POST /upload-artifact`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub version: String,
    pub url: String,
    pub size_bytes: u64,
    /// SHA-256 of the stored bytes, lowercase hex
    pub content_hash: String,
}

/// A device's assignment as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutView {
    pub device_id: String,
    pub version: String,
    pub url: String,
    pub assigned_at: DateTime<Utc>,
    /// Version currently in the release pool
    pub latest_version: String,
    pub up_to_date: bool,
}

/// One device that could not be promoted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceFailure {
    pub device_id: String,
    pub error: ApiError,
}

/// `POST /promote-all`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoteAllResponse {
    /// Number of devices now on the latest release
    pub promoted: usize,
    pub devices: Vec<RolloutView>,
    pub failed: Vec<DeviceFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub key: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

/// `GET /configs`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigListing {
    pub configs: Vec<ConfigSummary>,
}

/// `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Service build version
    pub version: String,
}

/// Plain acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// `POST /ledger/flush`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushResponse {
    pub message: String,
    pub version: String,
}
