//! OTA Protocol Types
//!
//! JSON bodies exchanged between the release service and its clients
//! (devices, upload tooling, dashboards).

pub mod error;
pub mod request;
pub mod response;

pub use error::{ApiError, ErrorCode};
pub use request::UpdateVersionRequest;
pub use response::{
    ConfigListing, ConfigSummary, DeviceFailure, FlushResponse, HealthResponse, LatestVersion,
    MessageResponse, PromoteAllResponse, RolloutView, UploadResponse,
};

/// Header carrying the per-request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Multipart field names accepted by the upload endpoints.
pub mod upload_fields {
    pub const FILE: &str = "file";
    pub const VERSION: &str = "version";
    pub const RELEASE_NOTES: &str = "release_notes";
}
