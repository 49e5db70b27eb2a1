//! Request bodies.

use serde::{Deserialize, Serialize};

/// Body of `POST /update-version`.
///
/// Amends the notes of the resident release. Download urls are derived from
/// storage, so `url` is accepted for older clients and ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateVersionRequest {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_body_parses() {
        let body = r#"{"version":"1.0.0","url":"http://host/apk/app-v1.0.0.apk","release_notes":"x"}"#;
        let req: UpdateVersionRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.version, "1.0.0");
        assert_eq!(req.release_notes.as_deref(), Some("x"));
    }

    #[test]
    fn test_version_only() {
        let req: UpdateVersionRequest = serde_json::from_str(r#"{"version":"2.0"}"#).unwrap();
        assert!(req.url.is_none());
        assert!(req.release_notes.is_none());
    }
}
