//! Built-in defaults (layer 1)
//!
//! Hardcoded defaults for all configuration values.

use serde::{Deserialize, Serialize};

use crate::artifact::DEFAULT_NAME_TEMPLATE;
use crate::timeout::TimeoutConfig;

/// Built-in default configuration values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuiltinDefaults {
    /// Storage root (default: "/var/lib/ota-release")
    pub storage_root: String,

    /// Seconds before a leftover temp file counts as orphaned (default: 3600)
    pub orphan_grace_seconds: u64,

    /// Version of the fallback release (default: "1.0.0")
    pub default_version: String,

    /// Notes of the fallback release (default: "Initial release.")
    pub default_release_notes: String,

    /// Notes used when an upload has none (default: "No release notes provided")
    pub missing_notes_placeholder: String,

    /// Blob file name template (default: "app-v{version}.apk")
    pub artifact_name_template: String,

    /// Listen address (default: "0.0.0.0:5000")
    pub bind_address: String,

    /// Largest accepted upload body (default: 512 MiB)
    pub max_upload_bytes: u64,

    pub timeouts: TimeoutConfig,

    /// tracing filter directive (default: "info")
    pub log_filter: String,
}

impl Default for BuiltinDefaults {
    fn default() -> Self {
        Self {
            storage_root: "/var/lib/ota-release".to_string(),
            orphan_grace_seconds: 3600,
            default_version: "1.0.0".to_string(),
            default_release_notes: "Initial release.".to_string(),
            missing_notes_placeholder: "No release notes provided".to_string(),
            artifact_name_template: DEFAULT_NAME_TEMPLATE.to_string(),
            bind_address: "0.0.0.0:5000".to_string(),
            max_upload_bytes: 512 * 1024 * 1024,
            timeouts: TimeoutConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl BuiltinDefaults {
    /// Convert to JSON Value for merging
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "storage": {
                "root": self.storage_root,
                "orphan_grace_seconds": self.orphan_grace_seconds
            },
            "release": {
                "default_version": self.default_version,
                "default_release_notes": self.default_release_notes,
                "missing_notes_placeholder": self.missing_notes_placeholder,
                "artifact_name_template": self.artifact_name_template
            },
            "server": {
                "bind_address": self.bind_address,
                "max_upload_bytes": self.max_upload_bytes
            },
            "timeouts": {
                "read_seconds": self.timeouts.read_seconds,
                "write_seconds": self.timeouts.write_seconds,
                "bulk_seconds": self.timeouts.bulk_seconds,
                "lock_seconds": self.timeouts.lock_seconds
            },
            "logging": {
                "filter": self.log_filter
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let defaults = BuiltinDefaults::default();
        assert_eq!(defaults.default_version, "1.0.0");
        assert_eq!(defaults.default_release_notes, "Initial release.");
        assert_eq!(defaults.missing_notes_placeholder, "No release notes provided");
        assert_eq!(defaults.bind_address, "0.0.0.0:5000");
    }

    #[test]
    fn test_to_value() {
        let value = BuiltinDefaults::default().to_value();

        assert_eq!(value["release"]["artifact_name_template"], "app-v{version}.apk");
        assert_eq!(value["timeouts"]["write_seconds"], 300);
        assert_eq!(value["logging"]["filter"], "info");
        assert!(value["release"].get("bootstrap_artifact").is_none());
    }
}
