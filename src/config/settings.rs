//! Typed view of the merged configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::release::ReleaseDefaults;
use crate::timeout::TimeoutConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub storage: StorageSettings,
    pub release: ReleaseSettings,
    pub server: ServerSettings,
    pub timeouts: TimeoutConfig,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Holds the ledger, the latest area, device areas and configs
    pub root: PathBuf,
    pub orphan_grace_seconds: u64,
}

impl StorageSettings {
    pub fn orphan_grace(&self) -> Duration {
        Duration::from_secs(self.orphan_grace_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseSettings {
    pub default_version: String,
    pub default_release_notes: String,
    pub missing_notes_placeholder: String,
    /// Must contain `{version}`
    pub artifact_name_template: String,
    /// Imported as `default_version` when storage is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_artifact: Option<PathBuf>,
}

impl ReleaseSettings {
    pub fn defaults(&self) -> ReleaseDefaults {
        ReleaseDefaults {
            version: self.default_version.clone(),
            release_notes: self.default_release_notes.clone(),
            missing_notes_placeholder: self.missing_notes_placeholder.clone(),
            bootstrap_artifact: self.bootstrap_artifact.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub bind_address: String,
    /// Prefix for download urls; when unset urls are root-relative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
    pub max_upload_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set
    pub filter: String,
}
