//! Effective configuration with full provenance
//!
//! The effective config is the merged layer stack plus a record of every
//! file that contributed to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use super::defaults::BuiltinDefaults;
use super::merge::merge_layers;
use super::settings::Settings;

/// Schema version for effective_config
pub const SCHEMA_VERSION: u32 = 1;

/// Schema identifier
pub const SCHEMA_ID: &str = "ota-release/effective_config@1";

/// Host-wide config file, read when present
pub const HOST_CONFIG_PATH: &str = "/etc/ota-release/config.toml";

/// Origin of a configuration source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    Host,
    File,
    Cli,
}

/// A contributing config source with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    /// File path (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// SHA-256 digest of raw file bytes (None for builtin/cli)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Effective configuration with full provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub schema_version: u32,

    pub schema_id: String,

    /// When this config was computed
    pub created_at: DateTime<Utc>,

    /// The merged configuration object
    pub config: Value,

    /// Contributing sources in precedence order
    pub sources: Vec<ConfigSource>,
}

impl EffectiveConfig {
    /// Build effective config from layers.
    ///
    /// The host file is optional and skipped when absent; an explicit file
    /// that does not exist is an error.
    pub fn build(
        host_config_path: Option<&Path>,
        explicit_config_path: Option<&Path>,
        cli_overrides: Option<Value>,
    ) -> Result<Self, ConfigError> {
        let mut layers = vec![BuiltinDefaults::default().to_value()];
        let mut sources = vec![ConfigSource {
            origin: ConfigOrigin::Builtin,
            path: None,
            digest: None,
        }];

        if let Some(path) = host_config_path.filter(|p| p.exists()) {
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Host,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(path) = explicit_config_path {
            let (value, digest) = Self::load_toml_file(path)?;
            layers.push(value);
            sources.push(ConfigSource {
                origin: ConfigOrigin::File,
                path: Some(path.to_string_lossy().to_string()),
                digest: Some(digest),
            });
        }

        if let Some(cli) = cli_overrides {
            layers.push(cli);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Cli,
                path: None,
                digest: None,
            });
        }

        let config = Self {
            schema_version: SCHEMA_VERSION,
            schema_id: SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            config: merge_layers(layers),
            sources,
        };
        config.settings()?;
        Ok(config)
    }

    /// Load and parse a TOML file, returning the value and digest
    fn load_toml_file(path: &Path) -> Result<(Value, String), ConfigError> {
        let bytes = fs::read(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let digest = hex::encode(hasher.finalize());

        let contents = String::from_utf8(bytes)
            .map_err(|e| ConfigError::ParseError(format!("Invalid UTF-8: {}", e)))?;
        let toml_value: toml::Value = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;

        Ok((Self::toml_to_json(toml_value), digest))
    }

    /// Convert TOML Value to JSON Value
    fn toml_to_json(toml: toml::Value) -> Value {
        match toml {
            toml::Value::String(s) => Value::String(s),
            toml::Value::Integer(i) => Value::Number(i.into()),
            toml::Value::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(dt) => Value::String(dt.to_string()),
            toml::Value::Array(arr) => {
                Value::Array(arr.into_iter().map(Self::toml_to_json).collect())
            }
            toml::Value::Table(table) => Value::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::toml_to_json(v)))
                    .collect(),
            ),
        }
    }

    /// Typed, validated settings.
    pub fn settings(&self) -> Result<Settings, ConfigError> {
        let settings: Settings = serde_json::from_value(self.config.clone())
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Self::validate(&settings)?;
        Ok(settings)
    }

    fn validate(settings: &Settings) -> Result<(), ConfigError> {
        settings
            .timeouts
            .validate()
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if !settings.release.artifact_name_template.contains("{version}") {
            return Err(ConfigError::ValidationError(
                "release.artifact_name_template must contain {version}".to_string(),
            ));
        }
        if settings.server.max_upload_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "server.max_upload_bytes must be positive".to_string(),
            ));
        }
        crate::ident::validate_version(&settings.release.default_version)
            .map_err(|e| ConfigError::ValidationError(format!("release.default_version: {e}")))?;
        Ok(())
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Get a config value by path (dot-separated)
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.config, |current, part| current.get(part))
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(|v| v.as_str())
    }

    pub fn get_u64(&self, path: &str) -> Option<u64> {
        self.get(path).and_then(|v| v.as_u64())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
