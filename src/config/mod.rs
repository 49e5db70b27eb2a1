//! Configuration merge system
//!
//! Layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Host config (/etc/ota-release/config.toml)
//! 3. Explicit `--config` file
//! 4. CLI flags

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use effective::{
    ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, HOST_CONFIG_PATH,
};
pub use merge::{deep_merge, merge_layers};
pub use settings::{LoggingSettings, ReleaseSettings, ServerSettings, Settings, StorageSettings};
