//! OTA release & rollout coordinator
//!
//! Owns the single "latest" artifact slot, the per-device artifact
//! assignments and the metadata ledger describing them, and keeps the three
//! consistent on disk and in memory under concurrent access.

pub mod artifact;
pub mod config;
pub mod coordinator;
pub mod device_config;
pub mod error;
pub mod fsutil;
pub mod ident;
pub mod ledger;
pub mod lock;
pub mod release;
pub mod rollout;
pub mod timeout;

pub use artifact::{ArtifactRef, ArtifactStore, Slot};
pub use config::{EffectiveConfig, Settings};
pub use coordinator::{Coordinator, CoordinatorStatus};
pub use device_config::{ConfigEntry, ConfigStore};
pub use error::{Error, ErrorKind, Result};
pub use ident::DeviceId;
pub use ledger::MetadataLedger;
pub use release::{RecordOrigin, ReconcileReport, ReconcileSource, ReleaseDefaults, ReleasePool, ReleaseRecord};
pub use rollout::{PromoteAllReport, RolloutEntry, RolloutTable};
pub use timeout::{OperationClass, TimeoutConfig};

/// Install the global `tracing` subscriber. `RUST_LOG` wins over
/// `default_filter`. Events go to stderr so command output stays clean.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
