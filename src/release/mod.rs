//! Release pool
//!
//! Owns the single "latest" release. A publish writes the blob through the
//! artifact store, swaps the in-memory pointer, then persists the ledger.
//! Publishes are serialized by a writer lock; readers take a snapshot `Arc`
//! and never wait on blob I/O.

mod reconcile;

pub use reconcile::{ReconcileReport, ReconcileSource};

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::artifact::{ArtifactRef, ArtifactStore, Slot};
use crate::error::{Error, Result};
use crate::ident;
use crate::ledger::MetadataLedger;

/// How the current record came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    /// Uploaded through `publish`
    Published,
    /// Rebuilt from the artifact store during reconciliation
    Reconciled,
    /// Configured bootstrap artifact imported at startup
    Bootstrap,
    /// Hard-coded fallback; no blob exists
    Default,
}

/// The release pool's state. Replaced whole, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRecord {
    pub current: ArtifactRef,
    pub release_notes: String,
    pub published_at: DateTime<Utc>,
    pub origin: RecordOrigin,
}

/// Defaults applied when a publish or reconcile lacks data.
#[derive(Debug, Clone)]
pub struct ReleaseDefaults {
    /// Version of the hard-coded fallback record
    pub version: String,
    /// Notes of the hard-coded fallback record
    pub release_notes: String,
    /// Notes used when a publish omits them or reconcile cannot recover them
    pub missing_notes_placeholder: String,
    /// File imported as `version` when neither store nor ledger has data
    pub bootstrap_artifact: Option<std::path::PathBuf>,
}

impl Default for ReleaseDefaults {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            release_notes: "Initial release.".to_string(),
            missing_notes_placeholder: "No release notes provided".to_string(),
            bootstrap_artifact: None,
        }
    }
}

/// The live record and whether a blob in the latest area stands behind it.
#[derive(Debug)]
struct Live {
    record: Arc<ReleaseRecord>,
    backed: bool,
}

/// Owner of the "latest" slot.
#[derive(Debug)]
pub struct ReleasePool {
    store: Arc<ArtifactStore>,
    ledger: MetadataLedger,
    defaults: ReleaseDefaults,
    current: RwLock<Live>,
    publish_lock: Mutex<()>,
    ledger_dirty: AtomicBool,
}

impl ReleasePool {
    fn from_parts(
        store: Arc<ArtifactStore>,
        ledger: MetadataLedger,
        defaults: ReleaseDefaults,
        record: ReleaseRecord,
        backed: bool,
    ) -> Self {
        Self {
            store,
            ledger,
            defaults,
            current: RwLock::new(Live {
                record: Arc::new(record),
                backed,
            }),
            publish_lock: Mutex::new(()),
            ledger_dirty: AtomicBool::new(false),
        }
    }

    /// Snapshot of the current release.
    pub fn latest(&self) -> Arc<ReleaseRecord> {
        self.snapshot().0
    }

    /// Snapshot of the current release and whether it was committed with a
    /// blob. Both come from the same swap.
    pub fn snapshot(&self) -> (Arc<ReleaseRecord>, bool) {
        let live = self.current.read().unwrap_or_else(PoisonError::into_inner);
        (Arc::clone(&live.record), live.backed)
    }

    /// Whether the current release was committed with a blob. Unbacked
    /// records are the hard-coded default and a ledger record whose blob
    /// was gone at startup.
    pub fn is_backed(&self) -> bool {
        self.snapshot().1
    }

    /// Whether the in-memory record is newer than the ledger.
    pub fn is_ledger_dirty(&self) -> bool {
        self.ledger_dirty.load(Ordering::SeqCst)
    }

    /// Publish a new artifact as the latest release.
    ///
    /// On `StorageWrite` nothing changed. On `LedgerPersist` the new release
    /// is live and [`ReleasePool::persist`] can be retried on its own.
    pub fn publish<R: Read>(
        &self,
        version: &str,
        artifact: R,
        release_notes: Option<&str>,
    ) -> Result<Arc<ReleaseRecord>> {
        ident::validate_version(version)?;
        let _writer = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let commit = self.store.put(&Slot::Latest, version, artifact).map_err(|e| {
            error!(version = %version, error = %e, "artifact write failed");
            Error::from(e)
        })?;

        let record = ReleaseRecord {
            current: commit.manifest.artifact,
            release_notes: release_notes
                .map(str::to_string)
                .unwrap_or_else(|| self.defaults.missing_notes_placeholder.clone()),
            published_at: commit.manifest.committed_at,
            origin: RecordOrigin::Published,
        };
        let record = self.swap(record, true);

        if let Some(superseded) = commit.superseded {
            self.store.discard_superseded(&Slot::Latest, &superseded);
        }

        info!(
            version = %record.current.version,
            size_bytes = record.current.size_bytes,
            content_hash = %record.current.content_hash,
            "release published"
        );

        self.persist_locked(&record)?;
        Ok(record)
    }

    /// Replace the notes of the resident release.
    ///
    /// `version` must name the resident release; the artifact is unchanged.
    pub fn amend_notes(&self, version: &str, release_notes: &str) -> Result<Arc<ReleaseRecord>> {
        let _writer = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (current, backed) = self.snapshot();
        if current.current.version != version {
            return Err(Error::VersionMismatch {
                requested: version.to_string(),
                resident: current.current.version.clone(),
            });
        }

        let amended = ReleaseRecord {
            current: current.current.clone(),
            release_notes: release_notes.to_string(),
            published_at: current.published_at,
            origin: current.origin,
        };
        let record = self.swap(amended, backed);
        info!(version = %version, "release notes amended");

        self.persist_locked(&record)?;
        Ok(record)
    }

    /// Write the current record to the ledger.
    pub fn persist(&self) -> Result<()> {
        let _writer = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let record = self.latest();
        self.persist_locked(&record)
    }

    /// Persist only if a previous ledger write failed. Returns whether a
    /// write happened.
    pub fn flush(&self) -> Result<bool> {
        if !self.is_ledger_dirty() {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    fn swap(&self, record: ReleaseRecord, backed: bool) -> Arc<ReleaseRecord> {
        let record = Arc::new(record);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Live {
            record: Arc::clone(&record),
            backed,
        };
        record
    }

    fn persist_locked(&self, record: &ReleaseRecord) -> Result<()> {
        match self.ledger.write(record) {
            Ok(()) => {
                self.ledger_dirty.store(false, Ordering::SeqCst);
                Ok(())
            }
            Err(source) => {
                self.ledger_dirty.store(true, Ordering::SeqCst);
                warn!(
                    version = %record.current.version,
                    error = %source,
                    "ledger write failed; release is live in memory"
                );
                Err(Error::LedgerPersist {
                    version: record.current.version.clone(),
                    source,
                })
            }
        }
    }
}
