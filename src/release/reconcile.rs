//! Startup reconciliation of the release pool.
//!
//! The artifact store is the truth for which blob is live. The ledger
//! contributes what the store cannot know (release notes), and only when it
//! describes the same content. Any disagreement rewrites the ledger.

use std::fs::File;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use super::{RecordOrigin, ReleaseDefaults, ReleasePool, ReleaseRecord};
use crate::artifact::{ArtifactRef, ArtifactStore, Slot, LATEST_DIR};
use crate::error::{Error, Result};
use crate::ledger::MetadataLedger;

/// Which inputs the reconciled record was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileSource {
    /// Store and ledger describe the same artifact
    Agreed,
    /// Store and ledger disagree; store won
    StoreOverrodeLedger,
    /// Store had an artifact, ledger was missing or unreadable
    StoreOnly,
    /// Ledger present but its blob is gone; kept as-is
    LedgerOnly,
    /// Neither had data; the configured bootstrap artifact was imported
    Bootstrap,
    /// Neither had data; hard-coded fallback record
    Default,
}

/// What reconciliation found and changed.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub source: ReconcileSource,
    pub ledger_rewritten: bool,
    /// Stray blobs and stale temp files removed from the latest area
    pub pruned: usize,
}

impl ReleasePool {
    /// Build the pool from what is on disk.
    pub fn reconcile(
        store: Arc<ArtifactStore>,
        ledger: MetadataLedger,
        defaults: ReleaseDefaults,
    ) -> Result<(Self, ReconcileReport)> {
        let ledger_record = match ledger.load() {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    path = %ledger.path().display(),
                    error = %e,
                    "ledger unreadable, rebuilding from store"
                );
                None
            }
        };

        let mut resident = store.list_current_latest_blob()?.map(|artifact| {
            let committed_at = store
                .resident(&Slot::Latest)
                .ok()
                .flatten()
                .map(|m| m.committed_at)
                .unwrap_or_else(Utc::now);
            (artifact, committed_at)
        });
        if resident.is_none() {
            resident = store
                .adopt_unmanifested(&Slot::Latest)?
                .map(|m| (m.artifact, m.committed_at));
        }
        let pruned = store.prune(&Slot::Latest)?;

        let (record, source) = match (resident, ledger_record) {
            (Some((artifact, _)), Some(recorded)) if artifact.same_content(&recorded.current) => {
                let record = ReleaseRecord {
                    current: artifact,
                    ..recorded
                };
                (record, ReconcileSource::Agreed)
            }
            (Some((artifact, committed_at)), Some(recorded)) => {
                warn!(
                    store_version = %artifact.version,
                    ledger_version = %recorded.current.version,
                    "ledger disagrees with resident artifact; store wins"
                );
                let release_notes = if recorded.current.version == artifact.version {
                    recorded.release_notes
                } else {
                    defaults.missing_notes_placeholder.clone()
                };
                let record = ReleaseRecord {
                    current: artifact,
                    release_notes,
                    published_at: committed_at,
                    origin: RecordOrigin::Reconciled,
                };
                (record, ReconcileSource::StoreOverrodeLedger)
            }
            (Some((artifact, committed_at)), None) => {
                let record = ReleaseRecord {
                    current: artifact,
                    release_notes: defaults.missing_notes_placeholder.clone(),
                    published_at: committed_at,
                    origin: RecordOrigin::Reconciled,
                };
                (record, ReconcileSource::StoreOnly)
            }
            (None, Some(recorded)) => {
                warn!(
                    version = %recorded.current.version,
                    storage_key = %recorded.current.storage_key,
                    "ledger names an artifact the store does not hold"
                );
                (recorded, ReconcileSource::LedgerOnly)
            }
            (None, None) => match &defaults.bootstrap_artifact {
                Some(path) => {
                    let file = File::open(path).map_err(|e| {
                        Error::Config(format!(
                            "bootstrap artifact {}: {}",
                            path.display(),
                            e
                        ))
                    })?;
                    let commit = store.put(&Slot::Latest, &defaults.version, file)?;
                    let record = ReleaseRecord {
                        current: commit.manifest.artifact,
                        release_notes: defaults.release_notes.clone(),
                        published_at: commit.manifest.committed_at,
                        origin: RecordOrigin::Bootstrap,
                    };
                    (record, ReconcileSource::Bootstrap)
                }
                None => (
                    default_record(&defaults, store.file_name_for(&defaults.version)),
                    ReconcileSource::Default,
                ),
            },
        };

        let needs_rewrite = !matches!(
            source,
            ReconcileSource::LedgerOnly | ReconcileSource::Default
        ) && ledger.load().ok().flatten().as_ref() != Some(&record);

        if needs_rewrite {
            ledger.write(&record).map_err(|source| Error::LedgerPersist {
                version: record.current.version.clone(),
                source,
            })?;
        }

        info!(
            version = %record.current.version,
            source = ?source,
            ledger_rewritten = needs_rewrite,
            pruned,
            "release pool reconciled"
        );

        let backed = matches!(
            source,
            ReconcileSource::Agreed
                | ReconcileSource::StoreOverrodeLedger
                | ReconcileSource::StoreOnly
                | ReconcileSource::Bootstrap
        );
        let report = ReconcileReport {
            source,
            ledger_rewritten: needs_rewrite,
            pruned,
        };
        Ok((ReleasePool::from_parts(store, ledger, defaults, record, backed), report))
    }
}

fn default_record(defaults: &ReleaseDefaults, file_name: String) -> ReleaseRecord {
    ReleaseRecord {
        current: ArtifactRef {
            version: defaults.version.clone(),
            storage_key: format!("{}/{}", LATEST_DIR, file_name),
            size_bytes: 0,
            content_hash: String::new(),
        },
        release_notes: defaults.release_notes.clone(),
        published_at: Utc::now(),
        origin: RecordOrigin::Default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::DEFAULT_NAME_TEMPLATE;
    use std::fs;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> Arc<ArtifactStore> {
        Arc::new(ArtifactStore::open(dir.path(), DEFAULT_NAME_TEMPLATE).unwrap())
    }

    fn reconcile(dir: &TempDir, defaults: ReleaseDefaults) -> (ReleasePool, ReconcileReport) {
        ReleasePool::reconcile(store(dir), MetadataLedger::in_root(dir.path()), defaults).unwrap()
    }

    #[test]
    fn test_empty_root_uses_default() {
        let dir = TempDir::new().unwrap();
        let (pool, report) = reconcile(&dir, ReleaseDefaults::default());

        let latest = pool.latest();
        assert_eq!(report.source, ReconcileSource::Default);
        assert_eq!(latest.current.version, "1.0.0");
        assert_eq!(latest.current.storage_key, "latest/app-v1.0.0.apk");
        assert_eq!(latest.release_notes, "Initial release.");
        assert_eq!(latest.origin, RecordOrigin::Default);
        assert!(!pool.is_backed());
        assert!(!report.ledger_rewritten);
    }

    #[test]
    fn test_bootstrap_artifact_imported() {
        let dir = TempDir::new().unwrap();
        let seed = dir.path().join("seed.apk");
        fs::write(&seed, b"factory image").unwrap();

        let defaults = ReleaseDefaults {
            bootstrap_artifact: Some(seed),
            ..ReleaseDefaults::default()
        };
        let (pool, report) = reconcile(&dir, defaults);

        assert_eq!(report.source, ReconcileSource::Bootstrap);
        assert!(report.ledger_rewritten);
        assert!(pool.is_backed());
        assert_eq!(pool.latest().origin, RecordOrigin::Bootstrap);
    }

    #[test]
    fn test_agreement_keeps_ledger_metadata() {
        let dir = TempDir::new().unwrap();
        {
            let (pool, _) = reconcile(&dir, ReleaseDefaults::default());
            pool.publish("1.1.0", &b"apk"[..], Some("keep me")).unwrap();
        }

        let (pool, report) = reconcile(&dir, ReleaseDefaults::default());
        assert_eq!(report.source, ReconcileSource::Agreed);
        assert!(!report.ledger_rewritten);
        assert_eq!(pool.latest().release_notes, "keep me");
        assert_eq!(pool.latest().origin, RecordOrigin::Published);
    }

    #[test]
    fn test_store_wins_over_stale_ledger() {
        let dir = TempDir::new().unwrap();
        {
            let (pool, _) = reconcile(&dir, ReleaseDefaults::default());
            pool.publish("1.0.0", &b"one"[..], Some("old notes")).unwrap();
        }
        let stale = fs::read(dir.path().join("ledger.json")).unwrap();
        {
            let (pool, _) = reconcile(&dir, ReleaseDefaults::default());
            pool.publish("1.1.0", &b"two"[..], Some("lost notes")).unwrap();
        }
        // simulate a crash between the blob commit and the ledger write
        fs::write(dir.path().join("ledger.json"), stale).unwrap();

        let (pool, report) = reconcile(&dir, ReleaseDefaults::default());
        let latest = pool.latest();
        assert_eq!(report.source, ReconcileSource::StoreOverrodeLedger);
        assert!(report.ledger_rewritten);
        assert_eq!(latest.current.version, "1.1.0");
        assert_eq!(latest.release_notes, "No release notes provided");
        assert_eq!(latest.origin, RecordOrigin::Reconciled);

        let ledger = MetadataLedger::in_root(dir.path()).load().unwrap().unwrap();
        assert_eq!(ledger.current.version, "1.1.0");
    }

    #[test]
    fn test_unreadable_ledger_rebuilt_from_store() {
        let dir = TempDir::new().unwrap();
        {
            let (pool, _) = reconcile(&dir, ReleaseDefaults::default());
            pool.publish("3.0.0", &b"three"[..], None).unwrap();
        }
        fs::write(dir.path().join("ledger.json"), b"{ truncated").unwrap();

        let (pool, report) = reconcile(&dir, ReleaseDefaults::default());
        assert_eq!(report.source, ReconcileSource::StoreOnly);
        assert!(report.ledger_rewritten);
        assert_eq!(pool.latest().current.version, "3.0.0");
    }

    #[test]
    fn test_out_of_band_blob_adopted() {
        let dir = TempDir::new().unwrap();
        let _ = store(&dir);
        fs::write(dir.path().join("latest/app-v4.2.0.apk"), b"sideloaded").unwrap();

        let (pool, report) = reconcile(&dir, ReleaseDefaults::default());
        assert_eq!(report.source, ReconcileSource::StoreOnly);
        assert_eq!(pool.latest().current.version, "4.2.0");
        assert!(pool.is_backed());
    }

    #[test]
    fn test_ledger_without_blob_is_kept() {
        let dir = TempDir::new().unwrap();
        {
            let (pool, _) = reconcile(&dir, ReleaseDefaults::default());
            pool.publish("1.5.0", &b"gone soon"[..], Some("notes")).unwrap();
        }
        fs::remove_dir_all(dir.path().join("latest")).unwrap();

        let (pool, report) = reconcile(&dir, ReleaseDefaults::default());
        assert_eq!(report.source, ReconcileSource::LedgerOnly);
        assert_eq!(pool.latest().current.version, "1.5.0");
        assert!(!pool.is_backed());
    }
}
