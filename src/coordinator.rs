//! Release & rollout coordinator
//!
//! Owns every piece of state for one storage root: the root lock, the
//! artifact store, the release pool, the rollout table and the config
//! store. Built by [`Coordinator::open`] (lock, reconcile, load) and torn
//! down by [`Coordinator::close`] (final ledger flush).

use std::fs::File;
use std::io::Read;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::artifact::{ArtifactStore, LATEST_DIR};
use crate::config::Settings;
use crate::device_config::{ConfigEntry, ConfigStore};
use crate::error::Result;
use crate::ident::DeviceId;
use crate::ledger::MetadataLedger;
use crate::lock::StorageLock;
use crate::release::{ReconcileReport, ReleasePool, ReleaseRecord};
use crate::rollout::{PromoteAllReport, RolloutEntry, RolloutTable};

/// Point-in-time summary for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub latest: ReleaseRecord,
    /// Whether the latest release has a blob behind it
    pub backed: bool,
    pub ledger_dirty: bool,
    pub devices: usize,
}

#[derive(Debug)]
pub struct Coordinator {
    store: Arc<ArtifactStore>,
    pool: ReleasePool,
    rollout: RolloutTable,
    configs: ConfigStore,
    reconcile_report: ReconcileReport,
    // dropped last
    _lock: StorageLock,
}

impl Coordinator {
    /// Lock the storage root, reconcile the release pool and load the
    /// rollout table.
    pub fn open(settings: &Settings) -> Result<Self> {
        let root = settings.storage.root.as_path();
        let lock = StorageLock::acquire(root, settings.timeouts.lock_wait())?;

        let store = Arc::new(
            ArtifactStore::open(root, settings.release.artifact_name_template.as_str())?
                .with_orphan_threshold(settings.storage.orphan_grace()),
        );
        let (pool, reconcile_report) = ReleasePool::reconcile(
            Arc::clone(&store),
            MetadataLedger::in_root(root),
            settings.release.defaults(),
        )?;
        let rollout = RolloutTable::load(Arc::clone(&store))?;
        let configs = ConfigStore::open(root)?;

        info!(
            root = %root.display(),
            version = %pool.latest().current.version,
            "coordinator open"
        );
        Ok(Self {
            store,
            pool,
            rollout,
            configs,
            reconcile_report,
            _lock: lock,
        })
    }

    /// Flush the ledger if a write is outstanding and release the root.
    pub fn close(self) -> Result<()> {
        if self.pool.flush()? {
            info!("ledger flushed on shutdown");
        }
        info!(root = %self.store.root().display(), "coordinator closed");
        Ok(())
    }

    pub fn reconcile_report(&self) -> &ReconcileReport {
        &self.reconcile_report
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn pool(&self) -> &ReleasePool {
        &self.pool
    }

    pub fn rollout(&self) -> &RolloutTable {
        &self.rollout
    }

    pub fn latest(&self) -> Arc<ReleaseRecord> {
        self.pool.latest()
    }

    pub fn publish<R: Read>(
        &self,
        version: &str,
        artifact: R,
        release_notes: Option<&str>,
    ) -> Result<Arc<ReleaseRecord>> {
        self.pool.publish(version, artifact, release_notes)
    }

    pub fn amend_notes(&self, version: &str, release_notes: &str) -> Result<Arc<ReleaseRecord>> {
        self.pool.amend_notes(version, release_notes)
    }

    /// Rewrite the ledger from memory.
    pub fn flush_ledger(&self) -> Result<()> {
        self.pool.persist()
    }

    pub fn get_current(&self, device_id: &str) -> Result<Arc<RolloutEntry>> {
        let id = DeviceId::parse(device_id)?;
        self.rollout.get_current(&id, &self.pool)
    }

    pub fn promote(&self, device_id: &str) -> Result<Arc<RolloutEntry>> {
        let id = DeviceId::parse(device_id)?;
        self.rollout.promote(&id, &self.pool)
    }

    pub fn promote_all(&self) -> PromoteAllReport {
        self.rollout.promote_all(&self.pool)
    }

    pub fn devices(&self) -> Vec<Arc<RolloutEntry>> {
        self.rollout.list()
    }

    pub fn status(&self) -> CoordinatorStatus {
        CoordinatorStatus {
            latest: (*self.pool.latest()).clone(),
            backed: self.pool.is_backed(),
            ledger_dirty: self.pool.is_ledger_dirty(),
            devices: self.rollout.list().len(),
        }
    }

    /// Open a stored blob by storage key.
    pub fn open_download(&self, storage_key: &str) -> Result<(File, u64)> {
        Ok(self.store.open_blob(storage_key)?)
    }

    /// Open a file in the latest area by name.
    ///
    /// The template name of the current release (`app-v{version}.apk`)
    /// resolves to its blob even when that blob is stored under a
    /// hash-suffixed name.
    pub fn open_latest_file(&self, file_name: &str) -> Result<(File, u64)> {
        let latest = self.pool.latest();
        if file_name == self.store.file_name_for(&latest.current.version) {
            return self.open_download(&latest.current.storage_key);
        }
        self.open_download(&format!("{}/{}", LATEST_DIR, file_name))
    }

    pub fn save_config(&self, key: &str, data: &[u8]) -> Result<ConfigEntry> {
        self.configs.save(key, data)
    }

    pub fn read_config(&self, key: &str) -> Result<Vec<u8>> {
        self.configs.read(key)
    }

    pub fn list_configs(&self) -> Result<Vec<ConfigEntry>> {
        self.configs.list()
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if self.pool.is_ledger_dirty() {
            if let Err(e) = self.pool.persist() {
                warn!(error = %e, "ledger still dirty at drop");
            }
        }
    }
}
