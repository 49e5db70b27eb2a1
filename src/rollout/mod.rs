//! Device rollout table
//!
//! Maps each device to the artifact it is assigned. An entry is provisioned
//! from the release pool the first time a device asks and afterwards only
//! changes through an explicit promotion; devices never follow new releases
//! on their own.
//!
//! Each device has its own writer lock, so promotions of different devices
//! run in parallel while promotions of the same device are serialized.
//! Readers take the entry snapshot and never wait on a copy in progress.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactRef, ArtifactStore, Commit, Slot, StoreError};
use crate::error::{Error, Result};
use crate::ident::DeviceId;
use crate::release::ReleasePool;

/// A device's assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutEntry {
    pub device_id: DeviceId,
    pub assigned: ArtifactRef,
    pub assigned_at: DateTime<Utc>,
}

impl RolloutEntry {
    fn from_commit(device_id: &DeviceId, commit: &Commit) -> Self {
        Self {
            device_id: device_id.clone(),
            assigned: commit.manifest.artifact.clone(),
            assigned_at: commit.manifest.committed_at,
        }
    }
}

/// Outcome of a bulk promotion.
#[derive(Debug, Default)]
pub struct PromoteAllReport {
    pub promoted: Vec<Arc<RolloutEntry>>,
    pub failed: Vec<(DeviceId, Error)>,
}

impl PromoteAllReport {
    /// Number of devices now on the latest release.
    pub fn count(&self) -> usize {
        self.promoted.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Default)]
struct DeviceSlot {
    /// Held for the whole of a provision or promotion. Guards the blob
    /// retired by the previous promotion, which is kept for one more
    /// generation so a reader holding the old entry can still fetch it.
    writer: Mutex<Option<ArtifactRef>>,
    entry: RwLock<Option<Arc<RolloutEntry>>>,
}

impl DeviceSlot {
    fn with_entry(entry: RolloutEntry) -> Self {
        Self {
            writer: Mutex::new(None),
            entry: RwLock::new(Some(Arc::new(entry))),
        }
    }

    fn snapshot(&self) -> Option<Arc<RolloutEntry>> {
        self.entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn replace(&self, entry: RolloutEntry) -> Arc<RolloutEntry> {
        let entry = Arc::new(entry);
        *self.entry.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&entry));
        entry
    }
}

/// Owner of the per-device storage areas.
#[derive(Debug)]
pub struct RolloutTable {
    store: Arc<ArtifactStore>,
    devices: RwLock<BTreeMap<DeviceId, Arc<DeviceSlot>>>,
}

impl RolloutTable {
    /// Rebuild the table from the device manifests on disk.
    ///
    /// Device areas without a manifest adopt a legacy-named blob if one is
    /// present. An area whose manifest names a blob that is gone is left
    /// without an entry and is provisioned again on the next query.
    pub fn load(store: Arc<ArtifactStore>) -> Result<Self> {
        let mut devices = BTreeMap::new();
        let mut pruned = 0;

        for id in store.device_slots()? {
            let slot = Slot::Device(id.clone());
            let manifest = match store.resident(&slot) {
                Ok(Some(manifest)) => Some(manifest),
                Ok(None) => store.adopt_unmanifested(&slot)?,
                Err(e) => {
                    warn!(device_id = %id, error = %e, "unreadable device manifest");
                    None
                }
            };
            pruned += store.prune(&slot)?;

            let Some(manifest) = manifest else {
                continue;
            };
            let owned = manifest
                .artifact
                .storage_key
                .starts_with(&format!("{}/", slot.relative_dir()));
            if owned && !store.exists(&manifest.artifact) {
                warn!(
                    device_id = %id,
                    version = %manifest.artifact.version,
                    "device manifest names a missing blob; will reprovision"
                );
                continue;
            }

            let entry = RolloutEntry {
                device_id: id.clone(),
                assigned: manifest.artifact,
                assigned_at: manifest.committed_at,
            };
            devices.insert(id, Arc::new(DeviceSlot::with_entry(entry)));
        }

        info!(devices = devices.len(), pruned, "rollout table loaded");
        Ok(Self {
            store,
            devices: RwLock::new(devices),
        })
    }

    fn slot(&self, device_id: &DeviceId) -> Arc<DeviceSlot> {
        if let Some(slot) = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
        {
            return Arc::clone(slot);
        }
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(devices.entry(device_id.clone()).or_default())
    }

    /// The device's assignment, provisioning it from the current release on
    /// first use.
    pub fn get_current(&self, device_id: &DeviceId, pool: &ReleasePool) -> Result<Arc<RolloutEntry>> {
        let slot = self.slot(device_id);
        if let Some(entry) = slot.snapshot() {
            return Ok(entry);
        }

        let mut retired = slot.writer.lock().unwrap_or_else(PoisonError::into_inner);
        // another caller may have provisioned while we waited
        if let Some(entry) = slot.snapshot() {
            return Ok(entry);
        }

        let commit = self.assign_latest(device_id, pool)?;
        let entry = slot.replace(RolloutEntry::from_commit(device_id, &commit));
        self.retire(device_id, &mut retired, commit.superseded);

        info!(
            device_id = %device_id,
            version = %entry.assigned.version,
            "device provisioned"
        );
        Ok(entry)
    }

    /// Assign the current release to the device.
    ///
    /// Idempotent: a device already holding the current release keeps its
    /// entry unchanged.
    pub fn promote(&self, device_id: &DeviceId, pool: &ReleasePool) -> Result<Arc<RolloutEntry>> {
        let slot = self.slot(device_id);
        let mut retired = slot.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let (latest, latest_backed) = pool.snapshot();
        if let Some(entry) = slot.snapshot() {
            if entry.assigned.same_content(&latest.current)
                && (!latest_backed || self.store.exists(&entry.assigned))
            {
                debug!(device_id = %device_id, version = %entry.assigned.version, "already current");
                return Ok(entry);
            }
        }

        let previous = slot.snapshot().map(|e| e.assigned.version.clone());
        let commit = self.assign_latest(device_id, pool)?;
        let entry = slot.replace(RolloutEntry::from_commit(device_id, &commit));
        self.retire(device_id, &mut retired, commit.superseded);

        info!(
            device_id = %device_id,
            from = previous.as_deref().unwrap_or("-"),
            to = %entry.assigned.version,
            "device promoted"
        );
        Ok(entry)
    }

    /// Promote every known device. Failures are collected per device.
    pub fn promote_all(&self, pool: &ReleasePool) -> PromoteAllReport {
        let ids: Vec<DeviceId> = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();

        let mut report = PromoteAllReport::default();
        for id in ids {
            match self.promote(&id, pool) {
                Ok(entry) => report.promoted.push(entry),
                Err(e) => {
                    warn!(device_id = %id, error = %e, "promotion failed");
                    report.failed.push((id, e));
                }
            }
        }

        info!(
            promoted = report.count(),
            failed = report.failed.len(),
            "bulk promotion finished"
        );
        report
    }

    /// All provisioned entries, ordered by device id.
    pub fn list(&self) -> Vec<Arc<RolloutEntry>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(|slot| slot.snapshot())
            .collect()
    }

    /// Existing entry without provisioning.
    pub fn peek(&self, device_id: &DeviceId) -> Option<Arc<RolloutEntry>> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .and_then(|slot| slot.snapshot())
    }

    /// Commit the pool's current release into the device area. Caller holds
    /// the device's writer lock.
    ///
    /// Whether the release has a blob comes from the pool, never from the
    /// store: a blob that vanished mid-copy means a publish replaced the
    /// release, so the copy is retried against the new one. A missing blob
    /// while the pool still holds the same record is an error.
    fn assign_latest(&self, device_id: &DeviceId, pool: &ReleasePool) -> Result<Commit> {
        let slot = Slot::Device(device_id.clone());
        loop {
            let (latest, backed) = pool.snapshot();
            if !backed {
                return Ok(self.store.commit_unbacked(&slot, &latest.current)?);
            }
            match self.store.copy_into(&latest.current, &slot) {
                Ok(commit) => return Ok(commit),
                Err(
                    e @ (StoreError::BlobMissing(_)
                    | StoreError::HashMismatch { .. }
                    | StoreError::SizeMismatch { .. }),
                ) => {
                    if Arc::ptr_eq(&latest, &pool.latest()) {
                        return Err(Error::from(e));
                    }
                    debug!(
                        device_id = %device_id,
                        version = %latest.current.version,
                        "latest replaced during copy, retrying"
                    );
                }
                Err(e) => return Err(Error::from(e)),
            }
        }
    }

    fn retire(&self, device_id: &DeviceId, retired: &mut Option<ArtifactRef>, superseded: Option<ArtifactRef>) {
        let slot = Slot::Device(device_id.clone());
        if let Some(old) = std::mem::replace(retired, superseded) {
            self.store.discard_superseded(&slot, &old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::DEFAULT_NAME_TEMPLATE;
    use crate::error::ErrorKind;
    use crate::ledger::MetadataLedger;
    use crate::release::ReleaseDefaults;
    use std::fs;
    use std::thread;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Arc<ArtifactStore>,
        pool: ReleasePool,
        table: RolloutTable,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path(), DEFAULT_NAME_TEMPLATE).unwrap());
        let ledger = MetadataLedger::in_root(dir.path());
        let (pool, _) =
            ReleasePool::reconcile(Arc::clone(&store), ledger, ReleaseDefaults::default()).unwrap();
        let table = RolloutTable::load(Arc::clone(&store)).unwrap();
        Fixture {
            _dir: dir,
            store,
            pool,
            table,
        }
    }

    fn id(raw: &str) -> DeviceId {
        DeviceId::parse(raw).unwrap()
    }

    #[test]
    fn test_first_query_provisions_from_latest() {
        let f = fixture();
        f.pool.publish("1.0.0", &b"one"[..], None).unwrap();

        let entry = f.table.get_current(&id("dev-1"), &f.pool).unwrap();
        assert!(entry.assigned.same_content(&f.pool.latest().current));
        assert_eq!(entry.assigned.storage_key, "devices/dev-1/app-v1.0.0.apk");
        assert!(f.store.exists(&entry.assigned));
    }

    #[test]
    fn test_entries_are_sticky() {
        let f = fixture();
        f.pool.publish("1.0.0", &b"one"[..], None).unwrap();
        let first = f.table.get_current(&id("dev-1"), &f.pool).unwrap();

        f.pool.publish("1.1.0", &b"two"[..], None).unwrap();
        let again = f.table.get_current(&id("dev-1"), &f.pool).unwrap();

        assert_eq!(first, again);
        assert_eq!(again.assigned.version, "1.0.0");
    }

    #[test]
    fn test_promote_is_idempotent() {
        let f = fixture();
        f.pool.publish("1.0.0", &b"one"[..], None).unwrap();
        f.table.get_current(&id("dev-1"), &f.pool).unwrap();
        f.pool.publish("1.1.0", &b"two"[..], None).unwrap();

        let first = f.table.promote(&id("dev-1"), &f.pool).unwrap();
        let second = f.table.promote(&id("dev-1"), &f.pool).unwrap();

        assert_eq!(first, second);
        assert_eq!(second.assigned.version, "1.1.0");
    }

    #[test]
    fn test_promote_keeps_one_retired_generation() {
        let f = fixture();
        let dev = id("dev-1");
        f.pool.publish("1.0.0", &b"one"[..], None).unwrap();
        let v1 = f.table.get_current(&dev, &f.pool).unwrap();

        f.pool.publish("1.1.0", &b"two"[..], None).unwrap();
        let v2 = f.table.promote(&dev, &f.pool).unwrap();
        assert!(f.store.exists(&v1.assigned));

        f.pool.publish("1.2.0", &b"three"[..], None).unwrap();
        f.table.promote(&dev, &f.pool).unwrap();
        assert!(!f.store.exists(&v1.assigned));
        assert!(f.store.exists(&v2.assigned));
    }

    #[test]
    fn test_unbacked_default_is_recorded_without_copy() {
        let f = fixture();
        let entry = f.table.get_current(&id("dev-1"), &f.pool).unwrap();

        assert_eq!(entry.assigned.version, "1.0.0");
        assert_eq!(entry.assigned.storage_key, "latest/app-v1.0.0.apk");
        assert!(!f.store.exists(&entry.assigned));
    }

    #[test]
    fn test_first_queries_during_publishes_get_stored_copies() {
        let f = fixture();
        f.pool.publish("1.0.0", &b"1.0.0"[..], None).unwrap();

        let entries: Vec<Arc<RolloutEntry>> = thread::scope(|s| {
            s.spawn(|| {
                for minor in 1..=200 {
                    let version = format!("1.{minor}.0");
                    f.pool.publish(&version, version.as_bytes(), None).unwrap();
                }
            });
            let queries: Vec<_> = (0..4)
                .map(|worker| {
                    let f = &f;
                    s.spawn(move || {
                        (0..100)
                            .map(|n| {
                                let dev = id(&format!("d{worker}-{n}"));
                                f.table.get_current(&dev, &f.pool).unwrap()
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            queries.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(entries.len(), 400);
        for entry in &entries {
            assert!(
                entry.assigned.storage_key.starts_with("devices/"),
                "{} points at {}",
                entry.device_id,
                entry.assigned.storage_key
            );
            assert!(f.store.exists(&entry.assigned), "{} lost its blob", entry.device_id);
        }
    }

    #[test]
    fn test_missing_blob_of_unchanged_release_is_not_found() {
        let f = fixture();
        let record = f.pool.publish("1.0.0", &b"one"[..], None).unwrap();
        fs::remove_file(f.store.blob_path(&record.current.storage_key).unwrap()).unwrap();

        let err = f.table.get_current(&id("dev-1"), &f.pool).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(f.table.peek(&id("dev-1")).is_none());
    }

    #[test]
    fn test_promote_all_reports_every_device() {
        let f = fixture();
        f.pool.publish("1.0.0", &b"one"[..], None).unwrap();
        for raw in ["a", "b", "c"] {
            f.table.get_current(&id(raw), &f.pool).unwrap();
        }
        f.pool.publish("2.0.0", &b"two"[..], None).unwrap();

        let report = f.table.promote_all(&f.pool);
        assert!(report.is_complete());
        assert_eq!(report.count(), 3);
        assert!(f.table.list().iter().all(|e| e.assigned.version == "2.0.0"));
    }

    #[test]
    fn test_promote_all_collects_failures() {
        let f = fixture();
        f.pool.publish("1.0.0", &b"one"[..], None).unwrap();
        f.table.get_current(&id("ok"), &f.pool).unwrap();
        f.table.get_current(&id("broken"), &f.pool).unwrap();
        f.pool.publish("2.0.0", &b"two"[..], None).unwrap();

        // a file where the device directory should be makes its copy fail
        let area = f.store.root().join("devices/broken");
        fs::remove_dir_all(&area).unwrap();
        fs::write(&area, b"not a directory").unwrap();

        let report = f.table.promote_all(&f.pool);
        assert_eq!(report.count(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, id("broken"));
        assert_eq!(report.failed[0].1.kind(), ErrorKind::StorageWrite);
        assert_eq!(f.table.peek(&id("ok")).unwrap().assigned.version, "2.0.0");
        assert_eq!(f.table.peek(&id("broken")).unwrap().assigned.version, "1.0.0");
    }

    #[test]
    fn test_load_restores_entries() {
        let f = fixture();
        f.pool.publish("1.0.0", &b"one"[..], None).unwrap();
        let before = f.table.get_current(&id("dev-1"), &f.pool).unwrap();

        let reloaded = RolloutTable::load(Arc::clone(&f.store)).unwrap();
        assert_eq!(reloaded.peek(&id("dev-1")), Some(before));
    }

    #[test]
    fn test_load_adopts_legacy_device_blob() {
        let f = fixture();
        let area = f.store.root().join("devices/legacy-7");
        fs::create_dir_all(&area).unwrap();
        fs::write(area.join("app-v0.9.0.apk"), b"old build").unwrap();

        let table = RolloutTable::load(Arc::clone(&f.store)).unwrap();
        let entry = table.peek(&id("legacy-7")).unwrap();
        assert_eq!(entry.assigned.version, "0.9.0");
        assert!(f.store.exists(&entry.assigned));
    }

    #[test]
    fn test_concurrent_first_queries_agree() {
        let f = fixture();
        f.pool.publish("1.0.0", &b"one"[..], None).unwrap();
        let dev = id("dev-1");

        let entries: Vec<Arc<RolloutEntry>> = thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| f.table.get_current(&dev, &f.pool).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(entries.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_current_entry_always_has_its_blob_during_promotions() {
        let f = fixture();
        let dev = id("dev-1");
        f.pool.publish("1.0.0", &b"v1"[..], None).unwrap();
        f.table.get_current(&dev, &f.pool).unwrap();

        thread::scope(|s| {
            s.spawn(|| {
                for minor in 1..=10 {
                    let version = format!("1.{minor}.0");
                    f.pool
                        .publish(&version, version.as_bytes(), None)
                        .unwrap();
                    f.table.promote(&dev, &f.pool).unwrap();
                }
            });
            for _ in 0..2 {
                s.spawn(|| {
                    for _ in 0..200 {
                        let seen = f.table.get_current(&dev, &f.pool).unwrap();
                        assert!(seen.assigned.size_bytes > 0);
                        if !f.store.exists(&seen.assigned) {
                            let now = f.table.get_current(&dev, &f.pool).unwrap();
                            assert_ne!(now, seen, "current entry lost its blob");
                        }
                    }
                });
            }
        });

        let last = f.table.get_current(&dev, &f.pool).unwrap();
        assert_eq!(last.assigned.version, "1.10.0");
        assert!(f.store.exists(&last.assigned));
    }

    #[test]
    fn test_devices_are_independent() {
        let f = fixture();
        f.pool.publish("1.0.0", &b"one"[..], None).unwrap();

        thread::scope(|s| {
            for n in 0..6 {
                let table = &f.table;
                let pool = &f.pool;
                s.spawn(move || {
                    let dev = DeviceId::parse(&format!("dev-{n}")).unwrap();
                    table.promote(&dev, pool).unwrap();
                });
            }
        });

        assert_eq!(f.table.list().len(), 6);
    }
}
