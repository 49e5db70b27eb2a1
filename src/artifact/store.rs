//! Filesystem artifact store.
//!
//! Layout under the storage root:
//! `latest/<blob>` + `latest/slot.json`, and
//! `devices/<device_id>/<blob>` + `devices/<device_id>/slot.json`.
//!
//! Replacing a slot's contents:
//! 1. stream the new blob into a temp file in the slot directory
//! 2. rename it to its final name; a committed blob is never renamed over
//!    with different bytes, so a colliding name gets a content-hash suffix
//! 3. rewrite slot.json (temp + rename), the commit point
//! 4. once the owner has swapped its in-memory pointer, discard the blob the
//!    previous manifest named ([`ArtifactStore::discard_superseded`])
//!
//! A reader resolving through slot.json sees either the old blob or the new
//! one. There is never an emptied-but-not-refilled window, and the old blob
//! outlives every in-memory reference to it.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::{
    artifact_file_name, legacy_version_from_file_name, ArtifactRef, SlotManifest,
    MANIFEST_FILENAME,
};
use crate::fsutil::{self, TEMP_PREFIX};
use crate::ident::{self, DeviceId, IdentError};

/// Directory holding the single latest artifact
pub const LATEST_DIR: &str = "latest";

/// Directory holding one sub-directory per device
pub const DEVICES_DIR: &str = "devices";

/// Store result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from artifact store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("slot manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("invalid identifier: {0}")]
    Ident(#[from] IdentError),

    #[error("artifact {version} is empty")]
    EmptyArtifact { version: String },

    #[error("artifact {version} not found in {slot}")]
    NotFound { slot: String, version: String },

    #[error("no blob stored at {0}")]
    BlobMissing(String),

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("content SHA-256 mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

impl StoreError {
    /// Errors caused by the caller's input rather than the storage backend.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            StoreError::Ident(_) | StoreError::EmptyArtifact { .. } | StoreError::InvalidKey(_)
        )
    }
}

/// A storage area that holds at most one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    Latest,
    Device(DeviceId),
}

impl Slot {
    /// Directory of this slot relative to the root, `/`-separated.
    pub fn relative_dir(&self) -> String {
        match self {
            Slot::Latest => LATEST_DIR.to_string(),
            Slot::Device(id) => format!("{}/{}", DEVICES_DIR, id),
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.relative_dir())
    }
}

/// Outcome of replacing a slot's contents.
#[derive(Debug, Clone)]
pub struct Commit {
    /// The manifest now on disk
    pub manifest: SlotManifest,
    /// What the slot held before, still on disk until discarded
    pub superseded: Option<ArtifactRef>,
}

/// Filesystem-backed artifact store.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    name_template: String,
    orphan_threshold: Duration,
}

impl ArtifactStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>, name_template: impl Into<String>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(LATEST_DIR))?;
        fs::create_dir_all(root.join(DEVICES_DIR))?;

        // Verify the store is writable
        let scratch = root.join(fsutil::temp_file_name());
        File::create(&scratch)?;
        fs::remove_file(&scratch)?;

        Ok(Self {
            root,
            name_template: name_template.into(),
            orphan_threshold: Duration::from_secs(3600),
        })
    }

    /// Override how old a temp file must be before cleanup removes it.
    pub fn with_orphan_threshold(mut self, threshold: Duration) -> Self {
        self.orphan_threshold = threshold;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name a blob of `version` is stored under.
    pub fn file_name_for(&self, version: &str) -> String {
        artifact_file_name(&self.name_template, version)
    }

    fn slot_dir(&self, slot: &Slot) -> PathBuf {
        match slot {
            Slot::Latest => self.root.join(LATEST_DIR),
            Slot::Device(id) => self.root.join(DEVICES_DIR).join(id.as_str()),
        }
    }

    fn manifest_path(&self, slot: &Slot) -> PathBuf {
        self.slot_dir(slot).join(MANIFEST_FILENAME)
    }

    fn storage_key(slot: &Slot, file_name: &str) -> String {
        format!("{}/{}", slot.relative_dir(), file_name)
    }

    /// Resolve a storage key to a path, refusing anything that could escape
    /// the root or reach a manifest or temp file.
    pub fn blob_path(&self, storage_key: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(storage_key);
        let mut path = self.root.clone();
        let mut depth = 0;

        for component in relative.components() {
            match component {
                Component::Normal(part) => {
                    let part = part
                        .to_str()
                        .ok_or_else(|| StoreError::InvalidKey(storage_key.to_string()))?;
                    if part.starts_with('.') {
                        return Err(StoreError::InvalidKey(storage_key.to_string()));
                    }
                    path.push(part);
                    depth += 1;
                }
                _ => return Err(StoreError::InvalidKey(storage_key.to_string())),
            }
        }

        let is_manifest = path.file_name().and_then(|n| n.to_str()) == Some(MANIFEST_FILENAME);
        if depth < 2 || is_manifest {
            return Err(StoreError::InvalidKey(storage_key.to_string()));
        }
        Ok(path)
    }

    /// Open a stored blob for reading, returning the file and its length.
    pub fn open_blob(&self, storage_key: &str) -> StoreResult<(File, u64)> {
        let path = self.blob_path(storage_key)?;
        match File::open(&path) {
            Ok(file) => {
                let len = file.metadata()?.len();
                Ok((file, len))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::BlobMissing(storage_key.to_string()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Whether the blob an artifact reference names is present and complete.
    pub fn exists(&self, artifact: &ArtifactRef) -> bool {
        self.blob_path(&artifact.storage_key)
            .ok()
            .and_then(|path| fs::metadata(path).ok())
            .map(|meta| meta.is_file() && meta.len() == artifact.size_bytes)
            .unwrap_or(false)
    }

    /// Whether `slot` currently holds `version`.
    pub fn exists_version(&self, slot: &Slot, version: &str) -> bool {
        matches!(
            self.resident(slot),
            Ok(Some(manifest)) if manifest.artifact.version == version && self.exists(&manifest.artifact)
        )
    }

    /// Write a new artifact into `slot`, replacing the resident one.
    pub fn put<R: Read>(&self, slot: &Slot, version: &str, reader: R) -> StoreResult<Commit> {
        ident::validate_version(version)?;

        let dir = self.slot_dir(slot);
        fs::create_dir_all(&dir)?;
        let temp_path = dir.join(fsutil::temp_file_name());

        let (size_bytes, content_hash) = match fsutil::write_hashed(&temp_path, reader) {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(StoreError::Io(e));
            }
        };

        if size_bytes == 0 {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::EmptyArtifact {
                version: version.to_string(),
            });
        }

        let file_name = self.file_name_for(version);
        self.install(slot, &temp_path, version, &file_name, size_bytes, content_hash)
    }

    /// Copy an already-stored artifact into `slot`, replacing the resident one.
    ///
    /// The copy is re-hashed and must match the source reference.
    pub fn copy_into(&self, source: &ArtifactRef, slot: &Slot) -> StoreResult<Commit> {
        let (reader, len) = self.open_blob(&source.storage_key)?;
        if len != source.size_bytes {
            return Err(StoreError::SizeMismatch {
                expected: source.size_bytes,
                actual: len,
            });
        }

        let dir = self.slot_dir(slot);
        fs::create_dir_all(&dir)?;
        let temp_path = dir.join(fsutil::temp_file_name());

        let (size_bytes, content_hash) = match fsutil::write_hashed(&temp_path, reader) {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(StoreError::Io(e));
            }
        };

        if size_bytes != source.size_bytes {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::SizeMismatch {
                expected: source.size_bytes,
                actual: size_bytes,
            });
        }
        if content_hash != source.content_hash {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::HashMismatch {
                expected: source.content_hash.clone(),
                actual: content_hash,
            });
        }

        let file_name = self.file_name_for(&source.version);
        self.install(slot, &temp_path, &source.version, &file_name, size_bytes, content_hash)
    }

    /// Rename a verified temp blob into place and commit the manifest.
    fn install(
        &self,
        slot: &Slot,
        temp_path: &Path,
        version: &str,
        file_name: &str,
        size_bytes: u64,
        content_hash: String,
    ) -> StoreResult<Commit> {
        let superseded = self.read_manifest(slot).ok().flatten().map(|m| m.artifact);
        let storage_key = self.free_key(slot, file_name, &content_hash, superseded.as_ref());
        let artifact = ArtifactRef {
            version: version.to_string(),
            storage_key,
            size_bytes,
            content_hash,
        };
        let final_path = match self.blob_path(&artifact.storage_key) {
            Ok(path) => path,
            Err(e) => {
                let _ = fs::remove_file(temp_path);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(temp_path, &final_path) {
            let _ = fs::remove_file(temp_path);
            return Err(StoreError::Io(e));
        }

        let manifest = SlotManifest::new(artifact);
        self.write_manifest(slot, &manifest)?;

        debug!(
            slot = %slot,
            version = %manifest.artifact.version,
            size_bytes = manifest.artifact.size_bytes,
            "slot committed"
        );
        Ok(Commit {
            manifest,
            superseded,
        })
    }

    /// Storage key to install a blob with `content_hash` under.
    ///
    /// The template-derived name is used unless another blob already holds
    /// it: the previous release of a republished version, or a device's
    /// retired copy that a reader may still be streaming. Then the name gets
    /// a content-hash suffix. A suffixed name that exists already holds the
    /// same bytes.
    fn free_key(
        &self,
        slot: &Slot,
        file_name: &str,
        content_hash: &str,
        resident: Option<&ArtifactRef>,
    ) -> String {
        let key = Self::storage_key(slot, file_name);
        let taken = self
            .blob_path(&key)
            .map(|path| path.exists())
            .unwrap_or(false);
        let same_bytes_resident =
            matches!(resident, Some(r) if r.storage_key == key && r.content_hash == content_hash);
        if !taken || same_bytes_resident {
            return key;
        }
        Self::storage_key(slot, &hashed_file_name(file_name, content_hash))
    }

    /// Remove the blob a previous manifest of `slot` named.
    ///
    /// No-op when the slot's current manifest still names it (same version
    /// re-committed) or when the blob lives in another slot.
    pub fn discard_superseded(&self, slot: &Slot, superseded: &ArtifactRef) {
        let owned_by_slot = superseded
            .storage_key
            .starts_with(&format!("{}/", slot.relative_dir()));
        let still_named = matches!(
            self.read_manifest(slot),
            Ok(Some(m)) if m.artifact.storage_key == superseded.storage_key
        );
        if owned_by_slot && !still_named {
            self.remove_blob_quietly(&superseded.storage_key);
        }
    }

    /// Record an artifact that has no blob in this slot.
    ///
    /// Used when a slot must follow a bootstrap release that was never
    /// uploaded: the manifest points at the source reference unchanged.
    pub fn commit_unbacked(&self, slot: &Slot, artifact: &ArtifactRef) -> StoreResult<Commit> {
        fs::create_dir_all(self.slot_dir(slot))?;
        let superseded = self.read_manifest(slot).ok().flatten().map(|m| m.artifact);

        let manifest = SlotManifest::new(artifact.clone());
        self.write_manifest(slot, &manifest)?;
        Ok(Commit {
            manifest,
            superseded,
        })
    }

    /// Remove `version` from `slot`. The manifest goes first so the slot is
    /// never observed naming a deleted blob.
    pub fn delete(&self, slot: &Slot, version: &str) -> StoreResult<()> {
        let manifest = match self.read_manifest(slot)? {
            Some(m) if m.artifact.version == version => m,
            _ => {
                return Err(StoreError::NotFound {
                    slot: slot.relative_dir(),
                    version: version.to_string(),
                })
            }
        };

        fs::remove_file(self.manifest_path(slot))?;
        fsutil::sync_dir(&self.slot_dir(slot))?;
        if manifest
            .artifact
            .storage_key
            .starts_with(&format!("{}/", slot.relative_dir()))
        {
            self.remove_blob_quietly(&manifest.artifact.storage_key);
        }
        info!(slot = %slot, version = %version, "artifact deleted");
        Ok(())
    }

    /// The committed manifest of `slot`, if any.
    pub fn resident(&self, slot: &Slot) -> StoreResult<Option<SlotManifest>> {
        self.read_manifest(slot)
    }

    /// The single artifact resident in the latest area, if its blob exists.
    pub fn list_current_latest_blob(&self) -> StoreResult<Option<ArtifactRef>> {
        match self.read_manifest(&Slot::Latest)? {
            Some(manifest) if self.exists(&manifest.artifact) => Ok(Some(manifest.artifact)),
            Some(manifest) => {
                warn!(
                    version = %manifest.artifact.version,
                    storage_key = %manifest.artifact.storage_key,
                    "latest manifest names a missing blob"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Adopt a manifest-less blob left in `slot` (legacy layout or an
    /// out-of-band copy). The newest blob wins; its version comes from the
    /// legacy file name.
    pub fn adopt_unmanifested(&self, slot: &Slot) -> StoreResult<Option<SlotManifest>> {
        let mut candidates = Vec::new();
        for entry in fs::read_dir(self.slot_dir(slot))? {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') || name == MANIFEST_FILENAME || !path.is_file() {
                continue;
            }
            let Some(version) = legacy_version_from_file_name(&name) else {
                warn!(slot = %slot, file = %name, "ignoring blob with unrecognised name");
                continue;
            };
            if ident::validate_version(&version).is_err() {
                warn!(slot = %slot, file = %name, "ignoring blob with invalid legacy version");
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            candidates.push((modified, name, version));
        }

        candidates.sort();
        let Some((_, file_name, version)) = candidates.pop() else {
            return Ok(None);
        };

        let storage_key = Self::storage_key(slot, &file_name);
        let (size_bytes, content_hash) = fsutil::hash_file(&self.blob_path(&storage_key)?)?;
        if size_bytes == 0 {
            warn!(slot = %slot, file = %file_name, "ignoring empty legacy blob");
            return Ok(None);
        }

        let manifest = SlotManifest::new(ArtifactRef {
            version,
            storage_key,
            size_bytes,
            content_hash,
        });
        self.write_manifest(slot, &manifest)?;
        info!(
            slot = %slot,
            version = %manifest.artifact.version,
            "adopted blob without manifest"
        );
        Ok(Some(manifest))
    }

    /// Remove blobs the manifest does not name and stale temp files.
    pub fn prune(&self, slot: &Slot) -> StoreResult<usize> {
        let dir = self.slot_dir(slot);
        if !dir.exists() {
            return Ok(0);
        }

        let keep = self
            .read_manifest(slot)?
            .map(|m| m.artifact.file_name().to_string());
        let mut removed = fsutil::cleanup_orphaned_temps(&dir, self.orphan_threshold)?;

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with(TEMP_PREFIX) || name == MANIFEST_FILENAME || !path.is_file() {
                continue;
            }
            if keep.as_deref() != Some(name) {
                fs::remove_file(&path)?;
                info!(slot = %slot, file = %name, "removed stray blob");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Device ids that have a storage area. Directories whose names fail
    /// validation are skipped.
    pub fn device_slots(&self) -> StoreResult<Vec<DeviceId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(DEVICES_DIR))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().map(DeviceId::parse) {
                Some(Ok(id)) => ids.push(id),
                _ => warn!(dir = ?name, "skipping device directory with invalid name"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn read_manifest(&self, slot: &Slot) -> StoreResult<Option<SlotManifest>> {
        match fs::read_to_string(self.manifest_path(slot)) {
            Ok(json) => Ok(Some(serde_json::from_str(&json)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn write_manifest(&self, slot: &Slot, manifest: &SlotManifest) -> StoreResult<()> {
        let json = serde_json::to_vec_pretty(manifest)?;
        fsutil::write_atomic(&self.manifest_path(slot), &json)?;
        Ok(())
    }

    fn remove_blob_quietly(&self, storage_key: &str) {
        if let Ok(path) = self.blob_path(storage_key) {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(storage_key = %storage_key, error = %e, "failed to remove superseded blob");
                }
            }
        }
    }
}

/// `app-v1.0.apk` -> `app-v1.0.<hash prefix>.apk`
fn hashed_file_name(file_name: &str, content_hash: &str) -> String {
    let short = &content_hash[..content_hash.len().min(12)];
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}.{short}.{ext}"),
        _ => format!("{file_name}.{short}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::DEFAULT_NAME_TEMPLATE;
    use std::io::Read;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::open(dir.path(), DEFAULT_NAME_TEMPLATE).unwrap()
    }

    fn read_blob(store: &ArtifactStore, artifact: &ArtifactRef) -> Vec<u8> {
        let (mut file, _) = store.open_blob(&artifact.storage_key).unwrap();
        let mut out = Vec::new();
        file.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_put_and_resolve_latest() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let manifest = store.put(&Slot::Latest, "1.1.0", &b"apk bytes"[..]).unwrap().manifest;
        assert_eq!(manifest.artifact.storage_key, "latest/app-v1.1.0.apk");
        assert_eq!(manifest.artifact.size_bytes, 9);

        let latest = store.list_current_latest_blob().unwrap().unwrap();
        assert_eq!(latest, manifest.artifact);
        assert_eq!(read_blob(&store, &latest), b"apk bytes");
        assert!(store.exists_version(&Slot::Latest, "1.1.0"));
    }

    #[test]
    fn test_put_replaces_and_keeps_one_blob() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(&Slot::Latest, "1.0.0", &b"old"[..]).unwrap();
        let commit = store.put(&Slot::Latest, "1.1.0", &b"new"[..]).unwrap();

        // superseded blob stays until the owner discards it
        let superseded = commit.superseded.unwrap();
        assert_eq!(superseded.version, "1.0.0");
        assert!(store.exists(&superseded));
        store.discard_superseded(&Slot::Latest, &superseded);
        assert!(!store.exists(&superseded));

        let blobs: Vec<_> = fs::read_dir(dir.path().join(LATEST_DIR))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n != MANIFEST_FILENAME)
            .collect();
        assert_eq!(blobs, vec!["app-v1.1.0.apk".to_string()]);
        assert!(!store.exists_version(&Slot::Latest, "1.0.0"));
    }

    #[test]
    fn test_put_rejects_empty_and_invalid() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(matches!(
            store.put(&Slot::Latest, "1.0.0", &b""[..]),
            Err(StoreError::EmptyArtifact { .. })
        ));
        assert!(matches!(
            store.put(&Slot::Latest, "../evil", &b"x"[..]),
            Err(StoreError::Ident(_))
        ));
        // nothing committed
        assert!(store.resident(&Slot::Latest).unwrap().is_none());
    }

    #[test]
    fn test_failed_put_leaves_previous_committed() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
            }
        }

        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let committed = store.put(&Slot::Latest, "1.0.0", &b"good"[..]).unwrap();

        assert!(store.put(&Slot::Latest, "2.0.0", Failing).is_err());
        assert_eq!(
            store.list_current_latest_blob().unwrap(),
            Some(committed.manifest.artifact)
        );
    }

    #[test]
    fn test_copy_into_device_slot() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let device = Slot::Device(DeviceId::parse("dev-42").unwrap());

        let latest = store.put(&Slot::Latest, "1.1.0", &b"payload"[..]).unwrap().manifest;
        let copied = store.copy_into(&latest.artifact, &device).unwrap().manifest;

        assert_eq!(copied.artifact.storage_key, "devices/dev-42/app-v1.1.0.apk");
        assert!(copied.artifact.same_content(&latest.artifact));
        assert_eq!(read_blob(&store, &copied.artifact), b"payload");
        assert_eq!(store.device_slots().unwrap(), vec![DeviceId::parse("dev-42").unwrap()]);
    }

    #[test]
    fn test_republished_version_never_overwrites_committed_blob() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let first = store.put(&Slot::Latest, "1.0.0", &b"first"[..]).unwrap().manifest;
        let commit = store.put(&Slot::Latest, "1.0.0", &b"rebuilt"[..]).unwrap();
        let second = commit.manifest.artifact;

        assert_ne!(second.storage_key, first.artifact.storage_key);
        assert!(second.storage_key.starts_with("latest/app-v1.0.0."));
        assert!(second.storage_key.ends_with(".apk"));
        // the superseded record still describes the bytes at its key
        let superseded = commit.superseded.unwrap();
        assert!(store.exists(&superseded));
        assert_eq!(read_blob(&store, &superseded), b"first");
        assert_eq!(read_blob(&store, &second), b"rebuilt");

        store.discard_superseded(&Slot::Latest, &superseded);
        assert!(!store.exists(&superseded));
        assert!(store.exists(&second));
    }

    #[test]
    fn test_republished_identical_bytes_keep_their_key() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let first = store.put(&Slot::Latest, "1.0.0", &b"same"[..]).unwrap().manifest;
        let commit = store.put(&Slot::Latest, "1.0.0", &b"same"[..]).unwrap();
        assert_eq!(commit.manifest.artifact, first.artifact);

        // still named by the manifest, so discarding is a no-op
        store.discard_superseded(&Slot::Latest, &commit.superseded.unwrap());
        assert!(store.exists(&commit.manifest.artifact));
    }

    #[test]
    fn test_device_copy_avoids_retired_blob_name() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let device = Slot::Device(DeviceId::parse("dev-1").unwrap());

        let a = store.put(&Slot::Latest, "1.0.0", &b"build a"[..]).unwrap().manifest;
        let retired = store.copy_into(&a.artifact, &device).unwrap().manifest.artifact;
        let b = store.put(&Slot::Latest, "2.0.0", &b"build b"[..]).unwrap().manifest;
        store.copy_into(&b.artifact, &device).unwrap();

        // 1.0.0 republished with other bytes while the retired copy is kept
        let c = store.put(&Slot::Latest, "1.0.0", &b"build c"[..]).unwrap().manifest;
        let current = store.copy_into(&c.artifact, &device).unwrap().manifest.artifact;

        assert_ne!(current.storage_key, retired.storage_key);
        assert_eq!(read_blob(&store, &retired), b"build a");
        assert_eq!(read_blob(&store, &current), b"build c");
    }

    #[test]
    fn test_copy_into_checks_size() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let device = Slot::Device(DeviceId::parse("dev-1").unwrap());

        let mut source = store.put(&Slot::Latest, "1.0.0", &b"payload"[..]).unwrap().manifest.artifact;
        source.size_bytes += 1;

        assert!(matches!(
            store.copy_into(&source, &device),
            Err(StoreError::SizeMismatch { expected: 8, actual: 7 })
        ));
        assert!(store.resident(&device).unwrap().is_none());
    }

    #[test]
    fn test_delete_requires_resident_version() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.put(&Slot::Latest, "1.0.0", &b"bytes"[..]).unwrap();

        assert!(matches!(
            store.delete(&Slot::Latest, "9.9.9"),
            Err(StoreError::NotFound { .. })
        ));
        store.delete(&Slot::Latest, "1.0.0").unwrap();
        assert!(store.list_current_latest_blob().unwrap().is_none());
        assert!(!dir.path().join("latest/app-v1.0.0.apk").exists());
    }

    #[test]
    fn test_blob_path_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for key in ["../etc/passwd", "/etc/passwd", "latest", "latest/slot.json", "latest/.tmp.1"] {
            assert!(
                matches!(store.blob_path(key), Err(StoreError::InvalidKey(_))),
                "{key} should be rejected"
            );
        }
        assert!(store.blob_path("latest/app-v1.0.0.apk").is_ok());
    }

    #[test]
    fn test_adopt_and_prune() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        fs::write(dir.path().join("latest/app-v1.2.0.apk"), b"dropped in").unwrap();
        fs::write(dir.path().join("latest/README"), b"not an artifact").unwrap();

        assert!(store.list_current_latest_blob().unwrap().is_none());
        let adopted = store.adopt_unmanifested(&Slot::Latest).unwrap().unwrap();
        assert_eq!(adopted.artifact.version, "1.2.0");
        assert_eq!(adopted.artifact.size_bytes, 10);

        let removed = store.prune(&Slot::Latest).unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.path().join("latest/README").exists());
        assert!(store.exists(&adopted.artifact));
    }
}
