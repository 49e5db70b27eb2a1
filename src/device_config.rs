//! Device provisioning config store
//!
//! Flat key → bytes storage under `<root>/configs`. Nothing here touches the
//! release or rollout state; it shares the root only.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::fsutil;
use crate::ident;

/// Directory under the storage root holding config blobs
pub const CONFIGS_DIR: &str = "configs";

/// One stored config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn open(root: &Path) -> Result<Self> {
        let dir = root.join(CONFIGS_DIR);
        fs::create_dir_all(&dir).map_err(|e| Error::StorageWrite(e.into()))?;
        Ok(Self { dir })
    }

    /// Store `data` under `key`, replacing any previous value.
    pub fn save(&self, key: &str, data: &[u8]) -> Result<ConfigEntry> {
        ident::validate_config_key(key)?;
        let path = self.dir.join(key);
        fsutil::write_atomic(&path, data).map_err(|e| Error::StorageWrite(e.into()))?;
        info!(key = %key, size_bytes = data.len(), "device config saved");
        entry_for(key, &path).map_err(|e| Error::StorageWrite(e.into()))
    }

    /// Contents stored under `key`.
    pub fn read(&self, key: &str) -> Result<Vec<u8>> {
        ident::validate_config_key(key)?;
        match fs::read(self.dir.join(key)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("config {key:?}")))
            }
            Err(e) => Err(Error::StorageWrite(e.into())),
        }
    }

    /// Stored configs, ordered by key. Temp files and names that fail
    /// validation are skipped.
    pub fn list(&self) -> Result<Vec<ConfigEntry>> {
        let mut entries = Vec::new();
        let read_dir = fs::read_dir(&self.dir).map_err(|e| Error::StorageWrite(e.into()))?;
        for dir_entry in read_dir {
            let path = dir_entry.map_err(|e| Error::StorageWrite(e.into()))?.path();
            let Some(key) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if ident::validate_config_key(key).is_err() || !path.is_file() {
                continue;
            }
            entries.push(entry_for(key, &path).map_err(|e| Error::StorageWrite(e.into()))?);
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

fn entry_for(key: &str, path: &Path) -> io::Result<ConfigEntry> {
    let meta = fs::metadata(path)?;
    Ok(ConfigEntry {
        key: key.to_string(),
        size_bytes: meta.len(),
        modified_at: meta.modified()?.into(),
    })
}
