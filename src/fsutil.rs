//! Crash-safe file primitives
//!
//! Every replace in the storage tree goes through write-to-temp-then-rename.
//! Temp files live next to their destination (same filesystem, so `rename`
//! is atomic) and carry the `.tmp.` prefix so reconciliation can find the
//! ones a crash left behind.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};

/// Prefix shared by every temp file the coordinator creates.
pub const TEMP_PREFIX: &str = ".tmp.";

/// Generate a unique temp file name.
pub fn temp_file_name() -> String {
    format!("{}{}.{}", TEMP_PREFIX, std::process::id(), uuid::Uuid::new_v4().simple())
}

/// Temp path in the same directory as `path`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    dir.join(temp_file_name())
}

/// Flush directory metadata so a completed rename survives power loss.
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Atomically replace `path` with `bytes`.
///
/// Readers observe either the previous file or the complete new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let temp_path = temp_path_for(path);
    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Stream `reader` into a new file at `dest`, returning (bytes, sha256 hex).
///
/// The destination is expected to be a temp path; the caller renames it into
/// place once the write has been verified.
pub fn write_hashed<R: Read>(dest: &Path, mut reader: R) -> io::Result<(u64, String)> {
    let mut file = File::create(dest)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        file.write_all(&buffer[..n])?;
        total += n as u64;
    }

    file.sync_all()?;
    Ok((total, hex::encode(hasher.finalize())))
}

/// Hash an existing file.
pub fn hash_file(path: &Path) -> io::Result<(u64, String)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
        total += n as u64;
    }

    Ok((total, hex::encode(hasher.finalize())))
}

/// Remove temp files older than `threshold` from `dir`. Returns the count.
pub fn cleanup_orphaned_temps(dir: &Path, threshold: Duration) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut cleaned = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(TEMP_PREFIX))
            .unwrap_or(false);
        if !is_temp {
            continue;
        }

        let age = fs::metadata(&path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok());
        if let Some(age) = age {
            if age >= threshold && fs::remove_file(&path).is_ok() {
                tracing::debug!(path = %path.display(), "removed orphaned temp file");
                cleaned += 1;
            }
        }
    }

    Ok(cleaned)
}
