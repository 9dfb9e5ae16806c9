//! Store file I/O: read, fingerprint, locked atomic write

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::record::WalletRecord;
use crate::error::{KeystoreError, Result};

/// SHA-256 of the store file as last seen; `None` when there was no file
pub(crate) type Fingerprint = Option<[u8; 32]>;

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

pub(crate) fn lock_path(path: &Path) -> PathBuf {
    sibling(path, ".lock")
}

pub(crate) fn temp_path(path: &Path) -> PathBuf {
    sibling(path, ".tmp")
}

fn fingerprint(contents: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(contents));
    out
}

fn current_fingerprint(path: &Path) -> Result<Fingerprint> {
    match std::fs::read(path) {
        Ok(contents) => Ok(Some(fingerprint(&contents))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read the store file. A missing or blank file is an empty store.
pub(crate) fn read_records(path: &Path) -> Result<(Vec<WalletRecord>, Fingerprint)> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No store file at {:?}, starting empty", path);
            return Ok((Vec::new(), None));
        }
        Err(e) => return Err(e.into()),
    };
    let seen = Some(fingerprint(contents.as_bytes()));

    if contents.trim().is_empty() {
        return Ok((Vec::new(), seen));
    }

    let records: Vec<WalletRecord> = serde_json::from_str(&contents)
        .map_err(|e| KeystoreError::parse(format!("{}: {}", path.display(), e)))?;

    debug!("Loaded {} wallet(s) from {:?}", records.len(), path);
    Ok((records, seen))
}

fn open_private(path: &Path, truncate: bool) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(truncate);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}

fn acquire_lock(path: &Path) -> Result<File> {
    let lock_file = open_private(&lock_path(path), false)?;
    match lock_file.try_lock_exclusive() {
        Ok(()) => Ok(lock_file),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(KeystoreError::Busy(
            format!("{} is being written by another process", path.display()),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Write `records` to `path` if the file still matches `expected`.
///
/// Holds an exclusive lock on `<path>.lock` for the duration, writes
/// `<path>.tmp` and renames it over the store file. Returns the fingerprint
/// of what was written.
pub(crate) fn write_records<R: Serialize>(
    path: &Path,
    records: &[R],
    expected: &Fingerprint,
) -> Result<Fingerprint> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    let lock = acquire_lock(path)?;

    if current_fingerprint(path)? != *expected {
        return Err(KeystoreError::Conflict(format!("{}", path.display())));
    }

    let contents = serde_json::to_string_pretty(records)
        .map_err(|e| KeystoreError::parse(e.to_string()))?;

    let temp = temp_path(path);
    let written = (|| -> Result<()> {
        let mut file = open_private(&temp, true)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&temp, path)?;
        Ok(())
    })();
    if written.is_err() {
        let _ = std::fs::remove_file(&temp);
    }
    written?;

    FileExt::unlock(&lock)?;

    let seen = fingerprint(contents.as_bytes());
    debug!(
        "Saved {} wallet(s) to {:?} ({})",
        records.len(),
        path,
        hex::encode(&seen[..8])
    );
    Ok(Some(seen))
}
