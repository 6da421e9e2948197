//! On-disk layout and atomic directory replacement
//!
//! A persisted filter is a directory holding `meta.json` (parameters) and
//! `bloom.npy` (the raw cell buffer). A scaling filter adds a `blooms/`
//! subdirectory with one such directory per sub-filter, named by id.
//!
//! Saves are atomic at the directory level: everything is written into a
//! `<path>-tmp` sibling, fsynced, and renamed over the previous directory.
//! A crash mid-save leaves either the old committed state or a stray `-tmp`
//! directory, never a torn mixture.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::Result;

pub(crate) const META_FILENAME: &str = "meta.json";
pub(crate) const BLOOM_FILENAME: &str = "bloom.npy";
pub(crate) const BLOOMS_DIRNAME: &str = "blooms";

/// The `<path>-tmp` sibling used for staged writes
pub(crate) fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push("-tmp");
    path.with_file_name(name)
}

/// Removes a file or directory tree; missing paths are not an error
pub(crate) fn remove_recursive(path: &Path) -> io::Result<()> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Writes `bytes` to a new file and fsyncs it
pub(crate) fn write_file_sync(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Serializes `value` as JSON into `path` and fsyncs it
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_file_sync(path, &json)?;
    Ok(())
}

/// Reads and parses a JSON file
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Atomically replaces `dst` with the fully-written `tmp` directory
///
/// Any previous `dst` is removed first; the rename is then the commit point.
/// The parent directory is fsynced so the rename survives a crash.
pub(crate) fn commit_dir(tmp: &Path, dst: &Path) -> io::Result<()> {
    remove_recursive(dst)?;
    fs::rename(tmp, dst)?;
    if let Some(parent) = dst.parent() {
        fsync_dir(parent);
    }
    Ok(())
}

/// Best-effort fsync of a directory entry
pub(crate) fn fsync_dir(path: &Path) {
    if let Ok(dir) = File::open(path) {
        let _ = dir.sync_all();
    }
}
