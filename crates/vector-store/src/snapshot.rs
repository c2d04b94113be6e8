//! JSON snapshot file backing a [`crate::VectorStore`].
//!
//! The snapshot is the only state shared between processes. Writers replace
//! the whole file (temp file + rename, under an advisory lock on a sibling
//! `.lock` file); readers detect changes by comparing [`SnapshotStamp`]s.
//! Two processes writing concurrently still race: the last full overwrite
//! wins and the other writer's records are lost.

use crate::error::{Result, VectorStoreError};
use crate::types::VectorRecord;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Identity of one version of the snapshot file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotStamp {
    pub modified: SystemTime,
    pub len: u64,
}

impl SnapshotStamp {
    /// A file is considered newer when its modification time advanced, or
    /// when the time is unchanged but the size differs (coarse mtime clocks).
    ///
    /// Detection is best-effort: a rewrite that keeps both the modification
    /// time and the length (same-size edit within one mtime tick) is not
    /// seen as newer.
    #[must_use]
    pub fn is_newer_than(&self, loaded: &SnapshotStamp) -> bool {
        self.modified > loaded.modified
            || (self.modified == loaded.modified && self.len != loaded.len)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotOut<'a> {
    schema_version: u32,
    records: &'a [VectorRecord],
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionedSnapshot {
    schema_version: u32,
    records: Vec<VectorRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotIn {
    Versioned(VersionedSnapshot),
    /// Bare array written before the schema version existed.
    Legacy(Vec<VectorRecord>),
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    path: PathBuf,
}

struct SnapshotWriteLock {
    file: File,
}

impl Drop for SnapshotWriteLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| OsString::from("snapshot"));
    name.push(suffix);
    path.with_file_name(name)
}

impl Snapshot {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        sibling(&self.path, ".lock")
    }

    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Current stamp of the file, `None` when it does not exist.
    pub fn stamp(&self) -> Result<Option<SnapshotStamp>> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(Some(SnapshotStamp {
                modified: meta.modified()?,
                len: meta.len(),
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Reads and parses the snapshot, filling in missing term-frequency
    /// caches.
    pub fn read(&self) -> Result<Vec<VectorRecord>> {
        let bytes = fs::read(&self.path)?;
        let mut records = match serde_json::from_slice::<SnapshotIn>(&bytes)? {
            SnapshotIn::Versioned(snapshot) => {
                if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
                    return Err(VectorStoreError::UnsupportedSchema {
                        path: self.path.clone(),
                        found: snapshot.schema_version,
                        expected: SNAPSHOT_SCHEMA_VERSION,
                    });
                }
                snapshot.records
            }
            SnapshotIn::Legacy(records) => {
                log::debug!("Snapshot {:?} uses the legacy array layout", self.path);
                records
            }
        };
        for record in &mut records {
            record.ensure_term_frequency();
        }
        Ok(records)
    }

    /// Replaces the snapshot with `records` and returns the stamp of the
    /// freshly written file.
    pub fn write(&self, records: &[VectorRecord]) -> Result<SnapshotStamp> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let _lock = self.acquire_write_lock()?;

        let bytes = serde_json::to_vec(&SnapshotOut {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            records,
        })?;
        let tmp = sibling(&self.path, ".tmp");
        fs::write(&tmp, bytes)?;
        if let Err(err) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }

        self.stamp()?.ok_or_else(|| {
            VectorStoreError::Other(format!(
                "snapshot {} vanished right after being written",
                self.path.display()
            ))
        })
    }

    fn acquire_write_lock(&self) -> Result<SnapshotWriteLock> {
        let path = self.lock_path();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| VectorStoreError::LockError {
                path: path.clone(),
                message: format!("open: {err}"),
            })?;
        file.lock_exclusive()
            .map_err(|err| VectorStoreError::LockError {
                path: path.clone(),
                message: format!("acquire: {err}"),
            })?;
        Ok(SnapshotWriteLock { file })
    }
}
