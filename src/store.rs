//! Persisted snapshot store.
//!
//! One [`RootSnapshot`] per `(root_path, recursive)` key, replaced wholesale
//! on every commit. No partial or delta writes.
//!
//! # On disk
//!
//! [`JsonSnapshotStore`] writes one JSON file per key into its directory:
//!
//! ```text
//! <store_dir>/3f9a0c5e1b7d2a44.json    {"version": 1, "snapshot": {...}}
//! ```
//!
//! The file name is a SHA-256 of the key, so arbitrary root paths map to
//! safe names. Writes go to a temp file that is renamed over the target,
//! so a crash mid-write leaves the previous snapshot intact.
//!
//! A file that cannot be parsed, or carries another format version, reads as
//! "no snapshot": the root is rescanned from scratch instead of failing.

use crate::index::RootSnapshot;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

/// Bump to invalidate every stored snapshot when the format changes.
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("snapshot store IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("snapshot serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Get and full-replace of per-root snapshots.
pub trait SnapshotStore: Sync {
    /// The last committed snapshot for this key, if any.
    fn get(&self, root_path: &Path, recursive: bool) -> Result<Option<RootSnapshot>, StoreError>;

    /// Replace the stored snapshot for `snapshot`'s key.
    fn replace(&self, snapshot: &RootSnapshot) -> Result<(), StoreError>;
}

#[derive(Deserialize)]
struct SnapshotFile {
    version: u32,
    snapshot: RootSnapshot,
}

#[derive(Serialize)]
struct SnapshotFileRef<'a> {
    version: u32,
    snapshot: &'a RootSnapshot,
}

/// JSON files in a directory, one per key.
#[derive(Debug, Clone)]
pub struct JsonSnapshotStore {
    dir: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the snapshot for this key.
    pub fn path_for(&self, root_path: &Path, recursive: bool) -> PathBuf {
        self.dir.join(format!("{}.json", snapshot_key(root_path, recursive)))
    }
}

/// First 16 hex chars of SHA-256 over the root path and the recursive flag.
fn snapshot_key(root_path: &Path, recursive: bool) -> String {
    let mut hasher = Sha256::new();
    hasher.update(root_path.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update([u8::from(recursive)]);
    let hex = format!("{:x}", hasher.finalize());
    hex[..16].to_string()
}

impl SnapshotStore for JsonSnapshotStore {
    fn get(&self, root_path: &Path, recursive: bool) -> Result<Option<RootSnapshot>, StoreError> {
        let path = self.path_for(root_path, recursive);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        let file: SnapshotFile = match serde_json::from_str(&content) {
            Ok(f) => f,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupt snapshot, rescanning root");
                return Ok(None);
            }
        };
        if file.version != SNAPSHOT_VERSION {
            warn!(
                path = %path.display(),
                version = file.version,
                "snapshot format changed, rescanning root"
            );
            return Ok(None);
        }
        if file.snapshot.root_path != root_path || file.snapshot.recursive != recursive {
            warn!(path = %path.display(), "snapshot belongs to another root, ignoring");
            return Ok(None);
        }
        Ok(Some(file.snapshot))
    }

    fn replace(&self, snapshot: &RootSnapshot) -> Result<(), StoreError> {
        let path = self.path_for(&snapshot.root_path, snapshot.recursive);
        let json = serde_json::to_string_pretty(&SnapshotFileRef {
            version: SNAPSHOT_VERSION,
            snapshot,
        })?;
        write_atomic(&path, json.as_bytes())?;
        debug!(path = %path.display(), entries = snapshot.len(), "snapshot committed");
        Ok(())
    }
}

/// Write to `<path>.<pid>.tmp`, sync, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| StoreError::Io { path, source }
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let temp = path.with_extension(format!("json.{}.tmp", std::process::id()));
    {
        let mut file = std::fs::File::create(&temp).map_err(io_err(&temp))?;
        file.write_all(bytes).map_err(io_err(&temp))?;
        file.sync_all().map_err(io_err(&temp))?;
    }
    if let Err(source) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Snapshots kept in memory for the life of the process.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<(PathBuf, bool), RootSnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(PathBuf, bool), RootSnapshot>> {
        self.snapshots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn get(&self, root_path: &Path, recursive: bool) -> Result<Option<RootSnapshot>, StoreError> {
        Ok(self.lock().get(&(root_path.to_path_buf(), recursive)).cloned())
    }

    fn replace(&self, snapshot: &RootSnapshot) -> Result<(), StoreError> {
        self.lock().insert(
            (snapshot.root_path.clone(), snapshot.recursive),
            snapshot.clone(),
        );
        Ok(())
    }
}
