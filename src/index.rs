//! Per-root index snapshots and the listing diff.
//!
//! A [`RootSnapshot`] holds one [`IndexEntry`] per parsed file of a root,
//! keyed by relative path. It is the unit of persistence and of diffing:
//! [`diff`] compares a fresh listing against the previous snapshot using
//! `last_modified` equality as the only change signal.
//!
//! ```text
//! previous {A@t1, B@t2}   current {A@t1, B@t3, C@t4}
//!   → unchanged {A}   to_process {B, C}   deleted {}
//! ```

use crate::normalize::{NormalizedRecord, OrderedSet};
use crate::source::FileStamp;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// One indexed file.
///
/// `prompt`, `models`, `loras`, `scheduler` and `dimensions` duplicate parts
/// of `metadata` so filters never re-walk the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub relative_path: String,
    pub last_modified: i64,
    pub metadata: NormalizedRecord,
    pub prompt: String,
    pub models: OrderedSet,
    pub loras: OrderedSet,
    pub scheduler: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<String>,
}

impl IndexEntry {
    pub fn new(
        relative_path: impl Into<String>,
        last_modified: i64,
        metadata: NormalizedRecord,
    ) -> Self {
        Self {
            relative_path: relative_path.into(),
            last_modified,
            prompt: metadata.prompt.clone(),
            models: metadata.models.clone(),
            loras: metadata.loras.clone(),
            scheduler: metadata.scheduler.clone(),
            dimensions: metadata.dimensions(),
            metadata,
        }
    }
}

/// Everything indexed under one root.
///
/// Entries keep first-insertion order; `relative_path` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "SnapshotRepr")]
pub struct RootSnapshot {
    pub root_path: PathBuf,
    pub root_name: String,
    pub recursive: bool,
    entries: Vec<IndexEntry>,
    /// relative_path → position in `entries`. Rebuilt on load.
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRepr {
    root_path: PathBuf,
    #[serde(default)]
    root_name: String,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    entries: Vec<IndexEntry>,
}

impl From<SnapshotRepr> for RootSnapshot {
    fn from(repr: SnapshotRepr) -> Self {
        let mut snapshot = RootSnapshot::new(&repr.root_path, repr.recursive);
        if !repr.root_name.is_empty() {
            snapshot.root_name = repr.root_name;
        }
        // A hand-edited file may repeat a path; the first copy is kept.
        for entry in repr.entries {
            if !snapshot.positions.contains_key(&entry.relative_path) {
                snapshot.upsert(entry);
            }
        }
        snapshot
    }
}

impl RootSnapshot {
    pub fn new(root_path: &Path, recursive: bool) -> Self {
        let root_name = root_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root_path.display().to_string());
        Self {
            root_path: root_path.to_path_buf(),
            root_name,
            recursive,
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn get(&self, relative_path: &str) -> Option<&IndexEntry> {
        self.positions.get(relative_path).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a new entry or replace the one at the same path wholesale.
    pub fn upsert(&mut self, entry: IndexEntry) {
        match self.positions.get(&entry.relative_path) {
            Some(&i) => self.entries[i] = entry,
            None => {
                self.positions
                    .insert(entry.relative_path.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Drop entries by path. Returns how many were removed.
    pub fn remove_paths(&mut self, paths: &[String]) -> usize {
        let doomed: HashSet<&str> = paths.iter().map(String::as_str).collect();
        let before = self.entries.len();
        self.entries
            .retain(|e| !doomed.contains(e.relative_path.as_str()));
        let removed = before - self.entries.len();
        if removed > 0 {
            self.rebuild_positions();
        }
        removed
    }

    fn rebuild_positions(&mut self) {
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.relative_path.clone(), i))
            .collect();
    }
}

/// Classification of a listing against the previous snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    /// Same path, same timestamp: the stored record is reused.
    pub unchanged: Vec<String>,
    /// New files and files whose timestamp changed, in listing order.
    pub to_process: Vec<FileStamp>,
    /// In the snapshot but no longer listed, in snapshot order.
    pub deleted_paths: Vec<String>,
}

impl Diff {
    pub fn is_noop(&self) -> bool {
        self.to_process.is_empty() && self.deleted_paths.is_empty()
    }
}

pub fn diff(current: &[FileStamp], previous: Option<&RootSnapshot>) -> Diff {
    let mut result = Diff::default();
    let mut listed: HashSet<&str> = HashSet::with_capacity(current.len());

    for stamp in current {
        if !listed.insert(stamp.relative_path.as_str()) {
            continue;
        }
        match previous.and_then(|p| p.get(&stamp.relative_path)) {
            Some(entry) if entry.last_modified == stamp.last_modified => {
                result.unchanged.push(stamp.relative_path.clone());
            }
            _ => result.to_process.push(stamp.clone()),
        }
    }

    if let Some(previous) = previous {
        result.deleted_paths = previous
            .entries()
            .iter()
            .filter(|e| !listed.contains(e.relative_path.as_str()))
            .map(|e| e.relative_path.clone())
            .collect();
    }

    result
}
