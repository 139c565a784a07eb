//! Where image files come from.
//!
//! The index engine never touches the filesystem directly. It consumes two
//! contracts through [`ImageSource`]:
//!
//! - **Listing**: root + recursive flag → `{relative_path, last_modified}` for
//!   every candidate image, in a stable order.
//! - **Byte read**: root + relative path → the file's raw bytes, resolved only
//!   at the moment a file is parsed so nothing is held open across a scan.
//!
//! [`FsSource`] implements both on top of `walkdir`. Tests use an in-memory
//! source instead.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("cannot list {path}: {source}")]
    Listing {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One listed file: its identity within the root and its change signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStamp {
    /// `/`-separated path relative to the root.
    pub relative_path: String,
    /// Milliseconds since the Unix epoch.
    pub last_modified: i64,
}

impl FileStamp {
    pub fn new(relative_path: impl Into<String>, last_modified: i64) -> Self {
        Self {
            relative_path: relative_path.into(),
            last_modified,
        }
    }
}

/// Directory listing and byte-read contracts consumed by the engine.
///
/// `Sync` so one source can serve every per-root pipeline and every worker
/// of a batch at once.
pub trait ImageSource: Sync {
    /// List candidate image files under `root`.
    fn list(&self, root: &Path, recursive: bool) -> Result<Vec<FileStamp>, SourceError>;

    /// Read one file's bytes.
    fn read_bytes(&self, root: &Path, relative_path: &str) -> Result<Vec<u8>, SourceError>;
}

/// Filesystem-backed source.
#[derive(Debug, Clone)]
pub struct FsSource {
    extensions: Vec<String>,
}

impl FsSource {
    /// Accept files whose extension (case-insensitive) is in `extensions`.
    pub fn new(extensions: &[String]) -> Self {
        Self {
            extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
        }
    }

    fn is_candidate(&self, path: &Path) -> bool {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        self.extensions.contains(&ext)
    }
}

impl ImageSource for FsSource {
    fn list(&self, root: &Path, recursive: bool) -> Result<Vec<FileStamp>, SourceError> {
        let meta = std::fs::metadata(root).map_err(|source| SourceError::Listing {
            path: root.to_path_buf(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(SourceError::NotADirectory(root.to_path_buf()));
        }

        let max_depth = if recursive { usize::MAX } else { 1 };
        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(max_depth)
            .sort_by_file_name()
            .into_iter()
            // Skip hidden files and directories (including our own store dir)
            .filter_entry(|e| !e.file_name().to_string_lossy().starts_with('.'));

        let mut stamps = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    warn!(root = %root.display(), error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !self.is_candidate(entry.path()) {
                continue;
            }
            let Some(relative_path) = relative_path(root, entry.path()) else {
                continue;
            };
            let last_modified = match entry.metadata().map(|m| m.modified()) {
                Ok(Ok(modified)) => millis_since_epoch(modified),
                Ok(Err(err)) => {
                    warn!(path = %relative_path, error = %err, "no modification time");
                    continue;
                }
                Err(err) => {
                    warn!(path = %relative_path, error = %err, "no metadata");
                    continue;
                }
            };
            stamps.push(FileStamp {
                relative_path,
                last_modified,
            });
        }
        Ok(stamps)
    }

    fn read_bytes(&self, root: &Path, relative_path: &str) -> Result<Vec<u8>, SourceError> {
        let path = root.join(relative_path);
        std::fs::read(&path).map_err(|source| SourceError::Read { path, source })
    }
}

/// `/`-joined path of `path` relative to `root`.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn millis_since_epoch(time: std::time::SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn source() -> FsSource {
        FsSource::new(&["png".to_string(), "jpg".to_string(), "jpeg".to_string()])
    }

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn lists_images_sorted_by_name() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "b.png");
        touch(tmp.path(), "a.JPG");
        touch(tmp.path(), "notes.txt");

        let stamps = source().list(tmp.path(), false).unwrap();
        let paths: Vec<&str> = stamps.iter().map(|s| s.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.JPG", "b.png"]);
        assert!(stamps.iter().all(|s| s.last_modified > 0));
    }

    #[test]
    fn non_recursive_ignores_subdirectories() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "top.png");
        touch(tmp.path(), "sub/deep.png");

        let flat = source().list(tmp.path(), false).unwrap();
        assert_eq!(flat.len(), 1);

        let deep = source().list(tmp.path(), true).unwrap();
        let paths: Vec<&str> = deep.iter().map(|s| s.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["sub/deep.png", "top.png"]);
    }

    #[test]
    fn hidden_entries_are_skipped() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), ".hidden.png");
        touch(tmp.path(), ".promptvault/cache.png");
        touch(tmp.path(), "shown.png");

        let stamps = source().list(tmp.path(), true).unwrap();
        assert_eq!(stamps.len(), 1);
        assert_eq!(stamps[0].relative_path, "shown.png");
    }

    #[test]
    fn missing_root_is_a_listing_error() {
        let tmp = TempDir::new().unwrap();
        let result = source().list(&tmp.path().join("nope"), true);
        assert!(matches!(result, Err(SourceError::Listing { .. })));
    }

    #[test]
    fn file_root_is_rejected() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "file.png");
        let result = source().list(&tmp.path().join("file.png"), true);
        assert!(matches!(result, Err(SourceError::NotADirectory(_))));
    }

    #[test]
    fn read_bytes_roundtrip_and_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.png"), b"bytes").unwrap();
        assert_eq!(source().read_bytes(tmp.path(), "a.png").unwrap(), b"bytes");
        assert!(matches!(
            source().read_bytes(tmp.path(), "gone.png"),
            Err(SourceError::Read { .. })
        ));
    }
}
