//! Incremental indexing engine.
//!
//! One run over one root:
//!
//! ```text
//! list ──▶ diff against stored snapshot ──▶ batches of changed files
//!                                              │  (parallel parse, bounded pool)
//!                                              ▼
//!                                   merge into snapshot + publish batch
//!                                              │
//!                         remove deleted paths ▼
//!                                   persist snapshot (full replace)
//! ```
//!
//! Unchanged files (same path, same `last_modified`) keep their stored
//! record and are never read. Each batch is a synchronization point: its
//! entries are merged and sent to observers before the next batch starts,
//! so a UI can reveal results progressively.
//!
//! ## Failure model
//!
//! - A file that cannot be read is skipped with a warning and a
//!   [`IndexEvent::FileSkipped`]; the batch carries on.
//! - A file that reads but yields no metadata is indexed with an empty
//!   record.
//! - A listing failure aborts that root only.
//! - A snapshot that fails to persist is reported in
//!   [`IndexOutcome::persist_error`]; the in-memory snapshot is still returned.
//!
//! ## Concurrency
//!
//! Roots share nothing mutable except the board registry. Within a root,
//! files of a batch are parsed on the engine's rayon pool, sized by
//! [`EngineConfig::workers`]. Bytes are read only inside the worker that
//! parses them and dropped right after.

use crate::config::{Config, effective_batch_size, effective_workers};
use crate::control::{ControlError, IndexControl, IndexState};
use crate::index::{IndexEntry, RootSnapshot, diff};
use crate::normalize::BoardRegistry;
use crate::parse::parse_image;
use crate::source::{FileStamp, ImageSource, SourceError};
use crate::store::{SnapshotStore, StoreError};
use rayon::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("cannot list {root}: {source}")]
    Listing { root: PathBuf, source: SourceError },
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("cannot build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("indexing thread for {0} panicked")]
    Panicked(PathBuf),
}

/// Tuning of the processing loop.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Parse workers per batch.
    pub workers: usize,
    /// Files per batch.
    pub batch_size: usize,
    /// Pause flag polling interval.
    pub pause_poll: Duration,
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        let workers = effective_workers(&config.processing);
        Self {
            workers,
            batch_size: effective_batch_size(&config.processing, workers),
            pause_poll: Duration::from_millis(config.processing.pause_poll_ms),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A root directory to index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSpec {
    pub path: PathBuf,
    pub recursive: bool,
}

impl RootSpec {
    pub fn new(path: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            path: path.into(),
            recursive,
        }
    }
}

/// One root plus the handle that steers its run.
#[derive(Debug, Clone)]
pub struct RootJob {
    pub root: RootSpec,
    pub control: Arc<IndexControl>,
}

/// Progress and diagnostics, sent while a root is indexed.
#[derive(Debug, Clone)]
pub enum IndexEvent {
    Started {
        root: PathBuf,
        to_process: usize,
        unchanged: usize,
        deleted: usize,
    },
    /// A batch was merged into the snapshot. `processed` counts files
    /// handled so far (parsed or skipped) out of `total`.
    BatchCommitted {
        root: PathBuf,
        entries: Vec<IndexEntry>,
        processed: usize,
        total: usize,
    },
    FileSkipped {
        root: PathBuf,
        relative_path: String,
        error: String,
    },
    Paused {
        root: PathBuf,
    },
    Resumed {
        root: PathBuf,
    },
    /// Terminal: the run ended, normally or by cancellation.
    Completed {
        root: PathBuf,
        stats: IndexStats,
        cancelled: bool,
        persist_error: Option<String>,
    },
    /// Terminal: the run could not start.
    Failed {
        root: PathBuf,
        error: String,
    },
}

/// Per-run counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub unchanged: usize,
    pub parsed: usize,
    pub skipped: usize,
    pub deleted: usize,
    /// Queued files a cancellation kept from starting.
    pub not_started: usize,
}

impl fmt::Display for IndexStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} parsed, {} unchanged, {} removed",
            self.parsed, self.unchanged, self.deleted
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        if self.not_started > 0 {
            write!(f, ", {} not started", self.not_started)?;
        }
        Ok(())
    }
}

/// Result of one run over one root.
#[derive(Debug)]
pub struct IndexOutcome {
    /// The snapshot as of the end of the run, whether or not it persisted.
    pub snapshot: RootSnapshot,
    pub stats: IndexStats,
    /// Cancellation was requested during the run, even if it arrived too late
    /// to keep any file from being parsed.
    pub cancelled: bool,
    pub persist_error: Option<StoreError>,
}

enum FileResult {
    Parsed(IndexEntry),
    Failed {
        relative_path: String,
        error: SourceError,
    },
    NotStarted,
}

/// Drives indexing runs over a source and a snapshot store.
pub struct IndexEngine<S, St> {
    source: S,
    store: St,
    config: EngineConfig,
    boards: Arc<BoardRegistry>,
    pool: rayon::ThreadPool,
}

impl<S: ImageSource, St: SnapshotStore> IndexEngine<S, St> {
    pub fn new(source: S, store: St, config: EngineConfig) -> Result<Self, EngineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(|i| format!("promptvault-parse-{i}"))
            .build()?;
        Ok(Self {
            source,
            store,
            config,
            boards: Arc::new(BoardRegistry::new()),
            pool,
        })
    }

    /// Share a board registry with other engines of the same session.
    pub fn with_boards(mut self, boards: Arc<BoardRegistry>) -> Self {
        self.boards = boards;
        self
    }

    pub fn boards(&self) -> &Arc<BoardRegistry> {
        &self.boards
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &St {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Index one root. Blocks until the run completes, is cancelled, or
    /// fails to list the root.
    pub fn index_root(
        &self,
        root: &RootSpec,
        control: &IndexControl,
        events: Option<&Sender<IndexEvent>>,
    ) -> Result<IndexOutcome, EngineError> {
        control.begin()?;
        match self.run(root, control, events) {
            Ok(outcome) => {
                let end = if outcome.cancelled {
                    IndexState::Idle
                } else {
                    IndexState::Completed
                };
                control.transition(end)?;
                Ok(outcome)
            }
            Err(err) => {
                if control.state() != IndexState::Idle {
                    control.transition(IndexState::Idle)?;
                }
                error!(root = %root.path.display(), error = %err, "indexing failed");
                emit(
                    events,
                    IndexEvent::Failed {
                        root: root.path.clone(),
                        error: err.to_string(),
                    },
                );
                Err(err)
            }
        }
    }

    /// Index several roots at once, one pipeline thread per root. A failure
    /// in one root does not affect the others. Results follow `jobs` order.
    pub fn index_roots(
        &self,
        jobs: &[RootJob],
        events: Option<Sender<IndexEvent>>,
    ) -> Vec<(RootSpec, Result<IndexOutcome, EngineError>)> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = jobs
                .iter()
                .map(|job| {
                    let events = events.clone();
                    scope.spawn(move || self.index_root(&job.root, &job.control, events.as_ref()))
                })
                .collect();
            jobs.iter()
                .zip(handles)
                .map(|(job, handle)| {
                    let result = handle
                        .join()
                        .unwrap_or_else(|_| Err(EngineError::Panicked(job.root.path.clone())));
                    (job.root.clone(), result)
                })
                .collect()
        })
    }

    fn run(
        &self,
        root: &RootSpec,
        control: &IndexControl,
        events: Option<&Sender<IndexEvent>>,
    ) -> Result<IndexOutcome, EngineError> {
        let root_path = root.path.clone();
        let listing = self
            .source
            .list(&root.path, root.recursive)
            .map_err(|source| EngineError::Listing {
                root: root_path.clone(),
                source,
            })?;

        let previous = match self.store.get(&root.path, root.recursive) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(
                    root = %root.path.display(),
                    error = %err,
                    "cannot read snapshot, rescanning root"
                );
                None
            }
        };
        let had_previous = previous.is_some();
        let changes = diff(&listing, previous.as_ref());
        let mut snapshot =
            previous.unwrap_or_else(|| RootSnapshot::new(&root.path, root.recursive));

        let total = changes.to_process.len();
        let mut stats = IndexStats {
            unchanged: changes.unchanged.len(),
            ..IndexStats::default()
        };
        info!(
            root = %root.path.display(),
            to_process = total,
            unchanged = stats.unchanged,
            deleted = changes.deleted_paths.len(),
            "indexing root"
        );
        emit(
            events,
            IndexEvent::Started {
                root: root_path.clone(),
                to_process: total,
                unchanged: stats.unchanged,
                deleted: changes.deleted_paths.len(),
            },
        );

        for batch in changes.to_process.chunks(self.config.batch_size.max(1)) {
            let pausing = control.is_pause_requested();
            if pausing {
                info!(root = %root.path.display(), "paused");
                emit(events, IndexEvent::Paused { root: root_path.clone() });
            }
            if !control.wait_while_paused(self.config.pause_poll)? {
                break;
            }
            if pausing {
                info!(root = %root.path.display(), "resumed");
                emit(events, IndexEvent::Resumed { root: root_path.clone() });
            }

            let mut committed = Vec::with_capacity(batch.len());
            for result in self.parse_batch(&root.path, batch, control) {
                match result {
                    FileResult::Parsed(entry) => committed.push(entry),
                    FileResult::Failed {
                        relative_path,
                        error,
                    } => {
                        warn!(path = %relative_path, error = %error, "skipping unreadable file");
                        stats.skipped += 1;
                        emit(
                            events,
                            IndexEvent::FileSkipped {
                                root: root_path.clone(),
                                relative_path,
                                error: error.to_string(),
                            },
                        );
                    }
                    FileResult::NotStarted => {}
                }
            }

            stats.parsed += committed.len();
            for entry in &committed {
                snapshot.upsert(entry.clone());
            }
            let processed = stats.parsed + stats.skipped;
            debug!(root = %root.path.display(), processed, total, "batch committed");
            emit(
                events,
                IndexEvent::BatchCommitted {
                    root: root_path.clone(),
                    entries: committed,
                    processed,
                    total,
                },
            );

            if control.is_cancelled() {
                break;
            }
        }

        stats.not_started = total - stats.parsed - stats.skipped;
        let cancelled = control.is_cancelled();
        stats.deleted = snapshot.remove_paths(&changes.deleted_paths);

        let persist_error = if had_previous && changes.is_noop() {
            None
        } else {
            match self.store.replace(&snapshot) {
                Ok(()) => None,
                Err(err) => {
                    error!(root = %root.path.display(), error = %err, "snapshot not persisted");
                    Some(err)
                }
            }
        };

        if cancelled {
            info!(root = %root.path.display(), %stats, "indexing cancelled");
        } else {
            info!(root = %root.path.display(), %stats, "indexing complete");
        }
        emit(
            events,
            IndexEvent::Completed {
                root: root_path,
                stats: stats.clone(),
                cancelled,
                persist_error: persist_error.as_ref().map(ToString::to_string),
            },
        );

        Ok(IndexOutcome {
            snapshot,
            stats,
            cancelled,
            persist_error,
        })
    }

    /// Parse one batch on the worker pool. Results keep batch order.
    fn parse_batch(
        &self,
        root: &Path,
        batch: &[FileStamp],
        control: &IndexControl,
    ) -> Vec<FileResult> {
        self.pool.install(|| {
            batch
                .par_iter()
                .map(|stamp| {
                    if control.is_cancelled() {
                        return FileResult::NotStarted;
                    }
                    match self.source.read_bytes(root, &stamp.relative_path) {
                        Ok(bytes) => FileResult::Parsed(IndexEntry::new(
                            stamp.relative_path.clone(),
                            stamp.last_modified,
                            parse_image(&bytes, &self.boards),
                        )),
                        Err(error) => FileResult::Failed {
                            relative_path: stamp.relative_path.clone(),
                            error,
                        },
                    }
                })
                .collect()
        })
    }
}

/// Send to an observer, if any. A hung-up observer is not an error.
fn emit(events: Option<&Sender<IndexEvent>>, event: IndexEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySnapshotStore;
    use crate::test_helpers::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Instant;

    const ROOT: &str = "/gallery";

    fn config(workers: usize, batch_size: usize) -> EngineConfig {
        EngineConfig {
            workers,
            batch_size,
            pause_poll: Duration::from_millis(2),
        }
    }

    fn png(steps: u32) -> Vec<u8> {
        a1111_png(&format!("image {steps}\nNegative prompt: blurry\nSteps: {steps}"))
    }

    fn source_with(files: &[(&str, i64)]) -> MemorySource {
        let source = MemorySource::new();
        for (i, (rel, modified)) in files.iter().enumerate() {
            source.set_file(ROOT, rel, *modified, png(i as u32 + 1));
        }
        source
    }

    fn root() -> RootSpec {
        RootSpec::new(ROOT, true)
    }

    fn paths(snapshot: &RootSnapshot) -> Vec<String> {
        let mut paths: Vec<String> = snapshot
            .entries()
            .iter()
            .map(|e| e.relative_path.clone())
            .collect();
        paths.sort();
        paths
    }

    fn collect(rx: mpsc::Receiver<IndexEvent>) -> Vec<IndexEvent> {
        rx.into_iter().collect()
    }

    // =========================================================================
    // Full and incremental runs
    // =========================================================================

    #[test]
    fn first_run_indexes_and_persists_everything() {
        let engine = IndexEngine::new(
            source_with(&[("a.png", 1), ("b.png", 2), ("sub/c.png", 3)]),
            MemorySnapshotStore::new(),
            config(2, 2),
        )
        .unwrap();
        let control = IndexControl::new();
        let outcome = engine.index_root(&root(), &control, None).unwrap();

        assert_eq!(outcome.stats.parsed, 3);
        assert!(!outcome.cancelled);
        assert!(outcome.persist_error.is_none());
        assert_eq!(control.state(), IndexState::Completed);
        assert_eq!(outcome.snapshot.get("b.png").unwrap().metadata.steps, Some(2));

        let stored = engine.store().get(Path::new(ROOT), true).unwrap().unwrap();
        assert_eq!(stored, outcome.snapshot);
    }

    #[test]
    fn second_run_reparses_only_changes() {
        let engine = IndexEngine::new(
            source_with(&[("a.png", 1), ("b.png", 2), ("d.png", 4)]),
            MemorySnapshotStore::new(),
            config(2, 8),
        )
        .unwrap();
        let control = IndexControl::new();
        engine.index_root(&root(), &control, None).unwrap();

        engine.source().remove_file(ROOT, "a.png");
        engine.source().set_file(ROOT, "b.png", 20, png(20));
        engine.source().set_file(ROOT, "c.png", 3, png(3));
        engine.source().clear_reads();

        let outcome = engine.index_root(&root(), &control, None).unwrap();
        let mut reads = engine.source().reads();
        reads.sort();
        assert_eq!(reads, vec!["b.png", "c.png"]);
        assert_eq!(
            outcome.stats,
            IndexStats {
                unchanged: 1,
                parsed: 2,
                skipped: 0,
                deleted: 1,
                not_started: 0
            }
        );
        assert_eq!(paths(&outcome.snapshot), vec!["b.png", "c.png", "d.png"]);
        assert_eq!(outcome.snapshot.get("b.png").unwrap().metadata.steps, Some(20));
    }

    #[test]
    fn unchanged_root_reads_nothing() {
        let engine = IndexEngine::new(
            source_with(&[("a.png", 1)]),
            MemorySnapshotStore::new(),
            config(1, 4),
        )
        .unwrap();
        let control = IndexControl::new();
        engine.index_root(&root(), &control, None).unwrap();
        engine.source().clear_reads();

        let outcome = engine.index_root(&root(), &control, None).unwrap();
        assert!(engine.source().reads().is_empty());
        assert_eq!(outcome.stats.unchanged, 1);
        assert_eq!(outcome.snapshot.len(), 1);
    }

    #[test]
    fn non_image_is_indexed_with_empty_record() {
        let source = MemorySource::new().with_file(ROOT, "notes.png", 1, b"not an image".to_vec());
        let engine = IndexEngine::new(source, MemorySnapshotStore::new(), config(1, 4)).unwrap();
        let outcome = engine.index_root(&root(), &IndexControl::new(), None).unwrap();
        let entry = outcome.snapshot.get("notes.png").unwrap();
        assert!(entry.metadata.is_empty());
        assert_eq!(entry.metadata.board, "Uncategorized");
    }

    // =========================================================================
    // Failures
    // =========================================================================

    #[test]
    fn unreadable_file_is_skipped() {
        let source = source_with(&[("a.png", 1), ("b.png", 2), ("c.png", 3)]);
        source.mark_unreadable("b.png");
        let engine = IndexEngine::new(source, MemorySnapshotStore::new(), config(2, 8)).unwrap();
        let (tx, rx) = mpsc::channel();
        let outcome = engine.index_root(&root(), &IndexControl::new(), Some(&tx)).unwrap();
        drop(tx);

        assert_eq!(outcome.stats.skipped, 1);
        assert_eq!(outcome.stats.not_started, 0);
        assert!(!outcome.cancelled);
        assert_eq!(paths(&outcome.snapshot), vec!["a.png", "c.png"]);
        let skipped: Vec<String> = collect(rx)
            .into_iter()
            .filter_map(|e| match e {
                IndexEvent::FileSkipped { relative_path, .. } => Some(relative_path),
                _ => None,
            })
            .collect();
        assert_eq!(skipped, vec!["b.png"]);
    }

    #[test]
    fn listing_failure_is_reported_and_resets_state() {
        let source = MemorySource::new();
        source.fail_listing(ROOT);
        let engine = IndexEngine::new(source, MemorySnapshotStore::new(), config(1, 4)).unwrap();
        let control = IndexControl::new();
        let (tx, rx) = mpsc::channel();
        let result = engine.index_root(&root(), &control, Some(&tx));
        drop(tx);

        assert!(matches!(result, Err(EngineError::Listing { .. })));
        assert_eq!(control.state(), IndexState::Idle);
        assert!(matches!(collect(rx).last(), Some(IndexEvent::Failed { .. })));
    }

    struct ReadOnlyStore;

    impl SnapshotStore for ReadOnlyStore {
        fn get(&self, _: &Path, _: bool) -> Result<Option<RootSnapshot>, StoreError> {
            Ok(None)
        }

        fn replace(&self, _: &RootSnapshot) -> Result<(), StoreError> {
            Err(StoreError::Io {
                path: PathBuf::from("/readonly"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }
    }

    #[test]
    fn persist_failure_keeps_in_memory_snapshot() {
        let engine =
            IndexEngine::new(source_with(&[("a.png", 1)]), ReadOnlyStore, config(1, 4)).unwrap();
        let (tx, rx) = mpsc::channel();
        let outcome = engine.index_root(&root(), &IndexControl::new(), Some(&tx)).unwrap();
        drop(tx);

        assert!(outcome.persist_error.is_some());
        assert_eq!(outcome.snapshot.len(), 1);
        let terminal = collect(rx).pop();
        assert!(matches!(
            terminal,
            Some(IndexEvent::Completed { persist_error: Some(_), cancelled: false, .. })
        ));
    }

    #[test]
    fn one_failing_root_does_not_affect_another() {
        let source = source_with(&[("a.png", 1)]);
        source.fail_listing("/broken");
        let engine = IndexEngine::new(source, MemorySnapshotStore::new(), config(2, 4)).unwrap();
        let jobs = vec![
            RootJob {
                root: RootSpec::new("/broken", true),
                control: Arc::new(IndexControl::new()),
            },
            RootJob {
                root: root(),
                control: Arc::new(IndexControl::new()),
            },
        ];
        let results = engine.index_roots(&jobs, None);
        assert!(results[0].1.is_err());
        assert_eq!(results[1].1.as_ref().unwrap().snapshot.len(), 1);
    }

    // =========================================================================
    // Batching, pause and cancel
    // =========================================================================

    #[test]
    fn batches_are_published_progressively() {
        let files: Vec<(String, i64)> = (0..5).map(|i| (format!("{i}.png"), i)).collect();
        let refs: Vec<(&str, i64)> = files.iter().map(|(p, t)| (p.as_str(), *t)).collect();
        let engine =
            IndexEngine::new(source_with(&refs), MemorySnapshotStore::new(), config(2, 2)).unwrap();
        let (tx, rx) = mpsc::channel();
        engine.index_root(&root(), &IndexControl::new(), Some(&tx)).unwrap();
        drop(tx);

        let progress: Vec<(usize, usize, usize)> = collect(rx)
            .into_iter()
            .filter_map(|e| match e {
                IndexEvent::BatchCommitted {
                    entries,
                    processed,
                    total,
                    ..
                } => Some((entries.len(), processed, total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(2, 2, 5), (2, 4, 5), (1, 5, 5)]);
    }

    /// Requests cancellation when the `after`-th file is read.
    struct CancelAfter<'a> {
        inner: MemorySource,
        control: &'a IndexControl,
        after: usize,
        reads: AtomicUsize,
    }

    impl ImageSource for CancelAfter<'_> {
        fn list(&self, root: &Path, recursive: bool) -> Result<Vec<FileStamp>, SourceError> {
            self.inner.list(root, recursive)
        }

        fn read_bytes(&self, root: &Path, relative_path: &str) -> Result<Vec<u8>, SourceError> {
            if self.reads.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
                self.control.cancel();
            }
            self.inner.read_bytes(root, relative_path)
        }
    }

    #[test]
    fn cancel_during_final_batch_is_still_a_cancel() {
        let control = IndexControl::new();
        let source = CancelAfter {
            inner: source_with(&[("1.png", 1), ("2.png", 2), ("3.png", 3)]),
            control: &control,
            after: 3,
            reads: AtomicUsize::new(0),
        };
        let engine = IndexEngine::new(source, MemorySnapshotStore::new(), config(1, 1)).unwrap();

        let outcome = engine.index_root(&root(), &control, None).unwrap();
        assert!(outcome.cancelled);
        assert_eq!(outcome.stats.parsed, 3);
        assert_eq!(outcome.stats.not_started, 0);
        assert_eq!(control.state(), IndexState::Idle);
        let stored = engine.store().get(Path::new(ROOT), true).unwrap().unwrap();
        assert_eq!(paths(&stored), vec!["1.png", "2.png", "3.png"]);
    }

    #[test]
    fn cancel_keeps_merged_batches_and_resume_finishes() {
        let control = IndexControl::new();
        let source = CancelAfter {
            inner: source_with(&[
                ("1.png", 1),
                ("2.png", 2),
                ("3.png", 3),
                ("4.png", 4),
                ("5.png", 5),
            ]),
            control: &control,
            after: 2,
            reads: AtomicUsize::new(0),
        };
        let engine = IndexEngine::new(source, MemorySnapshotStore::new(), config(1, 1)).unwrap();

        let first = engine.index_root(&root(), &control, None).unwrap();
        assert!(first.cancelled);
        assert_eq!(first.stats.parsed, 2);
        assert_eq!(first.stats.not_started, 3);
        assert_eq!(control.state(), IndexState::Idle);
        let stored = engine.store().get(Path::new(ROOT), true).unwrap().unwrap();
        assert_eq!(paths(&stored), vec!["1.png", "2.png"]);

        engine.source().inner.clear_reads();
        let second = engine.index_root(&root(), &control, None).unwrap();
        assert!(!second.cancelled);
        assert_eq!(second.stats.unchanged, 2);
        assert_eq!(second.stats.parsed, 3);
        let mut reads = engine.source().inner.reads();
        reads.sort();
        assert_eq!(reads, vec!["3.png", "4.png", "5.png"]);
        assert_eq!(
            paths(&second.snapshot),
            vec!["1.png", "2.png", "3.png", "4.png", "5.png"]
        );
    }

    #[test]
    fn pause_holds_batches_until_resume() {
        let engine = IndexEngine::new(
            source_with(&[("a.png", 1), ("b.png", 2)]),
            MemorySnapshotStore::new(),
            config(1, 1),
        )
        .unwrap();
        let control = IndexControl::new();
        control.pause();

        let outcome = std::thread::scope(|scope| {
            let run = scope.spawn(|| engine.index_root(&root(), &control, None));

            let deadline = Instant::now() + Duration::from_secs(5);
            while control.state() != IndexState::Paused {
                assert!(Instant::now() < deadline, "run never paused");
                std::thread::sleep(Duration::from_millis(2));
            }
            assert!(engine.source().reads().is_empty());
            control.resume();
            run.join().unwrap()
        })
        .unwrap();

        assert_eq!(outcome.stats.parsed, 2);
        assert_eq!(control.state(), IndexState::Completed);
    }

    // =========================================================================
    // Boards
    // =========================================================================

    #[test]
    fn opaque_board_label_is_stable_across_files() {
        let meta = r#"{"board_id": "5b0c7e4a-93f1-4d2e-b8a6-0f1e2d3c4b5a", "steps": 4}"#;
        let bytes = png_with_chunks(&[text_chunk("invokeai_metadata", meta)]);
        let source = MemorySource::new()
            .with_file(ROOT, "a.png", 1, bytes.clone())
            .with_file(ROOT, "b.png", 1, bytes);
        let engine = IndexEngine::new(source, MemorySnapshotStore::new(), config(2, 1)).unwrap();
        let outcome = engine.index_root(&root(), &IndexControl::new(), None).unwrap();

        let a = &outcome.snapshot.get("a.png").unwrap().metadata.board;
        let b = &outcome.snapshot.get("b.png").unwrap().metadata.board;
        assert_eq!(a, "My Board 1");
        assert_eq!(a, b);
        assert_eq!(engine.boards().len(), 1);
    }

    #[test]
    fn stats_display() {
        let stats = IndexStats {
            unchanged: 10,
            parsed: 3,
            skipped: 1,
            deleted: 2,
            not_started: 0,
        };
        assert_eq!(stats.to_string(), "3 parsed, 10 unchanged, 2 removed, 1 skipped");
    }
}
