//! Main reconciliation engine
//!
//! A pass walks the source tree with an explicit worklist of
//! `(source_dir, replica_dir)` pairs. Each popped pair is classified once,
//! its copies and deletes are applied, and its common subdirectories are
//! pushed back onto the worklist. Failures are confined to the pair (or the
//! single entry) they occurred in and streamed to the caller as events.

use crate::classify::EntryClassifier;
use crate::sink::{split_events, EventSink};
use crate::transfer;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, info, info_span, warn, Instrument};
use treemirror_types::{
    AccessOperation, ChangeDecision, CompareMode, EntryKind, Error, OperationRecord, PassStats,
    Result, SubtreeFailure, SyncEvent,
};

/// Options of a reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// How files present on both sides are compared
    pub compare_mode: CompareMode,
    /// Report decisions without touching the replica
    pub dry_run: bool,
}

impl ReconcileOptions {
    /// Options for a pass that only reports what it would do
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }

    /// Set the file comparison policy
    pub fn with_compare_mode(mut self, compare_mode: CompareMode) -> Self {
        self.compare_mode = compare_mode;
        self
    }
}

/// Makes a replica tree match a source tree
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    classifier: EntryClassifier,
    options: ReconcileOptions,
    cancel: CancellationToken,
}

impl Reconciler {
    /// Create a reconciler with default options
    pub fn new() -> Self {
        Self::with_options(ReconcileOptions::default())
    }

    /// Create a reconciler with custom options
    pub fn with_options(options: ReconcileOptions) -> Self {
        Self {
            classifier: EntryClassifier::new(options.compare_mode)
                .tolerate_missing_replica(options.dry_run),
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop passes at the next subtree boundary once `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Options in use
    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Run one pass, streaming every completed operation and every abandoned
    /// subtree to `sink`.
    ///
    /// Returns an error only when the pass could not start (missing source,
    /// bad roots) or was cancelled; subtree failures are reported through the
    /// sink and counted in the returned statistics.
    pub async fn run<S>(&self, source: &Path, replica: &Path, sink: &mut S) -> Result<PassStats>
    where
        S: EventSink + ?Sized,
    {
        let pass_id = uuid::Uuid::new_v4();
        self.run_pass(source, replica, sink)
            .instrument(info_span!("pass", %pass_id))
            .await
    }

    async fn run_pass<S>(&self, source: &Path, replica: &Path, sink: &mut S) -> Result<PassStats>
    where
        S: EventSink + ?Sized,
    {
        let started = Instant::now();
        info!(
            "Starting pass: {} -> {}{}",
            source.display(),
            replica.display(),
            if self.options.dry_run { " (dry run)" } else { "" }
        );

        self.prepare_roots(source, replica, sink).await?;

        let mut stats = PassStats::new();
        let mut worklist = vec![(source.to_path_buf(), replica.to_path_buf())];

        while let Some((source_dir, replica_dir)) = worklist.pop() {
            if self.cancel.is_cancelled() {
                info!(
                    "Pass cancelled before {} ({} directories left)",
                    source_dir.display(),
                    worklist.len() + 1
                );
                return Err(Error::Cancelled);
            }

            let descents = self
                .reconcile_level(&source_dir, &replica_dir, &mut stats, sink)
                .instrument(debug_span!("level", dir = %source_dir.display()))
                .await;
            worklist.extend(descents.into_iter().rev());
        }

        stats.duration = started.elapsed();
        info!(
            "Pass finished in {:?}: {} files and {} directories copied, {} files and {} directories removed, {} bytes, {} failures",
            stats.duration,
            stats.files_copied,
            stats.directories_copied,
            stats.files_removed,
            stats.directories_removed,
            stats.bytes_copied,
            stats.failures
        );
        Ok(stats)
    }

    /// Apply the copies and deletes of one directory level and return the
    /// subdirectory pairs to descend into
    async fn reconcile_level<S>(
        &self,
        source_dir: &Path,
        replica_dir: &Path,
        stats: &mut PassStats,
        sink: &mut S,
    ) -> Vec<(PathBuf, PathBuf)>
    where
        S: EventSink + ?Sized,
    {
        stats.directories_visited += 1;

        let snapshot = match self.classifier.classify(source_dir, replica_dir).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                report_failure(&error, source_dir, stats, sink);
                return Vec::new();
            }
        };

        if !snapshot.requires_changes() {
            debug!("Up to date: {}", replica_dir.display());
        }

        let mut descents = Vec::with_capacity(snapshot.common_subdirs.len());

        for decision in snapshot.decisions(source_dir, replica_dir) {
            let outcome = match decision {
                ChangeDecision::Descend { source, replica } => {
                    descents.push((source, replica));
                    continue;
                }
                ChangeDecision::Copy {
                    source,
                    replica,
                    is_directory,
                    replaces,
                } => self.apply_copy(&source, &replica, is_directory, replaces).await,
                ChangeDecision::Delete { path, is_directory } => {
                    self.apply_delete(&path, is_directory).await
                }
            };

            match outcome {
                Ok((record, bytes)) => {
                    stats.record(&record, bytes);
                    sink.emit(SyncEvent::Operation(record));
                }
                Err(error) => report_failure(&error, replica_dir, stats, sink),
            }
        }

        descents
    }

    async fn apply_copy(
        &self,
        source: &Path,
        replica: &Path,
        is_directory: bool,
        replaces: Option<EntryKind>,
    ) -> Result<(OperationRecord, u64)> {
        if self.options.dry_run {
            debug!(
                "DRY RUN: Would copy {} -> {}",
                source.display(),
                replica.display()
            );
            return Ok((OperationRecord::copied(source, replica, is_directory), 0));
        }

        // A file over a file is replaced by rename; anything else has to go first.
        if let Some(existing) = replaces.filter(|kind| is_directory || *kind != EntryKind::File) {
            debug!("Removing {} before replacing it", replica.display());
            transfer::remove_entry(replica, existing.is_dir()).await?;
        }

        let bytes = if is_directory {
            transfer::copy_tree(source, replica).await?
        } else {
            transfer::copy_file(source, replica).await?
        };

        debug!("Copied: {} -> {}", source.display(), replica.display());
        Ok((OperationRecord::copied(source, replica, is_directory), bytes))
    }

    async fn apply_delete(&self, path: &Path, is_directory: bool) -> Result<(OperationRecord, u64)> {
        if self.options.dry_run {
            debug!("DRY RUN: Would delete {}", path.display());
        } else {
            transfer::remove_entry(path, is_directory).await?;
            debug!("Deleted: {}", path.display());
        }
        Ok((OperationRecord::removed(path, is_directory), 0))
    }

    /// Validate the roots and create the replica root if needed
    async fn prepare_roots<S>(&self, source: &Path, replica: &Path, sink: &mut S) -> Result<()>
    where
        S: EventSink + ?Sized,
    {
        match fs::metadata(source).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => {
                return Err(Error::SourceNotDirectory {
                    path: source.to_path_buf(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::MissingSourceRoot {
                    path: source.to_path_buf(),
                })
            }
            Err(e) => return Err(Error::access(source, AccessOperation::ReadMetadata, e)),
        }

        let replica_exists = match fs::metadata(replica).await {
            Ok(metadata) if metadata.is_dir() => true,
            Ok(_) => {
                return Err(Error::ReplicaNotDirectory {
                    path: replica.to_path_buf(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(Error::access(replica, AccessOperation::ReadMetadata, e)),
        };

        check_disjoint(source, replica).await?;

        if !replica_exists {
            if !self.options.dry_run {
                fs::create_dir_all(replica)
                    .await
                    .map_err(|e| Error::access(replica, AccessOperation::CreateDirectory, e))?;
            }
            info!("Created replica root {}", replica.display());
            sink.emit(SyncEvent::Operation(OperationRecord::created_directory(
                replica,
            )));
        }

        Ok(())
    }
}

fn report_failure<S>(error: &Error, fallback: &Path, stats: &mut PassStats, sink: &mut S)
where
    S: EventSink + ?Sized,
{
    warn!("Abandoning subtree: {}", error);
    stats.failures += 1;
    sink.emit(SyncEvent::Failure(SubtreeFailure::from_error(error, fallback)));
}

/// Refuse roots that contain each other; mirroring would recurse into its
/// own output
async fn check_disjoint(source: &Path, replica: &Path) -> Result<()> {
    let source_root = fs::canonicalize(source)
        .await
        .map_err(|e| Error::access(source, AccessOperation::ReadMetadata, e))?;
    let replica_root = resolve(replica).await?;

    if replica_root.starts_with(&source_root) || source_root.starts_with(&replica_root) {
        return Err(Error::OverlappingRoots {
            source_root,
            replica_root,
        });
    }
    Ok(())
}

/// Canonicalize the longest existing prefix of `path` and append the rest
async fn resolve(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| Error::access(path, AccessOperation::ReadMetadata, e))?
            .join(path)
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        match fs::canonicalize(existing).await {
            Ok(resolved) => {
                return Ok(missing
                    .iter()
                    .rev()
                    .fold(resolved, |acc: PathBuf, name| acc.join(name)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => return Ok(absolute),
                }
            }
            Err(e) => return Err(Error::access(existing, AccessOperation::ReadMetadata, e)),
        }
    }
}

/// Run one pass with default options and collect its records.
///
/// Fails with the precondition error when the pass could not start, or with
/// [`Error::PartialSubtreeFailure`] (carrying both the completed records and
/// the failures) when some subtrees could not be reconciled.
pub async fn reconcile(
    source: impl AsRef<Path>,
    replica: impl AsRef<Path>,
) -> Result<Vec<OperationRecord>> {
    let mut events: Vec<SyncEvent> = Vec::new();
    Reconciler::new()
        .run(source.as_ref(), replica.as_ref(), &mut events)
        .await?;

    let (records, failures) = split_events(events);
    if failures.is_empty() {
        Ok(records)
    } else {
        Err(Error::PartialSubtreeFailure { records, failures })
    }
}
