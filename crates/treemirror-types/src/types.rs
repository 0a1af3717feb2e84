//! Core data types for TreeMirror
//!
//! This module provides the values exchanged between the reconciler and its
//! callers: the decisions derived from one directory comparison, the records
//! emitted once an operation completed, and per-pass statistics.

use chrono::{DateTime, Local};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Error;

/// Timestamp attached to records and failures
pub type Timestamp = DateTime<Local>;

/// Type of a directory entry as seen by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EntryKind {
    /// Regular file (or a symlink resolving to one)
    File,
    /// Directory (or a symlink resolving to one)
    Directory,
    /// Anything else: sockets, fifos, devices, dangling symlinks
    Other,
}

impl EntryKind {
    /// Map a standard file type to an entry kind
    pub fn from_file_type(file_type: std::fs::FileType) -> Self {
        if file_type.is_dir() {
            Self::Directory
        } else if file_type.is_file() {
            Self::File
        } else {
            Self::Other
        }
    }

    /// Whether this entry is a directory
    pub fn is_dir(self) -> bool {
        self == Self::Directory
    }
}

/// How two files with the same name are judged identical
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CompareMode {
    /// Equal size and modification time
    Metadata,
    /// Equal size and modification time, or equal size and equal bytes
    #[default]
    Shallow,
    /// Equal size and equal blake3 digest, modification time ignored
    Checksum,
}

impl CompareMode {
    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Shallow => "shallow",
            Self::Checksum => "checksum",
        }
    }
}

impl fmt::Display for CompareMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of work derived from one entry of a directory comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeDecision {
    /// Copy a source entry over the replica
    Copy {
        /// Entry in the source tree
        source: PathBuf,
        /// Target location in the replica tree
        replica: PathBuf,
        /// Whether the source entry is a directory
        is_directory: bool,
        /// Kind of the replica entry being overwritten, if one exists
        replaces: Option<EntryKind>,
    },
    /// Delete a replica entry with no source counterpart
    Delete {
        /// Entry in the replica tree
        path: PathBuf,
        /// Whether the replica entry is a directory
        is_directory: bool,
    },
    /// Reconcile a directory present on both sides
    Descend {
        /// Directory in the source tree
        source: PathBuf,
        /// Directory in the replica tree
        replica: PathBuf,
    },
}

/// Verb of a completed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum OperationVerb {
    /// A single file was copied
    CopiedFile,
    /// A directory subtree was copied
    CopiedDirectory,
    /// A single file was removed
    RemovedFile,
    /// A directory subtree was removed
    RemovedDirectory,
    /// The replica root was created
    CreatedDirectory,
}

impl OperationVerb {
    /// Stable kebab-case name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CopiedFile => "copied-file",
            Self::CopiedDirectory => "copied-directory",
            Self::RemovedFile => "removed-file",
            Self::RemovedDirectory => "removed-directory",
            Self::CreatedDirectory => "created-directory",
        }
    }

    /// Whether the verb is one of the copy verbs
    pub fn is_copy(self) -> bool {
        matches!(self, Self::CopiedFile | Self::CopiedDirectory)
    }

    /// Whether the verb is one of the removal verbs
    pub fn is_removal(self) -> bool {
        matches!(self, Self::RemovedFile | Self::RemovedDirectory)
    }
}

impl fmt::Display for OperationVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of an operation that completed successfully
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OperationRecord {
    /// When the operation completed
    pub timestamp: Timestamp,
    /// What was done
    pub verb: OperationVerb,
    /// Source entry, absent for removals and root creation
    pub source_path: Option<PathBuf>,
    /// Affected path in the replica tree
    pub dest_path: PathBuf,
}

impl OperationRecord {
    /// Record a copy of a file or directory
    pub fn copied(source: impl Into<PathBuf>, dest: impl Into<PathBuf>, is_directory: bool) -> Self {
        let verb = if is_directory {
            OperationVerb::CopiedDirectory
        } else {
            OperationVerb::CopiedFile
        };
        Self {
            timestamp: Local::now(),
            verb,
            source_path: Some(source.into()),
            dest_path: dest.into(),
        }
    }

    /// Record a removal of a file or directory
    pub fn removed(dest: impl Into<PathBuf>, is_directory: bool) -> Self {
        let verb = if is_directory {
            OperationVerb::RemovedDirectory
        } else {
            OperationVerb::RemovedFile
        };
        Self {
            timestamp: Local::now(),
            verb,
            source_path: None,
            dest_path: dest.into(),
        }
    }

    /// Record the creation of the replica root
    pub fn created_directory(dest: impl Into<PathBuf>) -> Self {
        Self {
            timestamp: Local::now(),
            verb: OperationVerb::CreatedDirectory,
            source_path: None,
            dest_path: dest.into(),
        }
    }
}

/// A subtree whose reconciliation was abandoned
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SubtreeFailure {
    /// When the failure was observed
    pub timestamp: Timestamp,
    /// Offending path
    pub path: PathBuf,
    /// Rendered error
    pub message: String,
}

impl SubtreeFailure {
    /// Create a failure for a path
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a failure from an error, falling back to `fallback` when the
    /// error carries no path
    pub fn from_error(error: &Error, fallback: &Path) -> Self {
        let path = error.path().unwrap_or(fallback);
        Self::new(path, error.to_string())
    }
}

/// Item streamed from the reconciler to its caller
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SyncEvent {
    /// An operation completed
    Operation(OperationRecord),
    /// A subtree was abandoned
    Failure(SubtreeFailure),
}

impl SyncEvent {
    /// The operation record, if this is one
    pub fn as_operation(&self) -> Option<&OperationRecord> {
        match self {
            Self::Operation(record) => Some(record),
            Self::Failure(_) => None,
        }
    }

    /// The failure, if this is one
    pub fn as_failure(&self) -> Option<&SubtreeFailure> {
        match self {
            Self::Failure(failure) => Some(failure),
            Self::Operation(_) => None,
        }
    }
}

/// Statistics for one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PassStats {
    /// Number of files copied
    pub files_copied: u64,
    /// Number of directory subtrees copied
    pub directories_copied: u64,
    /// Number of files removed
    pub files_removed: u64,
    /// Number of directory subtrees removed
    pub directories_removed: u64,
    /// Total bytes written to the replica
    pub bytes_copied: u64,
    /// Number of directory pairs compared
    pub directories_visited: u64,
    /// Number of abandoned subtrees
    pub failures: u64,
    /// Total duration of the pass
    pub duration: Duration,
}

impl PassStats {
    /// Create a new empty statistics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a completed operation
    pub fn record(&mut self, record: &OperationRecord, bytes: u64) {
        match record.verb {
            OperationVerb::CopiedFile => self.files_copied += 1,
            OperationVerb::CopiedDirectory => self.directories_copied += 1,
            OperationVerb::RemovedFile => self.files_removed += 1,
            OperationVerb::RemovedDirectory => self.directories_removed += 1,
            OperationVerb::CreatedDirectory => {}
        }
        self.bytes_copied += bytes;
    }

    /// Number of copy and delete operations applied
    pub fn operations(&self) -> u64 {
        self.files_copied + self.directories_copied + self.files_removed + self.directories_removed
    }

    /// Whether the pass left the replica untouched and hit no failure
    pub fn is_clean(&self) -> bool {
        self.operations() == 0 && self.failures == 0
    }

    /// Calculate the overall transfer rate in bytes per second
    pub fn transfer_rate(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.bytes_copied as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(false, OperationVerb::CopiedFile)]
    #[case(true, OperationVerb::CopiedDirectory)]
    fn test_copied_record(#[case] is_directory: bool, #[case] verb: OperationVerb) {
        let record = OperationRecord::copied("/src/a", "/dst/a", is_directory);

        assert_eq!(record.verb, verb);
        assert!(record.verb.is_copy());
        assert_eq!(record.source_path.as_deref(), Some(Path::new("/src/a")));
        assert_eq!(record.dest_path, PathBuf::from("/dst/a"));
    }

    #[rstest]
    #[case(false, "removed-file")]
    #[case(true, "removed-directory")]
    fn test_removed_record_has_no_source(#[case] is_directory: bool, #[case] name: &str) {
        let record = OperationRecord::removed("/dst/b", is_directory);

        assert!(record.source_path.is_none());
        assert!(record.verb.is_removal());
        assert_eq!(record.verb.to_string(), name);
    }

    #[test]
    fn test_pass_stats_record() {
        let mut stats = PassStats::new();
        stats.record(&OperationRecord::copied("/s/a", "/d/a", false), 10);
        stats.record(&OperationRecord::copied("/s/dir", "/d/dir", true), 30);
        stats.record(&OperationRecord::removed("/d/old", false), 0);
        stats.record(&OperationRecord::created_directory("/d"), 0);

        assert_eq!(stats.files_copied, 1);
        assert_eq!(stats.directories_copied, 1);
        assert_eq!(stats.files_removed, 1);
        assert_eq!(stats.bytes_copied, 40);
        assert_eq!(stats.operations(), 3);
        assert!(!stats.is_clean());
    }

    #[test]
    fn test_empty_pass_is_clean() {
        let stats = PassStats::new();
        assert!(stats.is_clean());
        assert_eq!(stats.transfer_rate(), 0.0);
    }

    #[test]
    fn test_failure_from_error_uses_error_path() {
        let error = Error::access(
            "/source/locked",
            crate::AccessOperation::ListDirectory,
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let failure = SubtreeFailure::from_error(&error, Path::new("/source"));

        assert_eq!(failure.path, PathBuf::from("/source/locked"));
        assert!(failure.message.contains("list directory"));

        let fallback = SubtreeFailure::from_error(&Error::Cancelled, Path::new("/source"));
        assert_eq!(fallback.path, PathBuf::from("/source"));
    }

    #[test]
    fn test_sync_event_accessors() {
        let event = SyncEvent::Operation(OperationRecord::removed("/d/x", false));
        assert!(event.as_operation().is_some());
        assert!(event.as_failure().is_none());
    }

    #[test]
    fn test_compare_mode_default_is_shallow() {
        assert_eq!(CompareMode::default(), CompareMode::Shallow);
        assert_eq!(CompareMode::Checksum.to_string(), "checksum");
    }
}
