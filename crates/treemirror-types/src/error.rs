//! Error types and handling for TreeMirror
//!
//! Errors fall in two groups. Root-level errors (missing source, overlapping
//! roots, ...) abort a whole reconciliation pass before the replica is
//! touched. Access errors are raised for one path and only cost the subtree
//! they occurred in; the reconciler turns them into reported failures and
//! keeps going.

use crate::types::{OperationRecord, SubtreeFailure};
use std::fmt;
use std::path::{Path, PathBuf};

/// Error severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ErrorSeverity {
    /// Low severity - the pass finished, some work was skipped
    Low,
    /// Medium severity - the pass did not run, the next one may succeed
    Medium,
    /// High severity - operator action is needed before passes can succeed
    High,
    /// Critical severity - the process should stop
    Critical,
}

/// Filesystem operation that failed for a given path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AccessOperation {
    /// Listing the children of a directory
    ListDirectory,
    /// Reading metadata of a path
    ReadMetadata,
    /// Reading file content for comparison
    ReadFile,
    /// Copying a single file
    CopyFile,
    /// Creating a directory
    CreateDirectory,
    /// Setting the modification time of a copied file
    SetModifiedTime,
    /// Removing a single file
    RemoveFile,
    /// Removing a directory and everything beneath it
    RemoveDirectory,
    /// Moving a temporary copy into place
    Rename,
}

impl fmt::Display for AccessOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ListDirectory => "list directory",
            Self::ReadMetadata => "read metadata of",
            Self::ReadFile => "read file",
            Self::CopyFile => "copy file",
            Self::CreateDirectory => "create directory",
            Self::SetModifiedTime => "set modification time of",
            Self::RemoveFile => "remove file",
            Self::RemoveDirectory => "remove directory",
            Self::Rename => "move into place",
        };
        f.write_str(text)
    }
}

/// Main error type for TreeMirror operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The top-level source directory does not exist
    #[error("Source directory '{}' does not exist", path.display())]
    MissingSourceRoot {
        /// Source root that was looked up
        path: PathBuf,
    },

    /// The top-level source path exists but is not a directory
    #[error("Source path '{}' is not a directory", path.display())]
    SourceNotDirectory {
        /// Offending source root
        path: PathBuf,
    },

    /// The top-level replica path exists but is not a directory
    #[error("Replica path '{}' exists and is not a directory", path.display())]
    ReplicaNotDirectory {
        /// Offending replica root
        path: PathBuf,
    },

    /// One root lies inside the other
    #[error(
        "Source '{}' and replica '{}' overlap",
        source_root.display(),
        replica_root.display()
    )]
    OverlappingRoots {
        /// Resolved source root
        source_root: PathBuf,
        /// Resolved replica root
        replica_root: PathBuf,
    },

    /// A listing, copy or delete call failed for a specific path
    #[error("Failed to {operation} '{}': {source}", path.display())]
    Access {
        /// Path the operation was applied to
        path: PathBuf,
        /// Operation that failed
        operation: AccessOperation,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// One or more subtrees failed during an otherwise completed pass
    #[error("{} subtree(s) failed during the pass", failures.len())]
    PartialSubtreeFailure {
        /// Operations that completed during the pass
        records: Vec<OperationRecord>,
        /// Subtrees whose reconciliation was abandoned
        failures: Vec<SubtreeFailure>,
    },

    /// Operation cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration issue
        message: String,
    },
}

/// Error kind for categorizing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A root-level precondition of the pass does not hold
    Precondition,
    /// Filesystem access failed for one path
    Access,
    /// Aggregate of subtree failures
    Partial,
    /// Cancellation
    Cancelled,
    /// Configuration errors
    Config,
}

impl Error {
    /// Get the error kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingSourceRoot { .. }
            | Self::SourceNotDirectory { .. }
            | Self::ReplicaNotDirectory { .. }
            | Self::OverlappingRoots { .. } => ErrorKind::Precondition,
            Self::Access { .. } => ErrorKind::Access,
            Self::PartialSubtreeFailure { .. } => ErrorKind::Partial,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    /// Get the error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::PartialSubtreeFailure { .. } | Self::Cancelled => ErrorSeverity::Low,
            Self::MissingSourceRoot { .. } | Self::Access { .. } => ErrorSeverity::Medium,
            Self::SourceNotDirectory { .. } | Self::ReplicaNotDirectory { .. } => {
                ErrorSeverity::High
            }
            Self::OverlappingRoots { .. } | Self::Config { .. } => ErrorSeverity::Critical,
        }
    }

    /// Check if the next scheduled pass can be expected to make progress
    pub fn is_recoverable(&self) -> bool {
        self.severity() < ErrorSeverity::Critical && !matches!(self, Self::Cancelled)
    }

    /// Path the error is about, if any
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::MissingSourceRoot { path }
            | Self::SourceNotDirectory { path }
            | Self::ReplicaNotDirectory { path }
            | Self::Access { path, .. } => Some(path),
            Self::OverlappingRoots { replica_root, .. } => Some(replica_root),
            Self::PartialSubtreeFailure { .. } | Self::Cancelled | Self::Config { .. } => None,
        }
    }

    /// Create a new access error
    pub fn access(
        path: impl Into<PathBuf>,
        operation: AccessOperation,
        source: std::io::Error,
    ) -> Self {
        Self::Access {
            path: path.into(),
            operation,
            source,
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io;

    fn io_error() -> io::Error {
        io::Error::new(io::ErrorKind::PermissionDenied, "permission denied")
    }

    proptest! {
        #[test]
        fn test_access_error_names_path_and_operation(name in "[a-z]{1,12}") {
            let path = PathBuf::from("/replica").join(&name);
            let error = Error::access(&path, AccessOperation::RemoveFile, io_error());

            prop_assert_eq!(error.kind(), ErrorKind::Access);
            prop_assert_eq!(error.path(), Some(path.as_path()));
            prop_assert!(error.to_string().contains("remove file"));
            prop_assert!(error.to_string().contains(&name));
            prop_assert!(error.is_recoverable());
        }
    }

    #[test]
    fn test_error_severity_ordering() {
        assert!(ErrorSeverity::Low < ErrorSeverity::Medium);
        assert!(ErrorSeverity::Medium < ErrorSeverity::High);
        assert!(ErrorSeverity::High < ErrorSeverity::Critical);
    }

    #[test]
    fn test_missing_source_root_is_recoverable() {
        let error = Error::MissingSourceRoot {
            path: PathBuf::from("/nonexistent/source"),
        };

        assert_eq!(error.kind(), ErrorKind::Precondition);
        assert_eq!(error.severity(), ErrorSeverity::Medium);
        assert!(error.is_recoverable());
        assert!(error.to_string().contains("/nonexistent/source"));
        assert!(error.to_string().contains("does not exist"));
    }

    #[test]
    fn test_overlapping_roots_is_fatal() {
        let error = Error::OverlappingRoots {
            source_root: PathBuf::from("/data"),
            replica_root: PathBuf::from("/data/replica"),
        };

        assert_eq!(error.severity(), ErrorSeverity::Critical);
        assert!(!error.is_recoverable());
        assert_eq!(error.path(), Some(Path::new("/data/replica")));
    }

    #[test]
    fn test_config_error() {
        let error = Error::config("interval must be positive");

        assert_eq!(error.kind(), ErrorKind::Config);
        assert_eq!(error.severity(), ErrorSeverity::Critical);
        assert!(!error.is_recoverable());
        assert!(error.path().is_none());
    }

    #[test]
    fn test_cancelled_error() {
        let error = Error::Cancelled;

        assert_eq!(error.kind(), ErrorKind::Cancelled);
        assert_eq!(error.severity(), ErrorSeverity::Low);
        assert!(!error.is_recoverable());
    }

    #[test]
    fn test_partial_failure_counts_subtrees() {
        let error = Error::PartialSubtreeFailure {
            records: Vec::new(),
            failures: vec![
                SubtreeFailure::new("/replica/a", "denied"),
                SubtreeFailure::new("/replica/b", "denied"),
            ],
        };

        assert_eq!(error.kind(), ErrorKind::Partial);
        assert!(error.is_recoverable());
        assert_eq!(error.to_string(), "2 subtree(s) failed during the pass");
    }

    #[test]
    fn test_access_error_keeps_io_source() {
        use std::error::Error as _;

        let error = Error::access("/source/dir", AccessOperation::ListDirectory, io_error());
        let source = error.source().expect("access errors carry their io error");

        assert!(source.to_string().contains("permission denied"));
        assert!(error
            .to_string()
            .starts_with("Failed to list directory '/source/dir'"));
    }
}
