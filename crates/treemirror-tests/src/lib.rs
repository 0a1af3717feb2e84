//! TreeMirror integration test utilities
//!
//! Helpers for building source and replica trees on disk and comparing them
//! after a pass.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

/// One entry of a tree snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEntry {
    /// Regular file with its content
    File(Vec<u8>),
    /// Directory
    Directory,
}

/// Every entry below a root, keyed by path relative to the root
pub type TreeSnapshot = BTreeMap<PathBuf, TreeEntry>;

/// A source root and a replica root inside one temporary directory
pub struct Fixture {
    temp_dir: TempDir,
    /// Source root
    pub source: PathBuf,
    /// Replica root
    pub replica: PathBuf,
}

impl Fixture {
    /// Create empty source and replica roots
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let source = temp_dir.path().join("source");
        let replica = temp_dir.path().join("replica");
        fs::create_dir(&source).expect("Failed to create source root");
        fs::create_dir(&replica).expect("Failed to create replica root");
        Self {
            temp_dir,
            source,
            replica,
        }
    }

    /// Directory holding both roots
    pub fn base(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a file below the source root
    pub fn source_file(&self, relative: &str, content: &[u8]) -> PathBuf {
        write_file(&self.source, relative, content)
    }

    /// Write a file below the replica root
    pub fn replica_file(&self, relative: &str, content: &[u8]) -> PathBuf {
        write_file(&self.replica, relative, content)
    }

    /// Whether both roots currently hold identical trees
    pub fn is_mirrored(&self) -> bool {
        snapshot(&self.source) == snapshot(&self.replica)
    }
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `content` to `root/relative`, creating parent directories
pub fn write_file(root: &Path, relative: &str, content: &[u8]) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    fs::write(&path, content).expect("Failed to write file");
    path
}

/// Set the modification time of `path` to a fixed point in the past, so a
/// file written moments later on the other side never shares its timestamp
pub fn backdate(path: &Path) {
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(1_000_000_000, 0))
        .expect("Failed to set modification time");
}

/// Snapshot the tree below `root`, without following symlinks
pub fn snapshot(root: &Path) -> TreeSnapshot {
    WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .map(|entry| entry.expect("Failed to walk tree"))
        .filter_map(|entry| {
            let relative = entry
                .path()
                .strip_prefix(root)
                .expect("Entry outside root")
                .to_path_buf();
            let file_type = entry.file_type();
            if file_type.is_dir() {
                Some((relative, TreeEntry::Directory))
            } else if file_type.is_file() {
                let content = fs::read(entry.path()).expect("Failed to read file");
                Some((relative, TreeEntry::File(content)))
            } else {
                None
            }
        })
        .collect()
}
