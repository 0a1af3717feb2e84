//! Entry classification for one directory level
//!
//! The classifier lists the direct children of a source directory and of its
//! replica counterpart and partitions the names into four disjoint sets. It
//! never recurses and never mutates anything.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, trace, warn};
use treemirror_types::{AccessOperation, ChangeDecision, CompareMode, EntryKind, Error, Result};

const COMPARE_CHUNK_SIZE: usize = 64 * 1024;

/// Metadata captured for one directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    /// Entry type
    pub kind: EntryKind,
    /// Size in bytes
    pub len: u64,
    /// Last modification time, when the platform reports one
    pub modified: Option<SystemTime>,
}

impl EntryInfo {
    fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            kind: EntryKind::from_file_type(metadata.file_type()),
            len: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }

    fn other() -> Self {
        Self {
            kind: EntryKind::Other,
            len: 0,
            modified: None,
        }
    }

    fn same_mtime(&self, other: &Self) -> bool {
        matches!((self.modified, other.modified), (Some(a), Some(b)) if a == b)
    }
}

/// Kinds of an entry present on both sides that needs to be recopied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// Kind on the source side
    pub source: EntryKind,
    /// Kind on the replica side
    pub replica: EntryKind,
}

/// Partition of one directory level relative to its replica counterpart
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    /// Names present only in the source, with their source kind
    pub source_only: BTreeMap<OsString, EntryKind>,
    /// Names present only in the replica, with their replica kind
    pub replica_only: BTreeMap<OsString, EntryKind>,
    /// Names present on both sides whose type or content differs
    pub differing: BTreeMap<OsString, Mismatch>,
    /// Names that are directories on both sides
    pub common_subdirs: BTreeSet<OsString>,
}

impl DirectorySnapshot {
    /// Whether this level needs any copy or delete
    pub fn requires_changes(&self) -> bool {
        !(self.source_only.is_empty() && self.replica_only.is_empty() && self.differing.is_empty())
    }

    /// Derive the decisions for this level: copies, then deletes, then
    /// descents, each in name order
    pub fn decisions(&self, source_dir: &Path, replica_dir: &Path) -> Vec<ChangeDecision> {
        let mut copies: BTreeMap<&OsString, (EntryKind, Option<EntryKind>)> = self
            .source_only
            .iter()
            .map(|(name, kind)| (name, (*kind, None)))
            .collect();
        copies.extend(
            self.differing
                .iter()
                .map(|(name, mismatch)| (name, (mismatch.source, Some(mismatch.replica)))),
        );

        let mut decisions = Vec::with_capacity(
            copies.len() + self.replica_only.len() + self.common_subdirs.len(),
        );

        decisions.extend(
            copies
                .into_iter()
                .map(|(name, (kind, replaces))| ChangeDecision::Copy {
                    source: source_dir.join(name),
                    replica: replica_dir.join(name),
                    is_directory: kind.is_dir(),
                    replaces,
                }),
        );

        decisions.extend(
            self.replica_only
                .iter()
                .map(|(name, kind)| ChangeDecision::Delete {
                    path: replica_dir.join(name),
                    is_directory: kind.is_dir(),
                }),
        );

        decisions.extend(
            self.common_subdirs
                .iter()
                .map(|name| ChangeDecision::Descend {
                    source: source_dir.join(name),
                    replica: replica_dir.join(name),
                }),
        );

        decisions
    }
}

/// Compares one directory level of the source against the replica
#[derive(Debug, Clone, Default)]
pub struct EntryClassifier {
    mode: CompareMode,
    tolerate_missing_replica: bool,
}

impl EntryClassifier {
    /// Create a classifier using the given file comparison policy
    pub fn new(mode: CompareMode) -> Self {
        Self {
            mode,
            tolerate_missing_replica: false,
        }
    }

    /// Treat a replica directory that does not exist as empty instead of
    /// failing. Used by dry runs, which never create the replica root.
    pub fn tolerate_missing_replica(mut self, tolerate: bool) -> Self {
        self.tolerate_missing_replica = tolerate;
        self
    }

    /// The file comparison policy in use
    pub fn mode(&self) -> CompareMode {
        self.mode
    }

    /// Classify the direct children of `source_dir` against `replica_dir`
    pub async fn classify(&self, source_dir: &Path, replica_dir: &Path) -> Result<DirectorySnapshot> {
        let source_entries = list_entries(source_dir, true).await?;
        let replica_entries = match list_entries(replica_dir, false).await {
            Ok(entries) => entries,
            Err(Error::Access { ref source, .. })
                if self.tolerate_missing_replica && source.kind() == io::ErrorKind::NotFound =>
            {
                BTreeMap::new()
            }
            Err(error) => return Err(error),
        };

        let mut snapshot = DirectorySnapshot::default();

        for (name, source_info) in &source_entries {
            if source_info.kind == EntryKind::Other {
                debug!(
                    "Not mirroring special entry {}",
                    source_dir.join(name).display()
                );
                continue;
            }

            let Some(replica_info) = replica_entries.get(name) else {
                snapshot.source_only.insert(name.clone(), source_info.kind);
                continue;
            };

            match (source_info.kind, replica_info.kind) {
                (EntryKind::Directory, EntryKind::Directory) => {
                    snapshot.common_subdirs.insert(name.clone());
                }
                (EntryKind::File, EntryKind::File) => {
                    let differs = self
                        .files_differ(
                            &source_dir.join(name),
                            source_info,
                            &replica_dir.join(name),
                            replica_info,
                        )
                        .await;
                    if differs {
                        snapshot.differing.insert(
                            name.clone(),
                            Mismatch {
                                source: EntryKind::File,
                                replica: EntryKind::File,
                            },
                        );
                    }
                }
                (source, replica) => {
                    snapshot
                        .differing
                        .insert(name.clone(), Mismatch { source, replica });
                }
            }
        }

        for (name, replica_info) in &replica_entries {
            let mirrored = source_entries
                .get(name)
                .is_some_and(|info| info.kind != EntryKind::Other);
            if !mirrored {
                snapshot.replica_only.insert(name.clone(), replica_info.kind);
            }
        }

        trace!(
            "Classified {}: {} source-only, {} replica-only, {} differing, {} common subdirs",
            source_dir.display(),
            snapshot.source_only.len(),
            snapshot.replica_only.len(),
            snapshot.differing.len(),
            snapshot.common_subdirs.len()
        );

        Ok(snapshot)
    }

    /// Decide whether two regular files differ. Read failures count as a
    /// difference so that a real change is never skipped.
    async fn files_differ(
        &self,
        source_path: &Path,
        source: &EntryInfo,
        replica_path: &Path,
        replica: &EntryInfo,
    ) -> bool {
        if source.len != replica.len {
            return true;
        }

        let outcome = match self.mode {
            CompareMode::Metadata => return !source.same_mtime(replica),
            CompareMode::Shallow if source.same_mtime(replica) => return false,
            CompareMode::Shallow => contents_differ(source_path, replica_path).await,
            CompareMode::Checksum => digests_differ(source_path, replica_path).await,
        };

        outcome.unwrap_or_else(|error| {
            warn!("Treating {} as changed: {}", source_path.display(), error);
            true
        })
    }
}

/// List the direct children of `dir`. Source listings follow symlinks so that
/// the replica receives plain content; replica listings do not, so that the
/// reconciler never writes through a link out of the replica tree.
async fn list_entries(dir: &Path, follow_symlinks: bool) -> Result<BTreeMap<OsString, EntryInfo>> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| Error::access(dir, AccessOperation::ListDirectory, e))?;
    let mut listing = BTreeMap::new();

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::access(dir, AccessOperation::ListDirectory, e))?
    {
        let path = entry.path();
        let metadata = if follow_symlinks {
            fs::metadata(&path).await
        } else {
            fs::symlink_metadata(&path).await
        };

        let info = match metadata {
            Ok(metadata) if metadata.file_type().is_symlink() => EntryInfo::other(),
            Ok(metadata) => EntryInfo::from_metadata(&metadata),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // Dangling symlink, or the entry vanished since the listing.
                match fs::symlink_metadata(&path).await {
                    Ok(_) => EntryInfo::other(),
                    Err(_) => {
                        trace!("Entry vanished during listing: {}", path.display());
                        continue;
                    }
                }
            }
            Err(e) => return Err(Error::access(&path, AccessOperation::ReadMetadata, e)),
        };

        listing.insert(entry.file_name(), info);
    }

    Ok(listing)
}

async fn contents_differ(a: &Path, b: &Path) -> Result<bool> {
    let mut file_a = open(a).await?;
    let mut file_b = open(b).await?;
    let mut buf_a = vec![0u8; COMPARE_CHUNK_SIZE];
    let mut buf_b = vec![0u8; COMPARE_CHUNK_SIZE];

    loop {
        let read_a = fill(&mut file_a, &mut buf_a)
            .await
            .map_err(|e| Error::access(a, AccessOperation::ReadFile, e))?;
        let read_b = fill(&mut file_b, &mut buf_b)
            .await
            .map_err(|e| Error::access(b, AccessOperation::ReadFile, e))?;

        if buf_a[..read_a] != buf_b[..read_b] {
            return Ok(true);
        }
        if read_a == 0 {
            return Ok(false);
        }
    }
}

async fn digests_differ(a: &Path, b: &Path) -> Result<bool> {
    Ok(digest(a).await? != digest(b).await?)
}

async fn digest(path: &Path) -> Result<blake3::Hash> {
    let mut file = open(path).await?;
    let mut buffer = vec![0u8; COMPARE_CHUNK_SIZE];
    let mut hasher = blake3::Hasher::new();

    loop {
        let read = file
            .read(&mut buffer)
            .await
            .map_err(|e| Error::access(path, AccessOperation::ReadFile, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finalize())
}

async fn open(path: &Path) -> Result<fs::File> {
    fs::File::open(path)
        .await
        .map_err(|e| Error::access(path, AccessOperation::ReadFile, e))
}

/// Read until `buf` is full or the end of the file is reached
async fn fill(file: &mut fs::File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = file.read(&mut buf[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use rstest::rstest;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn roots() -> (TempDir, PathBuf, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("source");
        let replica = temp_dir.path().join("replica");
        std::fs::create_dir(&source).unwrap();
        std::fs::create_dir(&replica).unwrap();
        (temp_dir, source, replica)
    }

    fn write_with_mtime(path: &Path, content: &[u8], seconds: i64) {
        std::fs::write(path, content).unwrap();
        set_file_mtime(path, FileTime::from_unix_time(seconds, 0)).unwrap();
    }

    fn names(map: &BTreeMap<OsString, EntryKind>) -> Vec<String> {
        map.keys().map(|n| n.to_string_lossy().into_owned()).collect()
    }

    #[tokio::test]
    async fn test_classify_partitions_names() {
        let (_guard, source, replica) = roots();
        std::fs::write(source.join("new.txt"), b"new").unwrap();
        write_with_mtime(&source.join("same.txt"), b"same", 1_000);
        write_with_mtime(&replica.join("same.txt"), b"same", 1_000);
        std::fs::write(source.join("changed.txt"), b"version two").unwrap();
        std::fs::write(replica.join("changed.txt"), b"v1").unwrap();
        std::fs::write(replica.join("stale.txt"), b"stale").unwrap();
        std::fs::create_dir(source.join("docs")).unwrap();
        std::fs::create_dir(replica.join("docs")).unwrap();
        std::fs::create_dir(replica.join("old_dir")).unwrap();

        let snapshot = EntryClassifier::default()
            .classify(&source, &replica)
            .await
            .unwrap();

        assert_eq!(names(&snapshot.source_only), vec!["new.txt"]);
        assert_eq!(names(&snapshot.replica_only), vec!["old_dir", "stale.txt"]);
        assert_eq!(
            snapshot.replica_only.get(&OsString::from("old_dir")),
            Some(&EntryKind::Directory)
        );
        assert_eq!(snapshot.differing.len(), 1);
        assert!(snapshot.differing.contains_key(&OsString::from("changed.txt")));
        assert_eq!(
            snapshot.common_subdirs.iter().collect::<Vec<_>>(),
            vec![&OsString::from("docs")]
        );
        assert!(snapshot.requires_changes());
    }

    #[tokio::test]
    async fn test_type_mismatch_is_differing() {
        let (_guard, source, replica) = roots();
        std::fs::create_dir(source.join("entry")).unwrap();
        std::fs::write(replica.join("entry"), b"file").unwrap();

        let snapshot = EntryClassifier::default()
            .classify(&source, &replica)
            .await
            .unwrap();

        assert_eq!(
            snapshot.differing.get(&OsString::from("entry")),
            Some(&Mismatch {
                source: EntryKind::Directory,
                replica: EntryKind::File,
            })
        );
        assert!(snapshot.common_subdirs.is_empty());
    }

    #[rstest]
    #[case::metadata(CompareMode::Metadata, true)]
    #[case::shallow(CompareMode::Shallow, false)]
    #[case::checksum(CompareMode::Checksum, false)]
    #[tokio::test]
    async fn test_same_bytes_different_mtime(#[case] mode: CompareMode, #[case] differing: bool) {
        let (_guard, source, replica) = roots();
        write_with_mtime(&source.join("a.txt"), b"identical", 2_000);
        write_with_mtime(&replica.join("a.txt"), b"identical", 1_000);

        let snapshot = EntryClassifier::new(mode)
            .classify(&source, &replica)
            .await
            .unwrap();

        assert_eq!(snapshot.requires_changes(), differing);
    }

    #[rstest]
    #[case::metadata(CompareMode::Metadata, false)]
    #[case::shallow(CompareMode::Shallow, false)]
    #[case::checksum(CompareMode::Checksum, true)]
    #[tokio::test]
    async fn test_same_size_and_mtime_different_bytes(
        #[case] mode: CompareMode,
        #[case] differing: bool,
    ) {
        let (_guard, source, replica) = roots();
        write_with_mtime(&source.join("a.txt"), b"abc", 1_000);
        write_with_mtime(&replica.join("a.txt"), b"xyz", 1_000);

        let snapshot = EntryClassifier::new(mode)
            .classify(&source, &replica)
            .await
            .unwrap();

        assert_eq!(!snapshot.differing.is_empty(), differing);
    }

    #[rstest]
    #[case(CompareMode::Metadata)]
    #[case(CompareMode::Shallow)]
    #[case(CompareMode::Checksum)]
    #[tokio::test]
    async fn test_size_change_always_differs(#[case] mode: CompareMode) {
        let (_guard, source, replica) = roots();
        write_with_mtime(&source.join("a.txt"), b"longer content", 1_000);
        write_with_mtime(&replica.join("a.txt"), b"short", 1_000);

        let snapshot = EntryClassifier::new(mode)
            .classify(&source, &replica)
            .await
            .unwrap();

        assert!(snapshot.differing.contains_key(&OsString::from("a.txt")));
    }

    #[tokio::test]
    async fn test_shallow_compares_large_files_chunkwise() {
        let (_guard, source, replica) = roots();
        let mut content = vec![7u8; COMPARE_CHUNK_SIZE * 3 + 17];
        write_with_mtime(&source.join("big.bin"), &content, 2_000);
        let last = content.len() - 1;
        content[last] = 8;
        write_with_mtime(&replica.join("big.bin"), &content, 1_000);

        let snapshot = EntryClassifier::new(CompareMode::Shallow)
            .classify(&source, &replica)
            .await
            .unwrap();

        assert!(snapshot.differing.contains_key(&OsString::from("big.bin")));
    }

    #[tokio::test]
    async fn test_missing_source_dir_is_access_error() {
        let (_guard, source, replica) = roots();
        let missing = source.join("missing");

        let error = EntryClassifier::default()
            .classify(&missing, &replica)
            .await
            .unwrap_err();

        match error {
            Error::Access {
                path, operation, ..
            } => {
                assert_eq!(path, missing);
                assert_eq!(operation, AccessOperation::ListDirectory);
            }
            other => panic!("Expected access error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tolerated_missing_replica_is_empty() {
        let (_guard, source, replica) = roots();
        std::fs::write(source.join("a.txt"), b"hi").unwrap();

        let snapshot = EntryClassifier::default()
            .tolerate_missing_replica(true)
            .classify(&source, &replica.join("absent"))
            .await
            .unwrap();

        assert_eq!(names(&snapshot.source_only), vec!["a.txt"]);
    }

    #[test]
    fn test_decisions_order_and_targets() {
        let mut snapshot = DirectorySnapshot::default();
        snapshot
            .source_only
            .insert(OsString::from("b.txt"), EntryKind::File);
        snapshot.differing.insert(
            OsString::from("a"),
            Mismatch {
                source: EntryKind::Directory,
                replica: EntryKind::File,
            },
        );
        snapshot
            .replica_only
            .insert(OsString::from("old"), EntryKind::Directory);
        snapshot.common_subdirs.insert(OsString::from("sub"));

        let decisions = snapshot.decisions(Path::new("/src"), Path::new("/dst"));

        assert_eq!(
            decisions,
            vec![
                ChangeDecision::Copy {
                    source: PathBuf::from("/src/a"),
                    replica: PathBuf::from("/dst/a"),
                    is_directory: true,
                    replaces: Some(EntryKind::File),
                },
                ChangeDecision::Copy {
                    source: PathBuf::from("/src/b.txt"),
                    replica: PathBuf::from("/dst/b.txt"),
                    is_directory: false,
                    replaces: None,
                },
                ChangeDecision::Delete {
                    path: PathBuf::from("/dst/old"),
                    is_directory: true,
                },
                ChangeDecision::Descend {
                    source: PathBuf::from("/src/sub"),
                    replica: PathBuf::from("/dst/sub"),
                },
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_replica_symlink_is_not_followed() {
        let (guard, source, replica) = roots();
        let outside = guard.path().join("outside");
        std::fs::create_dir(&outside).unwrap();
        std::fs::create_dir(source.join("link")).unwrap();
        std::os::unix::fs::symlink(&outside, replica.join("link")).unwrap();

        let snapshot = EntryClassifier::default()
            .classify(&source, &replica)
            .await
            .unwrap();

        assert_eq!(
            snapshot.differing.get(&OsString::from("link")),
            Some(&Mismatch {
                source: EntryKind::Directory,
                replica: EntryKind::Other,
            })
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dangling_source_symlink_is_not_mirrored() {
        let (guard, source, replica) = roots();
        std::os::unix::fs::symlink(guard.path().join("nowhere"), source.join("dangling")).unwrap();
        std::fs::write(replica.join("dangling"), b"stale").unwrap();

        let snapshot = EntryClassifier::default()
            .classify(&source, &replica)
            .await
            .unwrap();

        assert!(snapshot.source_only.is_empty());
        assert_eq!(names(&snapshot.replica_only), vec!["dangling"]);
    }
}
