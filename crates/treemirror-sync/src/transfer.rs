//! Filesystem mutations applied to the replica

use filetime::FileTime;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, trace};
use treemirror_types::{AccessOperation, EntryKind, Error, Result};

/// Suffix of the staging file a copy is written to before it replaces the
/// replica entry. Every staging name also carries a fresh random id, so it
/// never coincides with a mirrored entry. A leftover staging file has no
/// source counterpart and is removed by the next pass.
pub const STAGING_SUFFIX: &str = ".treemirror-partial";

/// Copy one file over `dest`, preserving the source modification time.
///
/// The bytes go to a staging sibling first and are renamed into place, so an
/// interrupted copy never leaves a half-written replica file behind.
pub async fn copy_file(source: &Path, dest: &Path) -> Result<u64> {
    let staging = staging_path(dest);

    let result: Result<u64> = async {
        let bytes = fs::copy(source, &staging)
            .await
            .map_err(|e| Error::access(source, AccessOperation::CopyFile, e))?;
        preserve_mtime(source, &staging).await?;
        fs::rename(&staging, dest)
            .await
            .map_err(|e| Error::access(dest, AccessOperation::Rename, e))?;
        Ok(bytes)
    }
    .await;

    match &result {
        Ok(bytes) => trace!("Copied {} bytes: {} -> {}", bytes, source.display(), dest.display()),
        Err(_) => {
            if let Err(e) = fs::remove_file(&staging).await {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!("Failed to clean up {}: {}", staging.display(), e);
                }
            }
        }
    }
    result
}

/// Copy a directory subtree to `dest`, which must not exist yet
pub async fn copy_tree(source: &Path, dest: &Path) -> Result<u64> {
    let mut bytes = 0;
    let mut pending = vec![(source.to_path_buf(), dest.to_path_buf())];

    while let Some((source_dir, dest_dir)) = pending.pop() {
        fs::create_dir(&dest_dir)
            .await
            .map_err(|e| Error::access(&dest_dir, AccessOperation::CreateDirectory, e))?;

        let mut entries = fs::read_dir(&source_dir)
            .await
            .map_err(|e| Error::access(&source_dir, AccessOperation::ListDirectory, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::access(&source_dir, AccessOperation::ListDirectory, e))?
        {
            let source_path = entry.path();
            let dest_path = dest_dir.join(entry.file_name());

            let metadata = match fs::metadata(&source_path).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Skipping dangling entry {}", source_path.display());
                    continue;
                }
                Err(e) => {
                    return Err(Error::access(
                        &source_path,
                        AccessOperation::ReadMetadata,
                        e,
                    ))
                }
            };

            match EntryKind::from_file_type(metadata.file_type()) {
                EntryKind::Directory => pending.push((source_path, dest_path)),
                EntryKind::File => {
                    bytes += fs::copy(&source_path, &dest_path)
                        .await
                        .map_err(|e| Error::access(&source_path, AccessOperation::CopyFile, e))?;
                    preserve_mtime(&source_path, &dest_path).await?;
                }
                EntryKind::Other => {
                    debug!("Not mirroring special entry {}", source_path.display());
                }
            }
        }
    }

    Ok(bytes)
}

/// Remove a replica entry; directories are removed with everything beneath
/// them
pub async fn remove_entry(path: &Path, is_directory: bool) -> Result<()> {
    if is_directory {
        fs::remove_dir_all(path)
            .await
            .map_err(|e| Error::access(path, AccessOperation::RemoveDirectory, e))
    } else {
        fs::remove_file(path)
            .await
            .map_err(|e| Error::access(path, AccessOperation::RemoveFile, e))
    }
}

async fn preserve_mtime(source: &Path, dest: &Path) -> Result<()> {
    let metadata = fs::metadata(source)
        .await
        .map_err(|e| Error::access(source, AccessOperation::ReadMetadata, e))?;

    if let Ok(modified) = metadata.modified() {
        filetime::set_file_mtime(dest, FileTime::from_system_time(modified))
            .map_err(|e| Error::access(dest, AccessOperation::SetModifiedTime, e))?;
    }
    Ok(())
}

/// `.<name>.<random id>.treemirror-partial` next to `dest`
fn staging_path(dest: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(dest.file_name().unwrap_or_default());
    name.push(format!(".{}", uuid::Uuid::new_v4().simple()));
    name.push(STAGING_SUFFIX);
    dest.with_file_name(name)
}
