//! Source tree traversal.
//!
//! Runs on a blocking thread: walks the tree, fingerprints each file and
//! feeds the bounded work queue. Dropping the sender when the walk ends is
//! what tells the workers no more work is coming.

use std::fs;
use std::path::{Path, PathBuf};

use jwalk::WalkDir;
use tokio::sync::mpsc::Sender;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::hash::{destination_key, fingerprint_file, ContentDigest};
use crate::sync::content_type::content_type;

/// One file to sync. Built once during traversal, then owned by exactly
/// one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub absolute_path: PathBuf,
    pub digest: ContentDigest,
    pub size: u64,
    /// Path relative to the source root, '/'-separated
    pub destination_key: String,
    pub content_type: String,
}

/// Resolve the source directory to an absolute path and check that it is
/// a directory.
pub fn prepare_root(source: &Path) -> Result<PathBuf> {
    let root = source
        .canonicalize()
        .map_err(|e| SyncError::from_io_error(e, source))?;
    if !root.is_dir() {
        return Err(SyncError::SourceNotDirectory { path: root });
    }
    Ok(root)
}

/// Build the work item for a file under `root`.
pub fn build_work_item(root: &Path, path: &Path) -> Result<WorkItem> {
    let size = fs::metadata(path)
        .map_err(|e| SyncError::from_io_error(e, path))?
        .len();
    let fingerprint = fingerprint_file(path)?;
    if fingerprint.size != size {
        // Grew or shrank while being hashed
        return Err(SyncError::ContentChanged {
            path: path.to_path_buf(),
        });
    }

    Ok(WorkItem {
        absolute_path: path.to_path_buf(),
        digest: fingerprint.digest,
        size,
        destination_key: destination_key(root, path)?,
        content_type: content_type(path),
    })
}

/// Walk `root` and publish one work item per non-directory entry.
///
/// Any traversal or read error ends the walk with that error. If the queue
/// is closed from the receiving side (the workers are gone) the walk stops
/// early without error; the workers' failure is what gets reported.
/// Returns the number of items published.
pub fn walk_source(root: &Path, queue: Sender<WorkItem>) -> Result<usize> {
    let mut published = 0;

    let walker = WalkDir::new(root)
        .skip_hidden(false)
        .follow_links(false)
        .sort(true);

    for entry in walker {
        let entry = entry.map_err(SyncError::from_walk_error)?;
        let path = entry.path();
        let file_type = entry.file_type();

        if file_type.is_dir() {
            continue;
        }
        if file_type.is_symlink() {
            let target = fs::metadata(&path).map_err(|e| SyncError::from_io_error(e, &path))?;
            if target.is_dir() {
                debug!(path = %path.display(), "skipping symlinked directory");
                continue;
            }
        }

        let item = build_work_item(root, &path)?;
        debug!(key = %item.destination_key, size = item.size, "queued");
        if queue.blocking_send(item).is_err() {
            debug!("work queue closed, stopping traversal");
            return Ok(published);
        }
        published += 1;
    }

    Ok(published)
}
