// Centralized error handling
// Every fatal condition of a sync run is one of these variants

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for a sync run.
///
/// All variants are fatal: the pipeline stops at the first one and the
/// remote bucket is left in whatever partial state the completed puts
/// produced.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Walking the source tree failed
    #[error("Failed to traverse {}: {source}\nSuggestion: Check that every directory under the source is readable", display_opt(.path))]
    Traversal {
        path: Option<PathBuf>,
        #[source]
        source: jwalk::Error,
    },

    /// Opening, reading or stat-ing a local file failed
    #[error("I/O error while reading {}: {source}\nSuggestion: Check file permissions and that the file was not removed during the sync", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("File not found: {}\nSuggestion: Check that the path is correct and the file exists", .path.display())]
    NotFound { path: PathBuf },

    #[error("Permission denied while reading {}\nSuggestion: Check file permissions or run with appropriate privileges", .path.display())]
    PermissionDenied { path: PathBuf },

    #[error("Source is not a directory: {}\nSuggestion: Pass the directory to upload, not a single file", .path.display())]
    SourceNotDirectory { path: PathBuf },

    #[error("Path is not valid UTF-8 and cannot be used as an object key: {}\nSuggestion: Rename the file", .path.display())]
    NonUtf8Path { path: PathBuf },

    /// Metadata lookup failed for a reason other than "not found"
    #[error("Failed to look up remote object {key}: {source:#}\nSuggestion: Check credentials, region and endpoint settings")]
    Remote {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Failed to upload {key}: {source:#}\nSuggestion: Re-run the sync; unchanged files will be skipped")]
    Transfer {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// The bytes read for upload do not match the digest taken during traversal
    #[error("File changed while syncing: {}\nSuggestion: Re-run the sync once writers to this file have finished", .path.display())]
    ContentChanged { path: PathBuf },

    #[error("{operation} for {key} timed out after {after:?}\nSuggestion: Raise --timeout or check network connectivity")]
    Timeout {
        key: String,
        operation: &'static str,
        after: Duration,
    },

    #[error("Invalid bucket url {url:?}: {reason}\nSuggestion: Use the form s3://bucket or s3://bucket/prefix")]
    InvalidDestination { url: String, reason: String },

    #[error("Invalid configuration{}: {reason}\nSuggestion: Check the config file and command-line flags", .path.as_ref().map(|p| format!(" in {}", p.display())).unwrap_or_default())]
    Config {
        path: Option<PathBuf>,
        reason: String,
    },

    /// Writing a progress line failed, e.g. stdout is a closed pipe
    #[error("Failed to write progress output: {source}\nSuggestion: Check that whatever reads stdout is still running")]
    Output {
        #[source]
        source: io::Error,
    },

    /// A pipeline task ended without reporting a result
    #[error("Sync worker failed: {reason}")]
    Worker { reason: String },
}

fn display_opt(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<source tree>".to_string())
}

impl SyncError {
    /// Create a path-carrying error from an I/O error, picking a more
    /// specific variant for the common kinds.
    pub fn from_io_error(err: io::Error, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => SyncError::NotFound { path },
            io::ErrorKind::PermissionDenied => SyncError::PermissionDenied { path },
            _ => SyncError::Read { path, source: err },
        }
    }

    pub fn from_walk_error(err: jwalk::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf());
        SyncError::Traversal { path, source: err }
    }

    /// Key of the remote object involved, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            SyncError::Remote { key, .. }
            | SyncError::Transfer { key, .. }
            | SyncError::Timeout { key, .. } => Some(key),
            _ => None,
        }
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
