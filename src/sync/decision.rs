//! Change detection: local digest vs. the digest stored on the remote object.

/// What the store knows about a key, re-queried on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    Absent,
    /// The digest is `None` when the object was written by another tool.
    Present { stored_digest: Option<String> },
}

/// Why a file has to be uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadReason {
    New,
    MissingDigest,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Unchanged,
    NeedsUpload(UploadReason),
}

impl Decision {
    pub fn needs_upload(&self) -> bool {
        matches!(self, Decision::NeedsUpload(_))
    }
}

/// Classify a file. `local_digest` must use the same encoding (base64) as
/// the stored metadata; comparison is exact.
pub fn decide(local_digest: &str, remote: &RemoteState) -> Decision {
    match remote {
        RemoteState::Absent => Decision::NeedsUpload(UploadReason::New),
        RemoteState::Present { stored_digest: None } => {
            Decision::NeedsUpload(UploadReason::MissingDigest)
        }
        RemoteState::Present { stored_digest: Some(stored) } if stored == local_digest => {
            Decision::Unchanged
        }
        RemoteState::Present { .. } => Decision::NeedsUpload(UploadReason::Modified),
    }
}
