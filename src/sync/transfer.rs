//! Uploading one work item.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, SyncError};
use crate::hash::ContentDigest;
use crate::store::{ObjectStore, PutRequest, MD5_METADATA_KEY};
use crate::sync::walker::WorkItem;
use crate::sync::with_timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Uploaded { bytes: u64 },
    /// Dry run: the request was built but never sent
    Simulated { bytes: u64 },
}

impl TransferOutcome {
    pub fn bytes(&self) -> u64 {
        match self {
            TransferOutcome::Uploaded { bytes } | TransferOutcome::Simulated { bytes } => *bytes,
        }
    }
}

/// Build the put for `item` from the bytes read for it.
///
/// The digest is attached twice, both in base64: as the `md5chksum`
/// metadata attribute read back by later runs, and as the Content-MD5
/// integrity value checked by the store.
pub fn build_request(item: &WorkItem, body: Vec<u8>) -> PutRequest {
    let md5 = item.digest.to_base64();
    PutRequest {
        key: item.destination_key.clone(),
        content_length: item.size,
        content_type: item.content_type.clone(),
        metadata: HashMap::from([(MD5_METADATA_KEY.to_string(), md5.clone())]),
        content_md5: md5,
        body,
    }
}

/// Read the file behind `item` and put it under its destination key.
///
/// The bytes read here are re-hashed; if they no longer match the digest
/// taken during traversal the file changed underneath us and the run
/// stops with `ContentChanged`. With `simulate` set everything except the
/// send happens.
///
/// The whole file is held in memory for the single put, so a run peaks at
/// roughly `workers` times the largest file being uploaded.
pub async fn upload(
    store: &dyn ObjectStore,
    item: &WorkItem,
    simulate: bool,
    timeout: Option<Duration>,
) -> Result<TransferOutcome> {
    let body = tokio::fs::read(&item.absolute_path)
        .await
        .map_err(|e| SyncError::from_io_error(e, &item.absolute_path))?;

    if body.len() as u64 != item.size || ContentDigest::of(&body) != item.digest {
        return Err(SyncError::ContentChanged {
            path: item.absolute_path.clone(),
        });
    }

    let bytes = item.size;
    let request = build_request(item, body);

    if simulate {
        debug!(key = %request.key, bytes, "dry run, put not sent");
        return Ok(TransferOutcome::Simulated { bytes });
    }

    let key = request.key.clone();
    with_timeout(&key, "upload", timeout, store.put(request))
        .await?
        .map_err(|source| SyncError::Transfer {
            key: key.clone(),
            source,
        })?;

    debug!(location = %store.describe(&key), bytes, "uploaded");
    Ok(TransferOutcome::Uploaded { bytes })
}
