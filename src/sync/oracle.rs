//! Remote metadata lookups.

use std::time::Duration;

use tracing::debug;

use crate::error::{Result, SyncError};
use crate::store::ObjectStore;
use crate::sync::decision::RemoteState;
use crate::sync::with_timeout;

/// Ask the store what it holds under `key`.
///
/// "Not found" is the `Absent` state. Every other failure is returned as
/// `SyncError::Remote`; it is never mistaken for a new file.
pub async fn lookup(
    store: &dyn ObjectStore,
    key: &str,
    timeout: Option<Duration>,
) -> Result<RemoteState> {
    let meta = with_timeout(key, "metadata lookup", timeout, store.head(key))
        .await?
        .map_err(|source| SyncError::Remote {
            key: key.to_string(),
            source,
        })?;

    let state = match meta {
        None => RemoteState::Absent,
        Some(meta) => RemoteState::Present {
            stored_digest: meta.stored_md5().map(str::to_string),
        },
    };
    debug!(key, ?state, "remote state");
    Ok(state)
}
