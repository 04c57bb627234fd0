//! One-way directory to bucket synchronization.
//!
//! Traversal feeds a bounded queue, a fixed worker pool looks up each key,
//! decides from the stored MD5 whether the file changed, and uploads the
//! ones that did.

pub mod content_type;
pub mod decision;
pub mod oracle;
pub mod pipeline;
pub mod report;
pub mod transfer;
pub mod walker;

pub use decision::{decide, Decision, RemoteState, UploadReason};
pub use pipeline::{Pipeline, SyncSummary};
pub use report::{format_line, Outcome, Reporter, StdoutReporter};
pub use transfer::TransferOutcome;
pub use walker::WorkItem;

use std::future::Future;
use std::time::Duration;

use crate::error::{Result, SyncError};

/// Await `future`, failing with `SyncError::Timeout` if `limit` elapses first.
pub(crate) async fn with_timeout<F: Future>(
    key: &str,
    operation: &'static str,
    limit: Option<Duration>,
    future: F,
) -> Result<F::Output> {
    match limit {
        None => Ok(future.await),
        Some(after) => tokio::time::timeout(after, future)
            .await
            .map_err(|_| SyncError::Timeout {
                key: key.to_string(),
                operation,
                after,
            }),
    }
}
