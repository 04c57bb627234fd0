//! Worker pool and completion barrier.
//!
//! One blocking producer walks the source tree and fills a bounded queue
//! whose capacity equals the worker count; a full queue suspends the walk.
//! A fixed pool of async workers drains it. `Pipeline::upload` returns only
//! after the producer and every worker have finished, or at the first error.

use std::path::Path;
use std::sync::Arc;

use humansize::{format_size, DECIMAL};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::store::ObjectStore;
use crate::sync::decision::{decide, Decision};
use crate::sync::oracle;
use crate::sync::report::{Outcome, Reporter, StdoutReporter};
use crate::sync::transfer;
use crate::sync::walker::{self, WorkItem};

/// Result of a completed upload run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub files_scanned: usize,
    /// Keys uploaded (or, in a dry run, that would have been), sorted
    pub uploaded: Vec<String>,
    /// Keys skipped as unchanged, sorted
    pub skipped: Vec<String>,
    pub bytes_uploaded: u64,
    pub dry_run: bool,
}

impl SyncSummary {
    fn merge(&mut self, stats: WorkerStats) {
        self.uploaded.extend(stats.uploaded);
        self.skipped.extend(stats.skipped);
        self.bytes_uploaded += stats.bytes_uploaded;
    }

    fn finish(mut self) -> Self {
        self.uploaded.sort();
        self.skipped.sort();
        self
    }

    pub fn log(&self) {
        let verb = if self.dry_run { "would upload" } else { "uploaded" };
        info!(
            "Sync complete: {} scanned, {} {} ({}), {} unchanged",
            self.files_scanned,
            verb,
            self.uploaded.len(),
            format_size(self.bytes_uploaded, DECIMAL),
            self.skipped.len()
        );
    }
}

/// What one worker did, merged into the summary at the barrier.
#[derive(Debug, Default)]
struct WorkerStats {
    uploaded: Vec<String>,
    skipped: Vec<String>,
    bytes_uploaded: u64,
}

/// Receiving end of the work queue, shared by all workers.
#[derive(Clone)]
struct WorkQueue {
    receiver: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
}

impl WorkQueue {
    fn new(receiver: mpsc::Receiver<WorkItem>) -> Self {
        Self {
            receiver: Arc::new(Mutex::new(receiver)),
        }
    }

    /// Next item, or `None` once the queue is closed and drained.
    async fn next(&self) -> Option<WorkItem> {
        self.receiver.lock().await.recv().await
    }
}

/// Shared, read-only state handed to every worker.
struct WorkerContext {
    store: Arc<dyn ObjectStore>,
    config: SyncConfig,
    reporter: Arc<dyn Reporter>,
}

/// Directory-to-bucket upload pipeline.
pub struct Pipeline {
    context: Arc<WorkerContext>,
}

impl Pipeline {
    pub fn new(store: Arc<dyn ObjectStore>, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            context: Arc::new(WorkerContext {
                store,
                config,
                reporter: Arc::new(StdoutReporter),
            }),
        })
    }

    /// Replace the stdout progress printer.
    pub fn with_reporter(self, reporter: Arc<dyn Reporter>) -> Self {
        let context = WorkerContext {
            store: Arc::clone(&self.context.store),
            config: self.context.config.clone(),
            reporter,
        };
        Self {
            context: Arc::new(context),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.context.config
    }

    /// Upload new and modified files under `source` to the store.
    pub async fn upload(&self, source: &Path) -> Result<SyncSummary> {
        let root = walker::prepare_root(source)?;
        let workers = self.context.config.workers;
        info!(
            source = %root.display(),
            workers,
            dry_run = self.context.config.dry_run,
            "Starting upload"
        );

        let (sender, receiver) = mpsc::channel(workers);
        let mut producer =
            tokio::task::spawn_blocking(move || walker::walk_source(&root, sender));

        let queue = WorkQueue::new(receiver);
        let mut pool = JoinSet::new();
        for id in 0..workers {
            pool.spawn(run_worker(id, queue.clone(), Arc::clone(&self.context)));
        }
        // Only workers hold the receiver; if they all stop, the walk stops too
        drop(queue);

        let mut summary = SyncSummary {
            dry_run: self.context.config.dry_run,
            ..Default::default()
        };
        let mut walk_finished = false;

        loop {
            tokio::select! {
                walked = &mut producer, if !walk_finished => {
                    walk_finished = true;
                    match flatten(walked) {
                        Ok(count) => summary.files_scanned = count,
                        Err(e) => {
                            pool.shutdown().await;
                            return Err(e);
                        }
                    }
                }
                joined = pool.join_next() => match joined {
                    Some(joined) => match flatten(joined) {
                        Ok(stats) => summary.merge(stats),
                        Err(e) => {
                            pool.shutdown().await;
                            if !walk_finished {
                                // Receivers are gone, so the walk ends at its next send
                                let _ = producer.await;
                            }
                            return Err(e);
                        }
                    },
                    None => break,
                },
            }
        }

        // Workers only finish once the sender is dropped, so this is immediate
        if !walk_finished {
            summary.files_scanned = flatten(producer.await)?;
        }

        let summary = summary.finish();
        summary.log();
        Ok(summary)
    }
}

fn flatten<T>(joined: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    match joined {
        Ok(result) => result,
        Err(e) => Err(SyncError::Worker {
            reason: e.to_string(),
        }),
    }
}

/// Idle -> Processing -> Idle until the queue is closed and drained.
async fn run_worker(
    id: usize,
    queue: WorkQueue,
    context: Arc<WorkerContext>,
) -> Result<WorkerStats> {
    let mut stats = WorkerStats::default();

    while let Some(item) = queue.next().await {
        let key = item.destination_key.clone();
        match process_item(&item, &context).await? {
            (Outcome::Uploaded, bytes) => {
                stats.uploaded.push(key);
                stats.bytes_uploaded += bytes;
            }
            (Outcome::Skipped, _) => stats.skipped.push(key),
        }
    }

    debug!(
        worker = id,
        uploaded = stats.uploaded.len(),
        skipped = stats.skipped.len(),
        "worker done"
    );
    Ok(stats)
}

async fn process_item(item: &WorkItem, context: &WorkerContext) -> Result<(Outcome, u64)> {
    let config = &context.config;
    let key = &item.destination_key;
    let local_digest = item.digest.to_base64();

    let remote = oracle::lookup(context.store.as_ref(), key, config.request_timeout).await?;

    let result = match decide(&local_digest, &remote) {
        Decision::Unchanged => (Outcome::Skipped, 0),
        Decision::NeedsUpload(reason) => {
            debug!(key = %key, ?reason, "needs upload");
            let outcome = transfer::upload(
                context.store.as_ref(),
                item,
                config.dry_run,
                config.request_timeout,
            )
            .await?;
            (Outcome::Uploaded, outcome.bytes())
        }
    };

    context
        .reporter
        .report(key, result.0)
        .map_err(|source| SyncError::Output { source })?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let store = Arc::new(MemoryStore::new());
        let result = Pipeline::new(store, SyncConfig::default().with_workers(0));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_single_worker_processes_everything() {
        let dir = TempDir::new().unwrap();
        for i in 0..10 {
            fs::write(dir.path().join(format!("f{i}.txt")), format!("content {i}")).unwrap();
        }

        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(store.clone(), SyncConfig::default().with_workers(1)).unwrap();
        let summary = pipeline.upload(dir.path()).await.unwrap();

        assert_eq!(summary.files_scanned, 10);
        assert_eq!(summary.uploaded.len(), 10);
        assert!(summary.skipped.is_empty());
        assert_eq!(store.put_count(), 10);
        assert_eq!(store.head_count(), 10);
    }

    #[tokio::test]
    async fn test_more_workers_than_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("only.txt"), b"1").unwrap();

        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig::default().with_workers(16);
        let pipeline = Pipeline::new(store.clone(), config).unwrap();
        let summary = pipeline.upload(dir.path()).await.unwrap();

        assert_eq!(summary.uploaded, vec!["only.txt".to_string()]);
        assert_eq!(summary.bytes_uploaded, 1);
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_any_request() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let pipeline = Pipeline::new(store.clone(), SyncConfig::default()).unwrap();

        let err = pipeline.upload(&dir.path().join("missing")).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
        assert_eq!(store.head_count(), 0);
    }
}
