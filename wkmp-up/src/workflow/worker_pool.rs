//! Worker pool
//!
//! Fixed number of tokio tasks pulling from the shared WorkQueue. Each item
//! runs on its own spawned task so a panic inside a collaborator is caught at
//! the worker loop and recorded on that file; the worker carries on.
//!
//! Shutdown stops new dequeues through a CancellationToken. In-flight items
//! always finish; queued items are either drained or abandoned per policy.
//! Abandoned files fail like any other file, so their session still
//! finalizes with whatever completed.

use super::file_pipeline::FilePipeline;
use crate::config::ShutdownPolicy;
use crate::models::WorkItem;
use crate::services::WorkQueue;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Message recorded on queued files abandoned at shutdown
pub const CANCELLED_MESSAGE: &str = "cancelled: processor shutting down";

/// State shared by every worker
struct PoolShared {
    queue: Arc<WorkQueue>,
    pipeline: Arc<FilePipeline>,
    /// (session_id, file_id) pairs currently being processed
    in_flight: Mutex<HashSet<(Uuid, Uuid)>>,
    cancel: CancellationToken,
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(queue: Arc<WorkQueue>, pipeline: Arc<FilePipeline>, workers: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                queue,
                pipeline,
                in_flight: Mutex::new(HashSet::new()),
                cancel: CancellationToken::new(),
            }),
            workers,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the workers; a second call is a no-op
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() || self.shared.cancel.is_cancelled() {
            return;
        }
        for worker_id in 0..self.workers {
            let shared = Arc::clone(&self.shared);
            handles.push(tokio::spawn(worker_loop(worker_id, shared)));
        }
        info!(workers = self.workers, "Upload worker pool started");
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.lock().len()
    }

    /// Stop the workers and settle whatever is still queued
    pub async fn shutdown(&self, policy: ShutdownPolicy) {
        let started = !self.handles.lock().is_empty();
        info!(policy = ?policy, queued = self.shared.queue.len(), "Shutting down upload worker pool");

        if policy == ShutdownPolicy::Drain && started {
            self.shared.queue.wait_idle().await;
        }

        self.shared.cancel.cancel();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Upload worker terminated abnormally");
            }
        }

        let abandoned = self.shared.queue.drain();
        for item in &abandoned {
            self.shared.pipeline.fail(item, CANCELLED_MESSAGE).await;
        }
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "Cancelled queued files at shutdown");
        }
        info!("Upload worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

async fn worker_loop(worker_id: usize, shared: Arc<PoolShared>) {
    debug!(worker_id, "Upload worker started");

    loop {
        let item = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            item = shared.queue.pop() => item,
        };

        let key = (item.session_id, item.file_id);
        if !shared.in_flight.lock().insert(key) {
            warn!(
                worker_id,
                session_id = %item.session_id,
                file_id = %item.file_id,
                "File already in flight, skipping duplicate work item"
            );
            shared.queue.task_done();
            continue;
        }

        run_item(worker_id, &shared, item).await;

        shared.in_flight.lock().remove(&key);
        shared.queue.task_done();
    }

    debug!(worker_id, "Upload worker stopped");
}

async fn run_item(worker_id: usize, shared: &Arc<PoolShared>, item: WorkItem) {
    let pipeline = Arc::clone(&shared.pipeline);
    let task_item = item.clone();
    let outcome = tokio::spawn(async move { pipeline.process(&task_item).await }).await;

    if let Err(e) = outcome {
        error!(
            worker_id,
            session_id = %item.session_id,
            file_id = %item.file_id,
            error = %e,
            "File processing task failed"
        );
        shared
            .pipeline
            .fail(&item, &format!("Internal error while processing file: {}", e))
            .await;
    }
}
