//! Upload processor facade
//!
//! Wires the session store, work queue, batch coordinator, aggregator,
//! finalizer and worker pool together and exposes the operations an upload
//! front end needs. Constructed once and shared; there is no global state.

use crate::config::ProcessorConfig;
use crate::error::{UploadError, UploadResult};
use crate::models::{FileMetadata, SessionOptions, SessionSnapshot};
use crate::services::{
    remove_temp_file, BatchNormalizationCoordinator, FinalizeReport, Finalizer, SessionProgress,
    SessionStore, TrackAggregator, WorkQueue,
};
use crate::types::Collaborators;
use crate::workflow::{FilePipeline, WorkerPool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use uuid::Uuid;
use wkmp_common::events::{EventBus, UploadEvent};

pub struct UploadProcessor {
    config: ProcessorConfig,
    event_bus: EventBus,
    store: Arc<SessionStore>,
    queue: Arc<WorkQueue>,
    finalizer: Arc<Finalizer>,
    pool: WorkerPool,
    shutting_down: AtomicBool,
}

impl UploadProcessor {
    /// Build a processor; workers are not running until `start`
    pub fn new(config: ProcessorConfig, collaborators: Collaborators) -> UploadResult<Self> {
        config.validate()?;

        let event_bus = EventBus::new(config.event_capacity);
        let store = Arc::new(SessionStore::new(event_bus.clone(), config.default_target_lufs));
        let queue = Arc::new(WorkQueue::new());
        let aggregator = Arc::new(TrackAggregator::new());
        let batch = Arc::new(BatchNormalizationCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&collaborators.normalizer),
        ));
        let finalizer = Arc::new(Finalizer::new(
            Arc::clone(&store),
            Arc::clone(&aggregator),
            Arc::clone(&batch),
            Arc::clone(&collaborators.playlist),
            event_bus.clone(),
            config.retain_completed_sessions,
        ));
        let pipeline = Arc::new(FilePipeline::new(
            Arc::clone(&store),
            batch,
            aggregator,
            Arc::clone(&finalizer),
            collaborators.normalizer,
            collaborators.uploader,
        ));
        let pool = WorkerPool::new(Arc::clone(&queue), pipeline, config.workers);

        Ok(Self {
            config,
            event_bus,
            store,
            queue,
            finalizer,
            pool,
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Spawn the worker pool (must be inside a tokio runtime)
    pub fn start(&self) {
        self.pool.start();
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn register_session(&self, playlist_id: &str, options: SessionOptions) -> UploadResult<Uuid> {
        if playlist_id.trim().is_empty() {
            return Err(UploadError::InvalidInput("playlist_id must not be empty".to_string()));
        }
        if let Some(lufs) = options.target_lufs {
            if !lufs.is_finite() {
                return Err(UploadError::InvalidInput(format!("invalid target LUFS {}", lufs)));
            }
        }
        Ok(self.store.create_session(playlist_id, options))
    }

    pub fn add_file(&self, session_id: Uuid, metadata: FileMetadata) -> UploadResult<Uuid> {
        self.store.add_file(session_id, metadata)
    }

    /// Queue every registered file not yet queued; returns how many were added
    pub fn enqueue_processing(&self, session_id: Uuid) -> UploadResult<usize> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(UploadError::Conflict("processor is shutting down".to_string()));
        }
        let items = self.store.take_unqueued(session_id)?;
        let count = self.queue.push_all(items);
        info!(session_id = %session_id, queued = count, "Enqueued files for processing");
        Ok(count)
    }

    pub fn get_status(&self, session_id: Uuid) -> UploadResult<SessionSnapshot> {
        self.store.snapshot(session_id)
    }

    /// Stop a processing session
    ///
    /// Files not yet started fail; files already in progress finish. The
    /// session still finalizes with whatever completed.
    pub async fn stop_session(&self, session_id: Uuid) -> UploadResult<()> {
        if self.store.request_stop(session_id)? == SessionProgress::ReadyToFinalize {
            // Outcome is recorded on the session
            let _ = self.finalizer.finalize(session_id).await;
        }
        Ok(())
    }

    /// Re-issue a failed playlist update without reprocessing any file
    pub async fn retry_finalize(&self, session_id: Uuid) -> UploadResult<FinalizeReport> {
        self.finalizer.retry(session_id).await
    }

    /// Drop a settled session and delete any temp files it still references
    pub async fn remove_session(&self, session_id: Uuid) -> UploadResult<()> {
        let session = self.store.remove(session_id)?;
        self.finalizer.forget(session_id);
        for file in &session.files {
            remove_temp_file(&file.temp_path).await;
        }
        Ok(())
    }

    pub fn playlist_sessions(&self, playlist_id: &str, include_done: bool) -> Vec<SessionSnapshot> {
        self.store.playlist_sessions(playlist_id, include_done)
    }

    /// Override the track title of a file that has not started processing
    pub fn set_file_title(&self, session_id: Uuid, file_id: Uuid, title: &str) -> UploadResult<()> {
        if title.trim().is_empty() {
            return Err(UploadError::InvalidInput("title must not be empty".to_string()));
        }
        self.store.set_file_title(session_id, file_id, title.trim())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_bus.subscribe()
    }

    /// Resolve once every queued file has been processed
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    /// Stop accepting work and shut the worker pool down per the configured policy
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            warn!("Upload processor shutdown already requested");
            return;
        }
        self.pool.shutdown(self.config.shutdown_policy).await;
    }
}
