//! Per-file processing pipeline
//!
//! One dequeued work item flows through:
//! 1. Session checks (stop requested, session already failed)
//! 2. Normalization: joint batch via the coordinator, or single-file
//! 3. Analysis and upload via the TrackUploader
//! 4. Recording the track, marking the file done, removing its temp file
//!
//! Whatever goes wrong is recorded on the file. When the file's terminal
//! update completes the session, finalize runs on this task.

use crate::error::{UploadError, UploadResult};
use crate::models::{FileStatus, ProcessedTrack, SessionStatus, Track, TrackSource, WorkItem};
use crate::services::{
    remove_temp_file, BatchNormalizationCoordinator, FileContext, Finalizer, SessionProgress,
    SessionStore, TrackAggregator,
};
use crate::types::{AudioNormalizer, FileProgress, TrackUploader};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Message recorded on files a stop request prevented from starting
pub const STOPPED_MESSAGE: &str = "Session stopped before processing";

pub struct FilePipeline {
    store: Arc<SessionStore>,
    batch: Arc<BatchNormalizationCoordinator>,
    aggregator: Arc<TrackAggregator>,
    finalizer: Arc<Finalizer>,
    normalizer: Arc<dyn AudioNormalizer>,
    uploader: Arc<dyn TrackUploader>,
}

impl FilePipeline {
    pub fn new(
        store: Arc<SessionStore>,
        batch: Arc<BatchNormalizationCoordinator>,
        aggregator: Arc<TrackAggregator>,
        finalizer: Arc<Finalizer>,
        normalizer: Arc<dyn AudioNormalizer>,
        uploader: Arc<dyn TrackUploader>,
    ) -> Self {
        Self {
            store,
            batch,
            aggregator,
            finalizer,
            normalizer,
            uploader,
        }
    }

    /// Process one work item to a terminal file status
    pub async fn process(&self, item: &WorkItem) {
        let session_id = item.session_id;
        let file_id = item.file_id;

        let ctx = match self.store.file_context(session_id, file_id) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(session_id = %session_id, file_id = %file_id, error = %e, "Skipping work item");
                return;
            }
        };
        if ctx.file_status.is_terminal() {
            debug!(session_id = %session_id, file_id = %file_id, "File already terminal, skipping");
            return;
        }

        debug!(
            session_id = %session_id,
            file_id = %file_id,
            filename = %ctx.source.filename,
            "Processing file"
        );

        let progress = match self.run(ctx).await {
            Ok((track, path)) => {
                self.aggregator.record(session_id, ProcessedTrack { file_id, track });
                let progress = self.store.complete_file(session_id, file_id);
                remove_temp_file(&path).await;
                progress
            }
            Err(e) => self.store.fail_file(session_id, file_id, &failure_message(&e)),
        };

        self.settle(session_id, progress).await;
    }

    /// Record a failure that escaped the pipeline itself
    pub async fn fail(&self, item: &WorkItem, message: &str) {
        let progress = self.store.fail_file(item.session_id, item.file_id, message);
        self.settle(item.session_id, progress).await;
    }

    async fn settle(&self, session_id: Uuid, progress: UploadResult<SessionProgress>) {
        match progress {
            Ok(SessionProgress::ReadyToFinalize) => {
                // Outcome is recorded on the session
                let _ = self.finalizer.finalize(session_id).await;
            }
            Ok(SessionProgress::Settled) => {
                info!(session_id = %session_id, "Failed session settled");
                self.finalizer.forget(session_id);
            }
            Ok(SessionProgress::Outstanding(remaining)) => {
                debug!(session_id = %session_id, remaining, "Files outstanding");
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Session vanished during processing");
            }
        }
    }

    async fn run(&self, ctx: FileContext) -> UploadResult<(Track, PathBuf)> {
        let session_id = ctx.source.session_id;
        let file_id = ctx.source.file_id;

        if ctx.stop_requested {
            return Err(UploadError::FileProcessing(STOPPED_MESSAGE.to_string()));
        }
        if ctx.session_status == SessionStatus::Error {
            return Err(UploadError::FileProcessing(
                ctx.session_error
                    .unwrap_or_else(|| "Upload session failed".to_string()),
            ));
        }

        let mut source = ctx.source;

        if ctx.normalize && ctx.normalize_batch {
            self.batch.ensure_batch_normalization(session_id).await?;
            source.path = self.store.file_context(session_id, file_id)?.source.path;
        } else if ctx.normalize {
            source.path = self
                .normalize_single(session_id, file_id, source.path, ctx.target_lufs)
                .await?;
        }

        self.store.set_file_status(session_id, file_id, FileStatus::Analyzing)?;
        let progress = FileProgress::new(Arc::clone(&self.store), session_id, file_id);
        let mut track = self
            .uploader
            .analyze_and_upload(&source, &progress)
            .await
            .map_err(|e| UploadError::FileProcessing(e.to_string()))?;

        track.title = source.title.clone();
        info!(
            session_id = %session_id,
            file_id = %file_id,
            title = %track.title,
            "Track uploaded"
        );

        let TrackSource { path, .. } = source;
        Ok((track, path))
    }

    async fn normalize_single(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        input: PathBuf,
        target_lufs: f64,
    ) -> UploadResult<PathBuf> {
        self.store.set_file_status(session_id, file_id, FileStatus::Normalizing)?;

        let output = self
            .normalizer
            .normalize(std::slice::from_ref(&input), false, target_lufs)
            .await
            .map_err(|e| UploadError::FileProcessing(format!("Normalization failed: {}", e)))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                UploadError::FileProcessing("Normalization failed: no output produced".to_string())
            })?;

        if output != input {
            self.store.set_file_path(session_id, file_id, output.clone())?;
            remove_temp_file(&input).await;
        }
        Ok(output)
    }
}

/// Text recorded on a failed file
fn failure_message(error: &UploadError) -> String {
    match error {
        UploadError::FileProcessing(message) => message.clone(),
        other => other.to_string(),
    }
}
