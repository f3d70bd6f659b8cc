//! Session finalization
//!
//! Runs once per session after every file is terminal: orders the processed
//! tracks by registration, issues one playlist update, and records the
//! outcome. A failed update leaves the session in `error` with its tracks
//! still aggregated so `retry` can re-issue the update without reprocessing.

use super::batch_normalizer::BatchNormalizationCoordinator;
use super::session_store::SessionStore;
use super::temp_files::remove_temp_file;
use super::track_aggregator::TrackAggregator;
use crate::error::{UploadError, UploadResult};
use crate::models::{FileStatus, Track, UploadMode};
use crate::types::PlaylistUpdater;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;
use wkmp_common::events::{EventBus, UploadEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalizeState {
    Running,
    Failed,
    Done,
}

/// Outcome of a finalize attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeReport {
    pub tracks_added: usize,
    pub files_failed: usize,
    pub new_chapter_ids: Vec<String>,
}

struct OrderedTracks {
    playlist_id: String,
    mode: UploadMode,
    tracks: Vec<Track>,
    files_failed: usize,
}

pub struct Finalizer {
    store: Arc<SessionStore>,
    aggregator: Arc<TrackAggregator>,
    batch: Arc<BatchNormalizationCoordinator>,
    playlist: Arc<dyn PlaylistUpdater>,
    event_bus: EventBus,
    retain_completed_sessions: bool,
    guard: Mutex<HashMap<Uuid, FinalizeState>>,
}

impl Finalizer {
    pub fn new(
        store: Arc<SessionStore>,
        aggregator: Arc<TrackAggregator>,
        batch: Arc<BatchNormalizationCoordinator>,
        playlist: Arc<dyn PlaylistUpdater>,
        event_bus: EventBus,
        retain_completed_sessions: bool,
    ) -> Self {
        Self {
            store,
            aggregator,
            batch,
            playlist,
            event_bus,
            retain_completed_sessions,
            guard: Mutex::new(HashMap::new()),
        }
    }

    /// Take the per-session finalize claim
    ///
    /// A first finalize needs no prior attempt; a retry needs a failed one.
    fn claim(&self, session_id: Uuid, retry: bool) -> UploadResult<()> {
        let mut guard = self.guard.lock();
        let allowed = match guard.get(&session_id) {
            None => !retry,
            Some(FinalizeState::Failed) => retry,
            Some(_) => false,
        };
        if !allowed {
            return Err(UploadError::Conflict(format!(
                "session {} cannot {} finalize now",
                session_id,
                if retry { "retry" } else { "start" }
            )));
        }
        guard.insert(session_id, FinalizeState::Running);
        Ok(())
    }

    fn release(&self, session_id: Uuid, state: FinalizeState) {
        self.guard.lock().insert(session_id, state);
    }

    /// Finalize a session whose last file just became terminal
    pub async fn finalize(&self, session_id: Uuid) -> UploadResult<FinalizeReport> {
        self.claim(session_id, false)?;
        self.run(session_id).await
    }

    /// Re-issue a failed playlist update using the retained tracks
    pub async fn retry(&self, session_id: Uuid) -> UploadResult<FinalizeReport> {
        self.claim(session_id, true)?;
        if let Err(e) = self.store.begin_finalize_retry(session_id) {
            self.release(session_id, FinalizeState::Failed);
            return Err(e);
        }
        info!(session_id = %session_id, "Retrying playlist update");
        self.run(session_id).await
    }

    /// Build the registration-ordered track list, skipping failed files
    fn ordered_tracks(&self, session_id: Uuid) -> UploadResult<OrderedTracks> {
        let plan = self.store.finalize_plan(session_id)?;
        let mut recorded = self.aggregator.snapshot(session_id);

        let mut tracks = Vec::with_capacity(recorded.len());
        let mut files_failed = 0;
        for (file_id, status) in &plan.files {
            if *status != FileStatus::Done {
                files_failed += 1;
                continue;
            }
            match recorded.remove(file_id) {
                Some(track) => tracks.push(Track {
                    key: tracks.len().to_string(),
                    ..track
                }),
                None => {
                    warn!(session_id = %session_id, file_id = %file_id, "Done file has no recorded track");
                    files_failed += 1;
                }
            }
        }
        Ok(OrderedTracks {
            playlist_id: plan.playlist_id,
            mode: plan.upload_mode,
            tracks,
            files_failed,
        })
    }

    async fn run(&self, session_id: Uuid) -> UploadResult<FinalizeReport> {
        let OrderedTracks {
            playlist_id,
            mode,
            tracks,
            files_failed,
        } = match self.ordered_tracks(session_id) {
            Ok(parts) => parts,
            Err(e) => {
                self.release(session_id, FinalizeState::Failed);
                return Err(e);
            }
        };

        info!(
            session_id = %session_id,
            playlist_id = %playlist_id,
            tracks = tracks.len(),
            files_failed,
            "Finalizing upload session"
        );

        let update = if tracks.is_empty() {
            info!(session_id = %session_id, "No tracks to add, skipping playlist update");
            Ok(Vec::new())
        } else {
            // A panicking updater surfaces as a JoinError and leaves the session retryable
            let playlist = Arc::clone(&self.playlist);
            let target = playlist_id.clone();
            let ordered = tracks.clone();
            match tokio::spawn(async move { playlist.update_playlist(&target, mode, &ordered).await }).await {
                Ok(result) => result.map(|outcome| outcome.new_chapter_ids),
                Err(e) => Err(anyhow::anyhow!("playlist update task failed: {}", e)),
            }
        };

        match update {
            Ok(new_chapter_ids) => {
                self.store.mark_finalized(session_id, new_chapter_ids.clone())?;
                self.release(session_id, FinalizeState::Done);
                self.emit_finalized(session_id, &playlist_id, tracks.len(), files_failed, true);
                self.aggregator.clear(session_id);
                self.batch.forget(session_id);

                info!(
                    session_id = %session_id,
                    tracks_added = tracks.len(),
                    new_chapters = new_chapter_ids.len(),
                    "Upload session completed"
                );

                if !self.retain_completed_sessions {
                    let removed = self.store.remove(session_id)?;
                    self.guard.lock().remove(&session_id);
                    for file in &removed.files {
                        remove_temp_file(&file.temp_path).await;
                    }
                }

                Ok(FinalizeReport {
                    tracks_added: tracks.len(),
                    files_failed,
                    new_chapter_ids,
                })
            }
            Err(e) => {
                let failure = UploadError::Finalize(e.to_string());
                error!(session_id = %session_id, error = %failure, "Playlist update failed");
                self.store.mark_finalize_failed(session_id, &failure.to_string())?;
                self.release(session_id, FinalizeState::Failed);
                self.emit_finalized(session_id, &playlist_id, tracks.len(), files_failed, false);
                Err(failure)
            }
        }
    }

    fn emit_finalized(&self, session_id: Uuid, playlist_id: &str, tracks_added: usize, files_failed: usize, success: bool) {
        self.event_bus.emit_lossy(UploadEvent::SessionFinalized {
            session_id,
            playlist_id: playlist_id.to_string(),
            tracks_added,
            files_failed,
            success,
            timestamp: Utc::now(),
        });
    }

    /// Drop bookkeeping for a session that will never finalize again
    pub fn forget(&self, session_id: Uuid) {
        self.guard.lock().remove(&session_id);
        self.aggregator.clear(session_id);
        self.batch.forget(session_id);
    }
}
