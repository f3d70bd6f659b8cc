//! Collaborator trait definitions for wkmp-up
//!
//! The processing core delegates all audio and remote-service work to three
//! collaborators:
//! - **AudioNormalizer**: loudness normalization (single file or joint batch)
//! - **TrackUploader**: analysis, transcoding and upload of one file
//! - **PlaylistUpdater**: appending the finished tracks to the target playlist
//!
//! Collaborator failures are opaque (`anyhow::Error`); the core records their
//! message on the owning file or session.

use crate::models::{FileStatus, Track, TrackSource, UploadMode};
use crate::services::SessionStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Loudness normalization collaborator
#[async_trait]
pub trait AudioNormalizer: Send + Sync {
    /// Normalize `inputs` to `target_lufs`
    ///
    /// With `batch == true` all inputs are leveled jointly. Returns one output
    /// path per input, in input order. An output may equal its input.
    async fn normalize(
        &self,
        inputs: &[PathBuf],
        batch: bool,
        target_lufs: f64,
    ) -> anyhow::Result<Vec<PathBuf>>;
}

/// Analysis and upload collaborator
#[async_trait]
pub trait TrackUploader: Send + Sync {
    /// Analyze, transcode and upload one file, returning its track metadata
    ///
    /// `progress` may be used to report the upload stage and intra-stage
    /// progress; reporting is optional.
    async fn analyze_and_upload(
        &self,
        source: &TrackSource,
        progress: &FileProgress,
    ) -> anyhow::Result<Track>;
}

/// Result of a successful playlist update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistUpdateOutcome {
    /// Identifiers of the chapters created by the update
    pub new_chapter_ids: Vec<String>,
}

/// Playlist update collaborator
#[async_trait]
pub trait PlaylistUpdater: Send + Sync {
    /// Append `tracks` (already in final order) to the playlist
    async fn update_playlist(
        &self,
        playlist_id: &str,
        mode: UploadMode,
        tracks: &[Track],
    ) -> anyhow::Result<PlaylistUpdateOutcome>;
}

/// The full set of collaborators the processor works with
#[derive(Clone)]
pub struct Collaborators {
    pub normalizer: Arc<dyn AudioNormalizer>,
    pub uploader: Arc<dyn TrackUploader>,
    pub playlist: Arc<dyn PlaylistUpdater>,
}

/// Progress reporting handle passed to the TrackUploader
///
/// Writes go straight to the owning FileTask; failures to find the task
/// (session removed mid-flight) are ignored.
pub struct FileProgress {
    store: Arc<SessionStore>,
    session_id: Uuid,
    file_id: Uuid,
}

impl FileProgress {
    pub(crate) fn new(store: Arc<SessionStore>, session_id: Uuid, file_id: Uuid) -> Self {
        Self {
            store,
            session_id,
            file_id,
        }
    }

    /// Analysis finished, upload to the remote service started
    pub fn uploading(&self) {
        let _ = self
            .store
            .set_file_status(self.session_id, self.file_id, FileStatus::Uploading);
    }

    /// Progress within the current stage (0.0 - 1.0)
    pub fn report(&self, fraction: f64) {
        let _ = self
            .store
            .set_file_stage_progress(self.session_id, self.file_id, fraction);
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn file_id(&self) -> Uuid {
        self.file_id
    }
}
