//! Upload session state machine
//!
//! COLLECTING → PROCESSING → FINALIZING → COMPLETED | ERROR
//!
//! A session groups the files uploaded together for one playlist. File
//! registration order defines the final track order.

use super::file_task::{FileMetadata, FileTask};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wkmp_common::events::SessionStatus;

/// How processed files are appended to the playlist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// One new chapter per file
    #[default]
    Chapters,
    /// One new chapter holding every file as a track
    Tracks,
}

/// Options supplied when a session is registered
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOptions {
    #[serde(default)]
    pub upload_mode: UploadMode,
    /// Loudness-normalize files before upload
    #[serde(default)]
    pub normalize: bool,
    /// Normalize all files of the session jointly (requires `normalize`)
    #[serde(default)]
    pub normalize_batch: bool,
    /// Target loudness in LUFS; processor default when absent
    #[serde(default)]
    pub target_lufs: Option<f64>,
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    pub session_id: Uuid,
    pub old_status: SessionStatus,
    pub new_status: SessionStatus,
    pub transitioned_at: DateTime<Utc>,
}

/// Upload session (in-memory state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub session_id: Uuid,
    pub playlist_id: String,
    pub upload_mode: UploadMode,
    pub normalize: bool,
    pub normalize_batch: bool,
    pub target_lufs: f64,

    /// Files in registration order
    pub files: Vec<FileTask>,

    pub status: SessionStatus,
    pub error_message: Option<String>,

    /// Set once the batch normalization claim has gathered this session's
    /// files; later registrations are refused
    pub batch_claimed: bool,

    /// Set when the last playlist update attempt failed (retry allowed)
    pub finalize_failed: bool,

    /// User asked to stop; unstarted files fail instead of processing
    pub stop_requested: bool,

    /// Chapter identifiers returned by the playlist update
    pub new_chapter_ids: Vec<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl UploadSession {
    pub fn new(playlist_id: impl Into<String>, options: SessionOptions, default_target_lufs: f64) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            playlist_id: playlist_id.into(),
            upload_mode: options.upload_mode,
            normalize: options.normalize,
            normalize_batch: options.normalize_batch,
            target_lufs: options.target_lufs.unwrap_or(default_target_lufs),
            files: Vec::new(),
            status: SessionStatus::Collecting,
            error_message: None,
            batch_claimed: false,
            finalize_failed: false,
            stop_requested: false,
            new_chapter_ids: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Batch mode only applies when normalization itself is enabled
    pub fn uses_batch_normalization(&self) -> bool {
        self.normalize && self.normalize_batch
    }

    /// Append a file; its position defines its final track order
    pub fn register_file(&mut self, metadata: FileMetadata) -> Uuid {
        let task = FileTask::new(metadata);
        let file_id = task.file_id;
        self.files.push(task);
        file_id
    }

    pub fn file(&self, file_id: Uuid) -> Option<&FileTask> {
        self.files.iter().find(|f| f.file_id == file_id)
    }

    pub fn file_mut(&mut self, file_id: Uuid) -> Option<&mut FileTask> {
        self.files.iter_mut().find(|f| f.file_id == file_id)
    }

    /// Transition to new status
    pub fn transition_to(&mut self, new_status: SessionStatus) -> StatusTransition {
        let transition = StatusTransition {
            session_id: self.session_id,
            old_status: self.status,
            new_status,
            transitioned_at: Utc::now(),
        };
        self.status = new_status;

        match new_status {
            SessionStatus::Processing if self.started_at.is_none() => {
                self.started_at = Some(transition.transitioned_at);
            }
            SessionStatus::Completed | SessionStatus::Error => {
                self.completed_at = Some(transition.transitioned_at);
            }
            _ => {}
        }

        transition
    }

    /// True once at least one file exists and every file is terminal
    pub fn all_files_terminal(&self) -> bool {
        !self.files.is_empty() && self.files.iter().all(FileTask::is_terminal)
    }

    /// Files not yet in a terminal status
    pub fn outstanding_files(&self) -> usize {
        self.files.iter().filter(|f| !f.is_terminal()).count()
    }

    /// Mean of per-file progress (0.0 - 1.0)
    pub fn progress(&self) -> f64 {
        if self.files.is_empty() {
            return 0.0;
        }
        self.files.iter().map(|f| f.progress).sum::<f64>() / self.files.len() as f64
    }

    /// Workers or the finalizer may still touch this session
    pub fn is_active(&self) -> bool {
        matches!(self.status, SessionStatus::Processing | SessionStatus::Finalizing)
    }

    /// New files are accepted until finalization starts
    pub fn accepts_files(&self) -> bool {
        matches!(self.status, SessionStatus::Collecting | SessionStatus::Processing)
    }
}
