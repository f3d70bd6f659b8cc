//! Read-only status views for progress polling

use super::upload_session::{UploadMode, UploadSession};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use wkmp_common::events::{FileStatus, SessionStatus};
use wkmp_common::time;

/// Status of one file as seen by a poller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSnapshot {
    pub file_id: Uuid,
    pub filename: String,
    pub size_bytes: u64,
    pub status: FileStatus,
    pub progress: f64,
    pub error: Option<String>,
}

/// Status of a whole session as seen by a poller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub playlist_id: String,
    pub status: SessionStatus,
    pub upload_mode: UploadMode,
    pub normalize: bool,
    pub normalize_batch: bool,
    /// Mean file progress (0.0 - 1.0)
    pub progress: f64,
    pub error_message: Option<String>,
    pub new_chapter_ids: Vec<String>,
    /// Files in registration order
    pub files: Vec<FileSnapshot>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds since processing started (frozen once the session ends)
    pub elapsed_seconds: Option<u64>,
}

impl SessionSnapshot {
    /// Files that ended in `error`, with their messages
    pub fn failed_files(&self) -> impl Iterator<Item = &FileSnapshot> {
        self.files.iter().filter(|f| f.status == FileStatus::Error)
    }

    pub fn file(&self, file_id: Uuid) -> Option<&FileSnapshot> {
        self.files.iter().find(|f| f.file_id == file_id)
    }
}

impl From<&UploadSession> for SessionSnapshot {
    fn from(session: &UploadSession) -> Self {
        Self {
            session_id: session.session_id,
            playlist_id: session.playlist_id.clone(),
            status: session.status,
            upload_mode: session.upload_mode,
            normalize: session.normalize,
            normalize_batch: session.normalize_batch,
            progress: session.progress(),
            error_message: session.error_message.clone(),
            new_chapter_ids: session.new_chapter_ids.clone(),
            files: session
                .files
                .iter()
                .map(|f| FileSnapshot {
                    file_id: f.file_id,
                    filename: f.filename.clone(),
                    size_bytes: f.size_bytes,
                    status: f.status,
                    progress: f.progress,
                    error: f.error.clone(),
                })
                .collect(),
            created_at: session.created_at,
            started_at: session.started_at,
            completed_at: session.completed_at,
            elapsed_seconds: session
                .started_at
                .map(|start| time::elapsed_seconds(start, session.completed_at.unwrap_or_else(time::now))),
        }
    }
}
