//! Session/File state store
//!
//! Owns every UploadSession and FileTask. Each session sits behind its own
//! mutex so unrelated sessions never contend; the outer map lock is only held
//! long enough to look an entry up. No lock here is held across an await.
//!
//! Terminal file updates report, under the session lock, whether they were the
//! transition to "every file terminal". That report is what triggers finalize.

use crate::error::{UploadError, UploadResult};
use crate::models::{
    FileMetadata, FileStatus, FileTask, SessionOptions, SessionSnapshot, SessionStatus,
    StatusTransition, TrackSource, UploadMode, UploadSession, WorkItem,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wkmp_common::events::{EventBus, UploadEvent};

/// Effect of a terminal file update on its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionProgress {
    /// Other files are still outstanding
    Outstanding(usize),
    /// This update completed the session; it is now `finalizing` and the
    /// caller must run finalize
    ReadyToFinalize,
    /// Every file is terminal but the session already failed; only
    /// bookkeeping cleanup remains
    Settled,
}

/// Per-file inputs a worker needs, copied out of the session lock
#[derive(Debug, Clone)]
pub struct FileContext {
    pub session_status: SessionStatus,
    pub file_status: FileStatus,
    pub normalize: bool,
    pub normalize_batch: bool,
    pub target_lufs: f64,
    pub stop_requested: bool,
    /// Message recorded when the session failed
    pub session_error: Option<String>,
    pub source: TrackSource,
}

/// Files gathered for joint normalization
#[derive(Debug, Clone)]
pub struct BatchClaim {
    pub target_lufs: f64,
    /// (file_id, current path) in registration order
    pub files: Vec<(Uuid, PathBuf)>,
}

/// Registration-ordered view used by finalize
#[derive(Debug, Clone)]
pub struct FinalizePlan {
    pub playlist_id: String,
    pub upload_mode: UploadMode,
    /// (file_id, terminal status) in registration order
    pub files: Vec<(Uuid, FileStatus)>,
}

/// In-memory session/file state store
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<UploadSession>>>>,
    event_bus: EventBus,
    default_target_lufs: f64,
}

impl SessionStore {
    pub fn new(event_bus: EventBus, default_target_lufs: f64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            event_bus,
            default_target_lufs,
        }
    }

    fn entry(&self, session_id: Uuid) -> UploadResult<Arc<Mutex<UploadSession>>> {
        self.sessions
            .read()
            .get(&session_id)
            .cloned()
            .ok_or(UploadError::SessionNotFound(session_id))
    }

    fn emit_file(&self, session_id: Uuid, task: &FileTask) {
        self.event_bus.emit_lossy(UploadEvent::FileStatusChanged {
            session_id,
            file_id: task.file_id,
            status: task.status,
            progress: task.progress,
            error: task.error.clone(),
            timestamp: Utc::now(),
        });
    }

    fn emit_transition(&self, transition: &StatusTransition) {
        if transition.old_status == transition.new_status {
            return;
        }
        info!(
            session_id = %transition.session_id,
            old_status = %transition.old_status,
            new_status = %transition.new_status,
            "Session status changed"
        );
        self.event_bus.emit_lossy(UploadEvent::SessionStatusChanged {
            session_id: transition.session_id,
            old_status: transition.old_status,
            new_status: transition.new_status,
            timestamp: transition.transitioned_at,
        });
    }

    pub fn contains(&self, session_id: Uuid) -> bool {
        self.sessions.read().contains_key(&session_id)
    }

    pub fn create_session(&self, playlist_id: &str, options: SessionOptions) -> Uuid {
        let session = UploadSession::new(playlist_id, options, self.default_target_lufs);
        let session_id = session.session_id;
        self.sessions
            .write()
            .insert(session_id, Arc::new(Mutex::new(session)));
        info!(session_id = %session_id, playlist_id, "Created upload session");
        session_id
    }

    /// Register a file; refused once finalization started or once the batch
    /// normalization claim has gathered the session's files
    pub fn add_file(&self, session_id: Uuid, metadata: FileMetadata) -> UploadResult<Uuid> {
        if metadata.filename.trim().is_empty() {
            return Err(UploadError::InvalidInput("filename must not be empty".to_string()));
        }

        let entry = self.entry(session_id)?;
        let mut session = entry.lock();

        if !session.accepts_files() {
            return Err(UploadError::Conflict(format!(
                "session {} is {} and no longer accepts files",
                session_id, session.status
            )));
        }
        if session.uses_batch_normalization() && session.batch_claimed {
            return Err(UploadError::Conflict(format!(
                "batch normalization already started for session {}",
                session_id
            )));
        }

        let filename = metadata.filename.clone();
        let size_bytes = metadata.size_bytes;
        let file_id = session.register_file(metadata);
        info!(
            session_id = %session_id,
            file_id = %file_id,
            filename = %filename,
            size_bytes,
            "Registered file"
        );
        Ok(file_id)
    }

    /// Mark every not-yet-queued pending file as queued and return its work item
    ///
    /// Moves the session from `collecting` to `processing`. Calling again with
    /// no new files returns nothing.
    pub fn take_unqueued(&self, session_id: Uuid) -> UploadResult<Vec<WorkItem>> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock();

        if !session.accepts_files() {
            return Err(UploadError::Conflict(format!(
                "session {} is {} and cannot be processed",
                session_id, session.status
            )));
        }

        let playlist_id = session.playlist_id.clone();
        let items: Vec<WorkItem> = session
            .files
            .iter_mut()
            .filter(|f| !f.queued && !f.is_terminal())
            .map(|f| {
                f.queued = true;
                WorkItem {
                    session_id,
                    file_id: f.file_id,
                    playlist_id: playlist_id.clone(),
                }
            })
            .collect();

        if !items.is_empty() && session.status == SessionStatus::Collecting {
            let transition = session.transition_to(SessionStatus::Processing);
            self.emit_transition(&transition);
        }

        Ok(items)
    }

    pub fn file_context(&self, session_id: Uuid, file_id: Uuid) -> UploadResult<FileContext> {
        let entry = self.entry(session_id)?;
        let session = entry.lock();
        let file = session
            .file(file_id)
            .ok_or(UploadError::FileNotFound { session_id, file_id })?;

        Ok(FileContext {
            session_status: session.status,
            file_status: file.status,
            normalize: session.normalize,
            normalize_batch: session.normalize_batch,
            target_lufs: session.target_lufs,
            stop_requested: session.stop_requested,
            session_error: session.error_message.clone(),
            source: TrackSource {
                session_id,
                file_id,
                filename: file.filename.clone(),
                path: file.temp_path.clone(),
                title: file.display_title(),
                size_bytes: file.size_bytes,
            },
        })
    }

    fn with_file<R>(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        f: impl FnOnce(&mut FileTask) -> R,
    ) -> UploadResult<R> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock();
        let task = session
            .file_mut(file_id)
            .ok_or(UploadError::FileNotFound { session_id, file_id })?;
        let result = f(&mut *task);
        self.emit_file(session_id, task);
        Ok(result)
    }

    /// Move a non-terminal file to a new in-progress status
    pub fn set_file_status(&self, session_id: Uuid, file_id: Uuid, status: FileStatus) -> UploadResult<()> {
        self.with_file(session_id, file_id, |task| {
            if !task.is_terminal() {
                debug!(session_id = %session_id, file_id = %file_id, status = %status, "File status");
                task.set_status(status);
            }
        })
    }

    pub fn set_file_stage_progress(&self, session_id: Uuid, file_id: Uuid, fraction: f64) -> UploadResult<()> {
        self.with_file(session_id, file_id, |task| task.set_stage_progress(fraction))
    }

    /// Point a file at a new on-disk location, returning the previous one
    pub fn set_file_path(&self, session_id: Uuid, file_id: Uuid, path: PathBuf) -> UploadResult<PathBuf> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock();
        let task = session
            .file_mut(file_id)
            .ok_or(UploadError::FileNotFound { session_id, file_id })?;
        Ok(std::mem::replace(&mut task.temp_path, path))
    }

    pub fn set_file_title(&self, session_id: Uuid, file_id: Uuid, title: &str) -> UploadResult<()> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock();
        let task = session
            .file_mut(file_id)
            .ok_or(UploadError::FileNotFound { session_id, file_id })?;
        if task.status != FileStatus::Pending {
            return Err(UploadError::Conflict(format!(
                "file {} is already {}",
                file_id, task.status
            )));
        }
        task.custom_title = Some(title.to_string());
        Ok(())
    }

    pub fn complete_file(&self, session_id: Uuid, file_id: Uuid) -> UploadResult<SessionProgress> {
        self.finish_file(session_id, file_id, None)
    }

    pub fn fail_file(&self, session_id: Uuid, file_id: Uuid, message: &str) -> UploadResult<SessionProgress> {
        self.finish_file(session_id, file_id, Some(message))
    }

    fn finish_file(
        &self,
        session_id: Uuid,
        file_id: Uuid,
        error: Option<&str>,
    ) -> UploadResult<SessionProgress> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock();
        let task = session
            .file_mut(file_id)
            .ok_or(UploadError::FileNotFound { session_id, file_id })?;

        if task.is_terminal() {
            // Already settled by someone else; never re-trigger finalize
            return Ok(SessionProgress::Outstanding(session.outstanding_files()));
        }

        match error {
            Some(message) => {
                warn!(session_id = %session_id, file_id = %file_id, error = %message, "File failed");
                task.fail(message);
            }
            None => {
                task.set_status(FileStatus::Done);
                info!(session_id = %session_id, file_id = %file_id, "File processing complete");
            }
        }
        let task = task.clone();
        self.emit_file(session_id, &task);

        Ok(self.settle(&mut session))
    }

    /// Decide what the session needs now that a file became terminal
    fn settle(&self, session: &mut UploadSession) -> SessionProgress {
        if !session.all_files_terminal() {
            return SessionProgress::Outstanding(session.outstanding_files());
        }
        match session.status {
            SessionStatus::Processing => {
                let transition = session.transition_to(SessionStatus::Finalizing);
                self.emit_transition(&transition);
                SessionProgress::ReadyToFinalize
            }
            _ => SessionProgress::Settled,
        }
    }

    /// Gather the session's files for joint normalization
    ///
    /// Marks the claim on the session (refusing later registrations) and moves
    /// every non-terminal file to `normalizing`.
    pub fn claim_batch_files(&self, session_id: Uuid) -> UploadResult<BatchClaim> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock();
        session.batch_claimed = true;

        let mut files = Vec::new();
        for task in session.files.iter_mut().filter(|f| !f.is_terminal()) {
            task.set_status(FileStatus::Normalizing);
            files.push((task.file_id, task.temp_path.clone()));
        }
        for task in session.files.iter().filter(|f| f.status == FileStatus::Normalizing) {
            self.emit_file(session_id, task);
        }
        Ok(BatchClaim {
            target_lufs: session.target_lufs,
            files,
        })
    }

    /// Record a session-fatal failure
    ///
    /// Files never handed to the queue fail with the same message; queued
    /// files are failed by the worker that picks them up.
    pub fn fail_session(&self, session_id: Uuid, message: &str) -> UploadResult<()> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock();
        if session.status == SessionStatus::Error {
            return Ok(());
        }
        warn!(session_id = %session_id, error = %message, "Session failed");
        session.error_message = Some(message.to_string());

        let mut failed = Vec::new();
        for task in session.files.iter_mut().filter(|f| !f.queued && !f.is_terminal()) {
            task.fail(message);
            failed.push(task.clone());
        }
        for task in &failed {
            self.emit_file(session_id, task);
        }

        let transition = session.transition_to(SessionStatus::Error);
        self.emit_transition(&transition);
        Ok(())
    }

    pub fn finalize_plan(&self, session_id: Uuid) -> UploadResult<FinalizePlan> {
        let entry = self.entry(session_id)?;
        let session = entry.lock();
        Ok(FinalizePlan {
            playlist_id: session.playlist_id.clone(),
            upload_mode: session.upload_mode,
            files: session.files.iter().map(|f| (f.file_id, f.status)).collect(),
        })
    }

    pub fn mark_finalized(&self, session_id: Uuid, new_chapter_ids: Vec<String>) -> UploadResult<()> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock();
        session.new_chapter_ids = new_chapter_ids;
        session.finalize_failed = false;
        session.error_message = None;
        let transition = session.transition_to(SessionStatus::Completed);
        self.emit_transition(&transition);
        Ok(())
    }

    pub fn mark_finalize_failed(&self, session_id: Uuid, message: &str) -> UploadResult<()> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock();
        session.finalize_failed = true;
        session.error_message = Some(message.to_string());
        let transition = session.transition_to(SessionStatus::Error);
        self.emit_transition(&transition);
        Ok(())
    }

    /// Move a session whose playlist update failed back to `finalizing`
    pub fn begin_finalize_retry(&self, session_id: Uuid) -> UploadResult<()> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock();
        if session.status != SessionStatus::Error || !session.finalize_failed {
            return Err(UploadError::Conflict(format!(
                "session {} is {} and has no failed playlist update to retry",
                session_id, session.status
            )));
        }
        let transition = session.transition_to(SessionStatus::Finalizing);
        self.emit_transition(&transition);
        Ok(())
    }

    /// Ask a processing session to stop
    ///
    /// Files a worker has not started yet fail with a stop message; files
    /// that were never queued fail immediately. In-flight files finish.
    pub fn request_stop(&self, session_id: Uuid) -> UploadResult<SessionProgress> {
        let entry = self.entry(session_id)?;
        let mut session = entry.lock();
        if session.status != SessionStatus::Processing {
            return Err(UploadError::Conflict(format!(
                "session {} is {} and cannot be stopped",
                session_id, session.status
            )));
        }
        session.stop_requested = true;
        info!(session_id = %session_id, "Marked session for stopping");

        let mut failed = Vec::new();
        for task in session.files.iter_mut().filter(|f| !f.queued && !f.is_terminal()) {
            task.fail("Session stopped before processing");
            failed.push(task.clone());
        }
        for task in &failed {
            self.emit_file(session_id, task);
        }

        if failed.is_empty() {
            return Ok(SessionProgress::Outstanding(session.outstanding_files()));
        }
        Ok(self.settle(&mut session))
    }

    pub fn snapshot(&self, session_id: Uuid) -> UploadResult<SessionSnapshot> {
        let entry = self.entry(session_id)?;
        let session = entry.lock();
        Ok(SessionSnapshot::from(&*session))
    }

    /// Sessions targeting a playlist, oldest first
    pub fn playlist_sessions(&self, playlist_id: &str, include_done: bool) -> Vec<SessionSnapshot> {
        let entries: Vec<_> = self.sessions.read().values().cloned().collect();
        let mut snapshots: Vec<SessionSnapshot> = entries
            .iter()
            .map(|entry| SessionSnapshot::from(&*entry.lock()))
            .filter(|s| s.playlist_id == playlist_id)
            .filter(|s| include_done || s.status != SessionStatus::Completed)
            .collect();
        snapshots.sort_by_key(|s| s.created_at);
        snapshots
    }

    /// Remove a session that no worker or finalizer can still touch
    pub fn remove(&self, session_id: Uuid) -> UploadResult<UploadSession> {
        let mut sessions = self.sessions.write();
        let entry = sessions
            .get(&session_id)
            .cloned()
            .ok_or(UploadError::SessionNotFound(session_id))?;
        let session = entry.lock();
        if session.is_active() {
            return Err(UploadError::Conflict(format!(
                "session {} is {} and cannot be removed",
                session_id, session.status
            )));
        }
        let removed = session.clone();
        drop(session);
        sessions.remove(&session_id);
        info!(session_id = %session_id, "Removed upload session");
        Ok(removed)
    }
}
