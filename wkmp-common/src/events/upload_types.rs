//! Upload processing type definitions
//!
//! Status enums shared between the upload processor and anything observing
//! its events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Processing status of a single uploaded file
///
/// `pending → [normalizing] → analyzing → uploading → done`, any state may
/// move to `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Registered, not yet picked up by a worker
    Pending,
    /// Loudness normalization in progress (single-file or batch)
    Normalizing,
    /// Analysis in progress
    Analyzing,
    /// Transcoding/upload to the remote service in progress
    Uploading,
    /// Track produced successfully
    Done,
    /// Failed; see the file's error message
    Error,
}

impl FileStatus {
    /// `done` and `error` are terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, FileStatus::Done | FileStatus::Error)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Pending => "pending",
            FileStatus::Normalizing => "normalizing",
            FileStatus::Analyzing => "analyzing",
            FileStatus::Uploading => "uploading",
            FileStatus::Done => "done",
            FileStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Overall status of an upload session
///
/// `collecting → processing → finalizing → {completed | error}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Accepting files, nothing queued yet
    Collecting,
    /// Files queued or being processed by workers
    Processing,
    /// All files terminal, playlist update in progress
    Finalizing,
    /// Playlist updated (individual files may still have failed)
    Completed,
    /// Batch normalization or playlist update failed
    Error,
}

impl SessionStatus {
    /// `completed` and `error` are terminal
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Collecting => "collecting",
            SessionStatus::Processing => "processing",
            SessionStatus::Finalizing => "finalizing",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
        };
        f.write_str(s)
    }
}
