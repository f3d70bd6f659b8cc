//! Error types for wkmp-up
//!
//! Caller-facing errors (`SessionNotFound`, `FileNotFound`, `InvalidInput`,
//! `Conflict`) are returned from the processor API. The processing outcomes
//! (`FileProcessing`, `BatchNormalization`, `Finalize`) never cross a file or
//! session boundary: workers convert them into a recorded status and message
//! on the owning record, readable through `get_status`.

use thiserror::Error;
use uuid::Uuid;

/// Upload processing error type
#[derive(Debug, Error)]
pub enum UploadError {
    /// Unknown session id
    #[error("Upload session not found: {0}")]
    SessionNotFound(Uuid),

    /// Unknown file id within a session
    #[error("File {file_id} not found in session {session_id}")]
    FileNotFound { session_id: Uuid, file_id: Uuid },

    /// Invalid request
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    /// Operation not allowed in the session's current state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Isolated to one file; siblings unaffected
    #[error("File processing failed: {0}")]
    FileProcessing(String),

    /// Session-fatal normalization failure
    #[error("Normalization failed: {0}")]
    BatchNormalization(String),

    /// Playlist update failed; processed tracks are retained for retry
    #[error("Failed to add tracks to playlist: {0}")]
    Finalize(String),

    /// wkmp-common error
    #[error("Common error: {0}")]
    Common(#[from] wkmp_common::Error),
}

/// Result type for upload processing operations
pub type UploadResult<T> = Result<T, UploadError>;
