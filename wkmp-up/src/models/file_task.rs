//! Per-file task state
//!
//! A FileTask belongs to exactly one upload session and is only mutated by the
//! worker that currently owns it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use wkmp_common::events::FileStatus;

/// Caller-supplied description of an uploaded file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Filename as uploaded by the user
    pub filename: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Where the upload was stored on local disk
    pub temp_path: PathBuf,
    /// Title from an upstream metadata provider (e.g. URL imports)
    #[serde(default)]
    pub original_title: Option<String>,
}

impl FileMetadata {
    pub fn new(filename: impl Into<String>, size_bytes: u64, temp_path: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            size_bytes,
            temp_path: temp_path.into(),
            original_title: None,
        }
    }

    pub fn with_original_title(mut self, title: impl Into<String>) -> Self {
        self.original_title = Some(title.into());
        self
    }
}

/// Processing state of one uploaded file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTask {
    pub file_id: Uuid,
    pub filename: String,
    pub size_bytes: u64,
    pub status: FileStatus,
    /// Progress fraction (0.0 - 1.0)
    pub progress: f64,
    pub error: Option<String>,
    /// Current on-disk location; replaced when normalization writes a new file
    pub temp_path: PathBuf,
    /// Set once a work item has been enqueued for this file
    pub queued: bool,
    pub original_title: Option<String>,
    /// Title override set by the user before processing
    pub custom_title: Option<String>,
    pub registered_at: DateTime<Utc>,
}

/// Progress at the start of each stage
fn stage_floor(status: FileStatus) -> f64 {
    match status {
        FileStatus::Pending => 0.0,
        FileStatus::Normalizing => 0.5,
        FileStatus::Analyzing => 0.75,
        FileStatus::Uploading => 0.9,
        FileStatus::Done => 1.0,
        FileStatus::Error => 0.0,
    }
}

/// Progress at which the following stage begins
fn stage_ceiling(status: FileStatus) -> f64 {
    match status {
        FileStatus::Pending => 0.5,
        FileStatus::Normalizing => 0.75,
        FileStatus::Analyzing => 0.9,
        FileStatus::Uploading | FileStatus::Done | FileStatus::Error => 1.0,
    }
}

impl FileTask {
    pub fn new(metadata: FileMetadata) -> Self {
        Self {
            file_id: Uuid::new_v4(),
            filename: metadata.filename,
            size_bytes: metadata.size_bytes,
            status: FileStatus::Pending,
            progress: 0.0,
            error: None,
            temp_path: metadata.temp_path,
            queued: false,
            original_title: metadata.original_title,
            custom_title: None,
            registered_at: Utc::now(),
        }
    }

    /// Move to `status`, resetting progress to the start of that stage
    ///
    /// Entering `error` keeps the progress reached so far.
    pub fn set_status(&mut self, status: FileStatus) {
        self.status = status;
        if status != FileStatus::Error {
            self.progress = stage_floor(status);
        }
    }

    /// Report progress within the current stage (0.0 - 1.0 of the stage)
    ///
    /// Non-finite reports are ignored.
    pub fn set_stage_progress(&mut self, fraction: f64) {
        if self.status.is_terminal() || !fraction.is_finite() {
            return;
        }
        let floor = stage_floor(self.status);
        let ceiling = stage_ceiling(self.status);
        self.progress = floor + (ceiling - floor) * fraction.clamp(0.0, 1.0);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.set_status(FileStatus::Error);
        self.error = Some(message.into());
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Title used for the resulting track
    pub fn display_title(&self) -> String {
        if let Some(title) = self.custom_title.as_ref().filter(|t| !t.trim().is_empty()) {
            return title.clone();
        }
        if let Some(title) = self.original_title.as_ref().filter(|t| !t.trim().is_empty()) {
            return title.clone();
        }
        Path::new(&self.filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.filename.clone())
    }
}
