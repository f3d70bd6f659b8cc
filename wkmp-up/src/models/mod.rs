//! Data models for wkmp-up (Playlist Upload processing)
//!
//! - Upload session state machine
//! - Per-file task state and progress
//! - Track results and queue work items
//! - Read-only status snapshots for polling

pub mod file_task;
pub mod snapshot;
pub mod track;
pub mod upload_session;

pub use file_task::{FileMetadata, FileTask};
pub use snapshot::{FileSnapshot, SessionSnapshot};
pub use track::{ProcessedTrack, Track, TrackSource, WorkItem};
pub use upload_session::{SessionOptions, StatusTransition, UploadMode, UploadSession};
pub use wkmp_common::events::{FileStatus, SessionStatus};
