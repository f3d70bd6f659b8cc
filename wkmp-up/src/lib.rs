//! wkmp-up: parallel playlist upload processing
//!
//! Accepts batches of uploaded audio files grouped into sessions, processes
//! them concurrently on a fixed worker pool (optional loudness
//! normalization, analysis, upload) and appends the results to the target
//! playlist in upload order once every file has settled.
//!
//! Audio work and remote calls are delegated to the collaborator traits in
//! [`types`].

pub mod config;
pub mod error;
pub mod models;
pub mod processor;
pub mod services;
pub mod types;
pub mod workflow;

pub use config::{ProcessorConfig, ShutdownPolicy, TomlConfig};
pub use error::{UploadError, UploadResult};
pub use models::{
    FileMetadata, FileSnapshot, FileStatus, SessionOptions, SessionSnapshot, SessionStatus, Track,
    TrackSource, UploadMode,
};
pub use processor::UploadProcessor;
pub use services::{assemble_chapters, Chapter, FinalizeReport};
pub use types::{
    AudioNormalizer, Collaborators, FileProgress, PlaylistUpdateOutcome, PlaylistUpdater,
    TrackUploader,
};
pub use wkmp_common::events::UploadEvent;
