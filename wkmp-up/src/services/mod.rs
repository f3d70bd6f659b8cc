//! Processing services for wkmp-up
//!
//! Each service owns one concern and its own lock; none holds a lock across
//! a collaborator call.

pub mod batch_normalizer;
pub mod finalizer;
pub mod playlist;
pub mod session_store;
pub mod temp_files;
pub mod track_aggregator;
pub mod work_queue;

pub use batch_normalizer::BatchNormalizationCoordinator;
pub use finalizer::{FinalizeReport, Finalizer};
pub use playlist::{assemble_chapters, Chapter};
pub use session_store::{BatchClaim, FileContext, FinalizePlan, SessionProgress, SessionStore};
pub use temp_files::remove_temp_file;
pub use track_aggregator::TrackAggregator;
pub use work_queue::WorkQueue;
