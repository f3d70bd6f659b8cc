//! Parallel processing workflow
//!
//! - **FilePipeline**: normalize, analyze/upload and record one file
//! - **WorkerPool**: fixed set of tokio workers draining the WorkQueue

pub mod file_pipeline;
pub mod worker_pool;

pub use file_pipeline::{FilePipeline, STOPPED_MESSAGE};
pub use worker_pool::{WorkerPool, CANCELLED_MESSAGE};
