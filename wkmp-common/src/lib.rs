//! # WKMP Common Library
//!
//! Shared code for WKMP services:
//! - Error types
//! - Bootstrap configuration loading (TOML)
//! - Tracing initialisation
//! - Event types and the broadcast EventBus
//! - Time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
