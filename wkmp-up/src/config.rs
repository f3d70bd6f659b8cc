//! Configuration for wkmp-up upload processor
//!
//! TOML bootstrap only; nothing here changes while the processor runs.
//!
//! # Settings Sources Priority
//!
//! 1. `WKMP_UP_WORKERS` environment variable (worker count only)
//! 2. TOML file: explicit path, then `WKMP_UP_CONFIG`, then
//!    `~/.config/wkmp/wkmp-up.toml`
//! 3. Built-in defaults
//!
//! ```toml
//! [processor]
//! workers = 4
//! shutdown_policy = "cancel"
//! retain_completed_sessions = true
//! event_capacity = 256
//! default_target_lufs = -23.0
//!
//! [logging]
//! level = "info"
//! ```

use crate::error::UploadResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use wkmp_common::config::{env_override_usize, load_toml_config, resolve_config_path, LoggingConfig};

/// Module name used for the default config file location
pub const MODULE_NAME: &str = "wkmp-up";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "WKMP_UP_CONFIG";

/// Environment variable overriding the worker count
pub const WORKERS_ENV_VAR: &str = "WKMP_UP_WORKERS";

/// What happens to queued work when the processor shuts down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Process everything already queued before stopping
    Drain,
    /// Finish in-flight files; queued files fail as cancelled
    #[default]
    Cancel,
}

/// Processor settings (`[processor]` table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Number of concurrent file workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub shutdown_policy: ShutdownPolicy,

    /// Keep completed sessions readable until `remove_session`
    #[serde(default = "default_retain_completed")]
    pub retain_completed_sessions: bool,

    /// Event bus buffer per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Loudness target when a session does not supply one
    #[serde(default = "default_target_lufs")]
    pub default_target_lufs: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            shutdown_policy: ShutdownPolicy::default(),
            retain_completed_sessions: default_retain_completed(),
            event_capacity: default_event_capacity(),
            default_target_lufs: default_target_lufs(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_retain_completed() -> bool {
    true
}

fn default_event_capacity() -> usize {
    256
}

fn default_target_lufs() -> f64 {
    -23.0
}

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub processor: ProcessorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TomlConfig {
    /// Resolve, load and validate configuration
    pub fn load(explicit: Option<&Path>) -> UploadResult<Self> {
        let path = resolve_config_path(explicit, CONFIG_ENV_VAR, MODULE_NAME);
        let mut config: TomlConfig = load_toml_config(path.as_deref())?;

        if let Some(workers) = env_override_usize(WORKERS_ENV_VAR)? {
            config.processor.workers = workers;
        }

        config.processor.validate()?;
        Ok(config)
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> UploadResult<()> {
        if self.workers == 0 {
            return Err(config_error("processor.workers must be at least 1"));
        }
        if self.event_capacity == 0 {
            return Err(config_error("processor.event_capacity must be at least 1"));
        }
        if !self.default_target_lufs.is_finite() || self.default_target_lufs >= 0.0 {
            return Err(config_error(&format!(
                "processor.default_target_lufs must be a negative LUFS value, got {}",
                self.default_target_lufs
            )));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> crate::error::UploadError {
    wkmp_common::Error::Config(message.to_string()).into()
}
