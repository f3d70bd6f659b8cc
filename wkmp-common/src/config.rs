//! Bootstrap configuration loading
//!
//! Each WKMP service reads a small TOML bootstrap file. Resolution priority:
//! 1. Explicit path (command line / caller)
//! 2. Environment variable naming a file
//! 3. `<config_dir>/wkmp/<module>.toml` if it exists
//! 4. Compiled defaults
//!
//! A missing file never aborts startup: a warning is logged and defaults apply.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr only if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Per-user default location of a module's bootstrap file
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("wkmp").join(format!("{}.toml", module_name)))
}

/// Resolve which bootstrap file (if any) should be read
pub fn resolve_config_path(
    explicit: Option<&Path>,
    env_var_name: &str,
    module_name: &str,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_path(module_name).filter(|p| p.exists())
}

/// Load a TOML bootstrap file, falling back to `T::default()` when absent
pub fn load_toml_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No configuration file found, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            "Configuration file {} does not exist, using compiled defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Parse an integer override from an environment variable
///
/// Unset or empty variables yield `Ok(None)`; unparseable values are a
/// configuration error rather than being silently ignored.
pub fn env_override_usize(env_var_name: &str) -> Result<Option<usize>> {
    match std::env::var(env_var_name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?} is not a valid count: {}", env_var_name, value, e))),
        _ => Ok(None),
    }
}
