//! Bootstrap configuration loading
//!
//! Configuration file resolution follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config file (`~/.config/fhirguard/<module>.toml`)
//! 4. System config file (`/etc/fhirguard/<module>.toml`, Linux only)
//!
//! A missing TOML file is not an error: the caller gets compiled defaults
//! and a warning is logged.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (trace, debug, info, warn, error or a full
    /// `EnvFilter` expression). `RUST_LOG` takes precedence when set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Locate the configuration file for `module_name`
///
/// Returns `None` when no candidate exists; callers fall back to defaults.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    module_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument (returned even if missing so the
    // caller can report it)
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let file_name = format!("{}.toml", module_name);

    // Priority 3: Per-user config directory
    if let Some(user_config) = dirs::config_dir().map(|d| d.join("fhirguard").join(&file_name)) {
        if user_config.exists() {
            return Some(user_config);
        }
    }

    // Priority 4: System-wide config (Linux)
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/fhirguard").join(&file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load a TOML configuration file, falling back to `T::default()`
///
/// - `None` or a non-existent path → defaults (warning logged)
/// - Unreadable or malformed file → `Error::Config`
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No configuration file found, using compiled defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!(
            path = %path.display(),
            "Configuration file does not exist, using compiled defaults"
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// OS-dependent default data directory for a module (database, state)
pub fn default_data_dir(module_name: &str) -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("fhirguard").join(module_name))
        .unwrap_or_else(|| PathBuf::from("./fhirguard_data").join(module_name))
}

/// Read an environment variable and parse it, ignoring unparsable values
///
/// Unparsable values are logged and treated as absent.
pub fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
