//! Home directory resolution for hostlink
//!
//! Every file hostlink persists (the port registry, the global config file)
//! lives under a single home directory so that tests and side-by-side
//! deployments can isolate themselves with one environment variable.
//!
//! # Precedence
//!
//! 1. `HOSTLINK_HOME` environment variable (if set and non-empty)
//! 2. `dirs::home_dir()` platform default
//!
//! # Testing
//!
//! Tests that touch the registry or global config MUST point
//! `HOSTLINK_HOME` at a temporary directory and run under `#[serial]`.

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable that overrides the home directory.
pub const HOME_ENV: &str = "HOSTLINK_HOME";

/// Registry directory, relative to the home directory.
pub const REGISTRY_DIR: &str = ".hostlink";

/// Get the home directory for hostlink state.
///
/// # Errors
///
/// Returns an error if `HOSTLINK_HOME` is unset and the platform home
/// directory cannot be determined.
///
/// # Examples
///
/// ```
/// use hostlink_core::home::get_home_dir;
///
/// # fn example() -> anyhow::Result<()> {
/// let home = get_home_dir()?;
/// let registry_dir = home.join(".hostlink");
/// # let _ = registry_dir;
/// # Ok(())
/// # }
/// # example().unwrap();
/// ```
pub fn get_home_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV) {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    dirs::home_dir().context("Could not determine home directory")
}

/// Directory holding the shared port registry (`<home>/.hostlink`).
pub fn registry_dir() -> Result<PathBuf> {
    Ok(get_home_dir()?.join(REGISTRY_DIR))
}

/// Path of the global config file (`<home>/.config/hostlink/config.toml`).
pub fn global_config_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join(crate::config::GLOBAL_CONFIG))
}
