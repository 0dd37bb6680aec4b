//! Configuration discovery and resolution

use super::types::{Config, ExecutorMode};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const WORKSPACE_CONFIG: &str = ".hostlink.toml";
pub(crate) const GLOBAL_CONFIG: &str = ".config/hostlink/config.toml";

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("TOML parsing error in {path}: {source}")]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// The merged layers do not form a valid configuration
    #[error("Invalid configuration: {0}")]
    Invalid(#[source] toml::de::Error),

    /// Config file named on the command line does not exist
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),
}

/// Command-line overrides for configuration
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub instance_key: Option<String>,
    pub executor_mode: Option<ExecutorMode>,
    /// Extra config file layered above the workspace config
    pub config_path: Option<PathBuf>,
}

/// Everything needed to (re-)resolve the configuration of one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSource {
    pub overrides: ConfigOverrides,
    pub workspace_dir: PathBuf,
    pub home_dir: PathBuf,
}

impl ConfigSource {
    pub fn resolve(&self) -> Result<Config, ConfigError> {
        resolve_config(&self.overrides, &self.workspace_dir, &self.home_dir)
    }
}

/// Resolve configuration from all sources
///
/// Priority (highest to lowest):
/// 1. Command-line overrides
/// 2. Environment variables
/// 3. Explicit `--config` file, then workspace config (`.hostlink.toml` in
///    `workspace_dir` or a parent, up to the git root)
/// 4. Global config (`<home>/.config/hostlink/config.toml`)
/// 5. Defaults
///
/// Files are merged key by key, so a workspace file that only sets
/// `[server] port` keeps every other value from the layers below it.
/// Discovered files that fail to parse are skipped with a warning; an
/// explicit `--config` file must exist and parse.
pub fn resolve_config(
    overrides: &ConfigOverrides,
    workspace_dir: &Path,
    home_dir: &Path,
) -> Result<Config, ConfigError> {
    let mut merged = toml::Table::new();

    let global_config_path = home_dir.join(GLOBAL_CONFIG);
    if global_config_path.exists() {
        merge_discovered(&mut merged, &global_config_path);
    }

    if let Some(workspace_config) = find_workspace_config(workspace_dir) {
        merge_discovered(&mut merged, &workspace_config);
    }

    if let Some(ref explicit) = overrides.config_path {
        if !explicit.exists() {
            return Err(ConfigError::NotFound(explicit.clone()));
        }
        merge_tables(&mut merged, load_table(explicit)?);
    }

    let mut config: Config = toml::Value::Table(merged)
        .try_into()
        .map_err(ConfigError::Invalid)?;

    apply_env_overrides(&mut config);
    apply_cli_overrides(&mut config, overrides);

    Ok(config)
}

/// Find the workspace config file
///
/// Searches `workspace_dir` and its parents, stopping at the git root.
fn find_workspace_config(workspace_dir: &Path) -> Option<PathBuf> {
    let mut dir = workspace_dir;

    loop {
        let config_path = dir.join(WORKSPACE_CONFIG);
        if config_path.exists() {
            return Some(config_path);
        }

        if dir.join(".git").exists() {
            break;
        }

        dir = dir.parent()?;
    }

    None
}

fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    contents
        .parse::<toml::Table>()
        .map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })
}

fn merge_discovered(merged: &mut toml::Table, path: &Path) {
    match load_table(path) {
        Ok(table) => {
            debug!(path = %path.display(), "loaded config layer");
            merge_tables(merged, table);
        }
        Err(e) => warn!("Skipping unreadable config: {e}"),
    }
}

/// Deep-merge `overlay` into `base`; scalar values in `overlay` win.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match value {
            toml::Value::Table(incoming) => match base.get_mut(&key) {
                Some(toml::Value::Table(existing)) => merge_tables(existing, incoming),
                _ => {
                    base.insert(key, toml::Value::Table(incoming));
                }
            },
            other => {
                base.insert(key, other);
            }
        }
    }
}

/// Apply environment variable overrides
fn apply_env_overrides(config: &mut Config) {
    if let Ok(raw) = std::env::var("HOSTLINK_PORT") {
        match raw.trim().parse::<u16>() {
            Ok(port) => config.server.port = port,
            Err(_) => warn!("Ignoring HOSTLINK_PORT={raw:?}: not a valid port"),
        }
    }

    if let Ok(key) = std::env::var("HOSTLINK_INSTANCE_KEY") {
        if !key.trim().is_empty() {
            config.instance.key = Some(key.trim().to_string());
        }
    }

    if let Ok(raw) = std::env::var("HOSTLINK_EXECUTOR_MODE") {
        match raw.parse::<ExecutorMode>() {
            Ok(mode) => config.executor.mode = mode,
            Err(e) => warn!("Ignoring HOSTLINK_EXECUTOR_MODE: {e}"),
        }
    }
}

/// Apply command-line overrides
fn apply_cli_overrides(config: &mut Config, overrides: &ConfigOverrides) {
    if let Some(port) = overrides.port {
        config.server.port = port;
    }

    if let Some(ref key) = overrides.instance_key {
        config.instance.key = Some(key.clone());
    }

    if let Some(mode) = overrides.executor_mode {
        config.executor.mode = mode;
    }
}
