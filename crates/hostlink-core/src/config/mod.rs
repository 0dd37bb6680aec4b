//! Configuration resolution
//!
//! Resolves configuration from multiple sources with priority:
//! 1. Command-line flags (passed as parameters)
//! 2. Environment variables (`HOSTLINK_PORT`, `HOSTLINK_INSTANCE_KEY`,
//!    `HOSTLINK_EXECUTOR_MODE`)
//! 3. Workspace config (`<workspace>/.hostlink.toml`)
//! 4. Global config (`<home>/.config/hostlink/config.toml`)
//! 5. Defaults

mod discovery;
mod types;

pub use discovery::{ConfigError, ConfigOverrides, ConfigSource, resolve_config};
pub(crate) use discovery::GLOBAL_CONFIG;
pub use types::{
    Config, ExecutorConfig, ExecutorMode, InstanceConfig, OperationsConfig, ServerConfig,
};
