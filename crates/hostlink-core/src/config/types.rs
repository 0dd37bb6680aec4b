//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub operations: OperationsConfig,
    #[serde(default)]
    pub instance: InstanceConfig,
}

/// `[server]`: listener and port acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// First port of the scan range. `0` lets the OS pick any free port.
    pub port: u16,
    /// Number of extra ports scanned after `port`.
    pub port_range: u16,
    /// Total retry budget when this instance's own previous port is still
    /// held by the socket it just closed.
    pub bind_retry_budget_ms: u64,
    /// How long in-flight requests may finish after shutdown starts.
    pub shutdown_grace_ms: u64,
    /// Upper bound on reading one request line.
    pub request_read_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 6400,
            port_range: 20,
            bind_retry_budget_ms: 5000,
            shutdown_grace_ms: 2000,
            request_read_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    pub fn bind_retry_budget(&self) -> Duration {
        Duration::from_millis(self.bind_retry_budget_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn request_read_timeout(&self) -> Duration {
        Duration::from_millis(self.request_read_timeout_ms)
    }
}

/// Who drives the host executor's ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorMode {
    /// A dedicated `hostlink-host` thread ticks on a fixed interval.
    #[default]
    Dedicated,
    /// The embedding host calls `tick()` from its own frame loop.
    External,
}

impl std::str::FromStr for ExecutorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dedicated" => Ok(Self::Dedicated),
            "external" => Ok(Self::External),
            other => Err(format!(
                "unknown executor mode '{other}' (expected 'dedicated' or 'external')"
            )),
        }
    }
}

/// `[executor]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub mode: ExecutorMode,
    /// Tick period of the dedicated executor thread.
    pub tick_interval_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutorMode::Dedicated,
            tick_interval_ms: 16,
        }
    }
}

impl ExecutorConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

/// `[operations]`: timing of long-running operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationsConfig {
    /// How often a waiting operation re-checks its dependencies.
    pub poll_interval_ms: u64,
    /// How long an operation may wait for conflicting operations to finish.
    pub dependency_wait_timeout_ms: u64,
    pub build_timeout_secs: u64,
    pub test_run_timeout_secs: u64,
    pub index_refresh_timeout_secs: u64,
    /// How long `tests_cancel` waits for the host to acknowledge.
    pub cancel_ack_timeout_ms: u64,
    /// Period of the settings snapshot refresh.
    pub settings_refresh_secs: u64,
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            dependency_wait_timeout_ms: 30_000,
            build_timeout_secs: 600,
            test_run_timeout_secs: 1800,
            index_refresh_timeout_secs: 300,
            cancel_ack_timeout_ms: 2000,
            settings_refresh_secs: 5,
        }
    }
}

impl OperationsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn dependency_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.dependency_wait_timeout_ms)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn test_run_timeout(&self) -> Duration {
        Duration::from_secs(self.test_run_timeout_secs)
    }

    pub fn index_refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.index_refresh_timeout_secs)
    }

    pub fn cancel_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_ack_timeout_ms)
    }

    pub fn settings_refresh(&self) -> Duration {
        Duration::from_secs(self.settings_refresh_secs.max(1))
    }
}

/// `[instance]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Stable identity for the port registry. Defaults to the canonical
    /// workspace path.
    pub key: Option<String>,
}
