//! Lifecycle manager: owns the listener, the queue, the executor and the
//! async runtime, and rebuilds them when the host reloads.
//!
//! The state managers outlive restarts. A host that reloads without losing
//! memory calls [`ControlPlane::initialize`] again on the same instance; a
//! host that loses memory creates a fresh [`ControlPlane`].
//!
//! `ControlPlane` drives its own tokio runtime, so its methods (and its
//! `Drop`) must be called from plain threads, never from inside an async
//! context.

use super::health::{self, Health};
use super::port::acquire_port;
use crate::context::{ExecutionContext, InstanceInfo};
use crate::host::{CommandQueue, DedicatedExecutor, HostExecutor, HostOperations};
use crate::server::{self, Dispatcher, ServerHandle, ServerOptions};
use crate::state::{SharedState, StateManagers};
use crate::tools::ToolRegistry;
use anyhow::{Context, Result};
use hostlink_core::client::probe_port;
use hostlink_core::config::{Config, ConfigSource, ExecutorMode};
use hostlink_core::registry::PortRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_millis(250);
const WORKER_THREAD_NAME: &str = "hostlink-worker";

/// What [`ControlPlane::initialize`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Everything was already running and answering.
    AlreadyHealthy,
    /// Nothing was running; a full start was performed.
    Started,
    /// Parts were dead; the remains were torn down and a full start performed.
    Restarted,
}

enum Executor {
    Dedicated(DedicatedExecutor),
    /// Ticked by the embedding host through [`ControlPlane::tick`].
    External(HostExecutor),
}

impl Executor {
    fn is_alive(&self, queue: &CommandQueue) -> bool {
        match self {
            Self::Dedicated(executor) => executor.is_alive(),
            Self::External(_) => !queue.is_closed(),
        }
    }
}

/// Everything that exists only while the control plane is started.
struct Running {
    runtime: Runtime,
    server: ServerHandle,
    executor: Executor,
    queue: CommandQueue,
    ctx: ExecutionContext,
    registry: PortRegistry,
    instance_key: String,
    port: u16,
    background: CancellationToken,
}

pub struct ControlPlane {
    source: ConfigSource,
    host: Arc<dyn HostOperations>,
    tools: Arc<ToolRegistry>,
    state: SharedState,
    running: Option<Running>,
    /// Port of the last torn-down start, tried first by the next one.
    last_port: Option<u16>,
}

impl ControlPlane {
    /// Resolve the configuration once and create fresh state managers.
    /// Nothing is started until [`ControlPlane::initialize`].
    pub fn new(source: ConfigSource, host: Arc<dyn HostOperations>) -> Result<Self> {
        let config = source
            .resolve()
            .context("Failed to resolve control-plane configuration")?;
        Ok(Self::with_state(source, host, StateManagers::shared(config)))
    }

    /// Reuse state managers that survived a host reload.
    pub fn with_state(
        source: ConfigSource,
        host: Arc<dyn HostOperations>,
        state: SharedState,
    ) -> Self {
        Self {
            source,
            host,
            tools: Arc::new(ToolRegistry::with_default_tools()),
            state,
            running: None,
            last_port: None,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|r| r.port)
    }

    pub fn instance_key(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.instance_key.as_str())
    }

    pub fn context(&self) -> Option<&ExecutionContext> {
        self.running.as_ref().map(|r| &r.ctx)
    }

    /// Liveness self-check.
    pub fn health(&self) -> Health {
        let Some(running) = &self.running else {
            return Health::Uninitialized;
        };
        health::evaluate(
            running.port,
            running.server.is_alive(),
            running.executor.is_alive(&running.queue),
            |port| probe_port(port, PROBE_TIMEOUT),
        )
    }

    /// Bring the control plane to a healthy state.
    ///
    /// Safe to call on every host reload: a healthy control plane is left
    /// alone, a half-dead one is torn down and started again.
    ///
    /// # Errors
    ///
    /// Returns an error if no port can be acquired or the runtime, executor
    /// thread or listener cannot be created. Nothing is left running then.
    pub fn initialize(&mut self) -> Result<InitOutcome> {
        match self.health() {
            Health::Healthy { port } => {
                debug!(port, "control plane already healthy");
                Ok(InitOutcome::AlreadyHealthy)
            }
            Health::Uninitialized => {
                self.start()?;
                Ok(InitOutcome::Started)
            }
            Health::Inconsistent {
                listener_alive,
                executor_alive,
            } => {
                warn!(
                    listener_alive,
                    executor_alive, "control plane is inconsistent; restarting it"
                );
                self.teardown();
                self.start()?;
                Ok(InitOutcome::Restarted)
            }
        }
    }

    /// Run one executor tick. Only meaningful in `external` executor mode;
    /// with a dedicated executor thread this does nothing and returns 0.
    pub fn tick(&self) -> usize {
        match self.running.as_ref().map(|r| &r.executor) {
            Some(Executor::External(executor)) => executor.tick(),
            Some(Executor::Dedicated(_)) => {
                debug!("tick ignored: a dedicated executor thread is running");
                0
            }
            None => 0,
        }
    }

    /// Stop everything and remove this instance's registry entry.
    /// Idempotent.
    pub fn shutdown(&mut self) {
        if self.running.is_none() {
            debug!("control plane already shut down");
            return;
        }
        self.teardown();
        info!("control plane shut down");
    }

    fn start(&mut self) -> Result<()> {
        self.state.settings.refresh_from(&self.source);
        let config = self.state.settings.current();

        // Continuations queued before a restart died with the old queue.
        let interrupted = self
            .state
            .interrupt_running("Interrupted by control-plane restart");
        if interrupted > 0 {
            warn!(interrupted, "failed operations left running by a previous start");
        }

        let instance_key = self.instance_key_for(&config);
        let registry = PortRegistry::in_home(&self.source.home_dir);
        let acquired = acquire_port(&registry, &instance_key, &config.server, self.last_port)
            .context("Failed to acquire a control-plane port")?;
        let port = acquired.port;

        match self.launch(&config, acquired.listener, &registry, &instance_key, port) {
            Ok(running) => {
                self.running = Some(running);
                self.state.editor.record_initialization();
                info!(port, instance_key, "control plane started");
                Ok(())
            }
            Err(e) => {
                if let Err(unregister) = registry.unregister(&instance_key) {
                    warn!("Failed to remove registry entry after failed start: {unregister}");
                }
                Err(e)
            }
        }
    }

    fn launch(
        &self,
        config: &Config,
        listener: std::net::TcpListener,
        registry: &PortRegistry,
        instance_key: &str,
        port: u16,
    ) -> Result<Running> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name(WORKER_THREAD_NAME)
            .enable_all()
            .build()
            .context("Failed to build the control-plane runtime")?;

        let queue = CommandQueue::new();
        let ctx = ExecutionContext::new(
            Arc::clone(&self.state),
            queue.clone(),
            Arc::clone(&self.host),
            InstanceInfo {
                instance_key: instance_key.to_string(),
                port: Some(port),
            },
        );

        let host_executor =
            HostExecutor::new(queue.clone(), Arc::clone(&self.state), Arc::clone(&self.host));
        let executor = match config.executor.mode {
            ExecutorMode::Dedicated => Executor::Dedicated(
                host_executor
                    .spawn_dedicated(config.executor.tick_interval(), CancellationToken::new())
                    .context("Failed to spawn the host executor thread")?,
            ),
            ExecutorMode::External => Executor::External(host_executor),
        };

        let server = {
            let _guard = runtime.enter();
            server::spawn(
                listener,
                Dispatcher::new(Arc::clone(&self.tools), ctx.clone()),
                ServerOptions::from(&config.server),
            )
            .context("Failed to start the control-plane server")?
        };

        let background = CancellationToken::new();
        runtime.spawn(refresh_settings(
            Arc::clone(&self.state),
            self.source.clone(),
            background.clone(),
        ));

        Ok(Running {
            runtime,
            server,
            executor,
            queue,
            ctx,
            registry: registry.clone(),
            instance_key: instance_key.to_string(),
            port,
            background,
        })
    }

    fn teardown(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        self.last_port = Some(running.port);
        let grace = self.state.settings.current().server.shutdown_grace();

        running.background.cancel();
        running.runtime.block_on(running.server.shutdown());

        if let Executor::Dedicated(executor) = &mut running.executor {
            executor.stop(grace);
        }
        let dropped = running.queue.close();
        if dropped > 0 {
            debug!(dropped, "discarded queued host actions");
        }
        let interrupted = self
            .state
            .interrupt_running("Interrupted by control-plane shutdown");
        if interrupted > 0 {
            warn!(interrupted, "operations interrupted by shutdown");
        }

        match running.registry.unregister(&running.instance_key) {
            Ok(_) => {}
            Err(e) => warn!("Failed to remove registry entry: {e}"),
        }
        running.runtime.shutdown_timeout(grace);
        debug!(port = running.port, "control plane torn down");
    }

    fn instance_key_for(&self, config: &Config) -> String {
        if let Some(key) = config.instance.key.as_deref() {
            return key.to_string();
        }
        std::fs::canonicalize(&self.source.workspace_dir)
            .unwrap_or_else(|_| self.source.workspace_dir.clone())
            .display()
            .to_string()
    }

    /// Kill the accept loop, as a listener crash would.
    #[cfg(any(test, feature = "test-support"))]
    pub fn simulate_listener_crash(&self) {
        if let Some(running) = &self.running {
            running.server.abort();
        }
    }

    /// Stop the dedicated executor thread, as an executor crash would.
    #[cfg(any(test, feature = "test-support"))]
    pub fn simulate_executor_crash(&mut self) {
        if let Some(Running {
            executor: Executor::Dedicated(executor),
            ..
        }) = &mut self.running
        {
            executor.stop(Duration::from_secs(2));
        }
    }
}

impl Drop for ControlPlane {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Periodically re-resolve the config files into the settings snapshot.
async fn refresh_settings(state: SharedState, source: ConfigSource, cancel: CancellationToken) {
    loop {
        let interval = state.settings.current().operations.settings_refresh();
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let state = Arc::clone(&state);
        let source = source.clone();
        if let Err(e) =
            tokio::task::spawn_blocking(move || state.settings.refresh_from(&source)).await
        {
            error!("settings refresh task failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockHost;
    use crate::state::{FailureKind, OperationState};
    use hostlink_core::config::ConfigOverrides;
    use serial_test::serial;
    use tempfile::TempDir;

    struct Fixture {
        _home: TempDir,
        _workspace: TempDir,
        source: ConfigSource,
    }

    fn fixture(mode: ExecutorMode) -> Fixture {
        let home = TempDir::new().unwrap();
        let workspace = TempDir::new().unwrap();
        std::fs::write(
            workspace.path().join(".hostlink.toml"),
            "[server]\nport = 0\nport_range = 0\nshutdown_grace_ms = 200\n",
        )
        .unwrap();
        let source = ConfigSource {
            overrides: ConfigOverrides {
                executor_mode: Some(mode),
                ..ConfigOverrides::default()
            },
            workspace_dir: workspace.path().to_path_buf(),
            home_dir: home.path().to_path_buf(),
        };
        Fixture {
            _home: home,
            _workspace: workspace,
            source,
        }
    }

    #[test]
    #[serial]
    fn test_initialize_twice_is_a_noop() {
        let f = fixture(ExecutorMode::Dedicated);
        let mut plane = ControlPlane::new(f.source.clone(), Arc::new(MockHost::new())).unwrap();
        assert_eq!(plane.health(), Health::Uninitialized);

        assert_eq!(plane.initialize().unwrap(), InitOutcome::Started);
        let port = plane.port().unwrap();
        assert!(plane.health().is_healthy());
        assert_eq!(plane.initialize().unwrap(), InitOutcome::AlreadyHealthy);
        assert_eq!(plane.port(), Some(port));
        assert_eq!(plane.state().editor.snapshot().initializations, 1);

        plane.shutdown();
        plane.shutdown();
        assert_eq!(plane.health(), Health::Uninitialized);
    }

    #[test]
    #[serial]
    fn test_dead_executor_triggers_restart_and_interrupts_running_work() {
        let f = fixture(ExecutorMode::Dedicated);
        let host = Arc::new(MockHost::new());
        let mut plane = ControlPlane::new(f.source.clone(), host.clone()).unwrap();
        plane.initialize().unwrap();

        plane.context().unwrap().build().start().unwrap();
        // Wait for the gated build to reach the host.
        for _ in 0..200 {
            if host.calls("start_build") == 1 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }

        plane.simulate_executor_crash();
        assert!(matches!(
            plane.health(),
            Health::Inconsistent {
                executor_alive: false,
                ..
            }
        ));
        assert_eq!(plane.initialize().unwrap(), InitOutcome::Restarted);
        assert!(plane.health().is_healthy());

        let record = plane.state().build.snapshot();
        assert_eq!(record.state, OperationState::Failed);
        assert_eq!(record.failure, Some(FailureKind::Interrupted));
        assert_eq!(plane.state().editor.snapshot().initializations, 2);
    }

    #[test]
    #[serial]
    fn test_restart_keeps_port_when_old_socket_lingers() {
        let f = fixture(ExecutorMode::Dedicated);
        let base = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        std::fs::write(
            f.source.workspace_dir.join(".hostlink.toml"),
            format!(
                "[server]\nport = {base}\nport_range = 0\nbind_retry_budget_ms = 5000\nshutdown_grace_ms = 200\n"
            ),
        )
        .unwrap();
        let mut plane = ControlPlane::new(f.source.clone(), Arc::new(MockHost::new())).unwrap();
        plane.initialize().unwrap();
        assert_eq!(plane.port(), Some(base));

        plane.shutdown();
        // Something still holds the port for a moment after teardown, and
        // the registry entry is already gone.
        let holder = std::net::TcpListener::bind(("127.0.0.1", base)).unwrap();
        let release = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            drop(holder);
        });
        assert_eq!(plane.initialize().unwrap(), InitOutcome::Started);
        release.join().unwrap();
        assert_eq!(plane.port(), Some(base));
    }

    #[test]
    #[serial]
    fn test_external_mode_is_ticked_by_host() {
        let f = fixture(ExecutorMode::External);
        let mut plane =
            ControlPlane::new(f.source.clone(), Arc::new(MockHost::new().immediate())).unwrap();
        plane.initialize().unwrap();

        plane.context().unwrap().build().start().unwrap();
        assert_eq!(plane.state().build.snapshot().state, OperationState::Running);
        plane.tick();
        assert_eq!(
            plane.state().build.snapshot().state,
            OperationState::Completed
        );
    }

    #[test]
    #[serial]
    fn test_shutdown_removes_registry_entry() {
        let f = fixture(ExecutorMode::Dedicated);
        let mut plane = ControlPlane::new(f.source.clone(), Arc::new(MockHost::new())).unwrap();
        plane.initialize().unwrap();
        let key = plane.instance_key().unwrap().to_string();
        let registry = PortRegistry::in_home(&f.source.home_dir);
        assert!(registry.entry_for(&key).unwrap().is_some());

        plane.shutdown();
        assert!(registry.entry_for(&key).unwrap().is_none());
    }
}
