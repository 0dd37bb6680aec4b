//! Everything a tool or coordinator needs, bundled for the worker side.

use crate::coordinator::{
    ArtifactCoordinator, BuildCoordinator, IndexCoordinator, TestRunCoordinator,
};
use crate::host::{CommandQueue, HostOperations, QueueClosed};
use crate::state::SharedState;
use hostlink_core::config::OperationsConfig;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Identity of the running control plane, reported by `editor_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceInfo {
    pub instance_key: String,
    pub port: Option<u16>,
}

/// A request/reply round trip through the queue did not produce a reply.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HostCallError {
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),

    /// The action was discarded (queue torn down) or panicked before replying.
    #[error("host action was dropped before it replied")]
    Dropped,
}

/// Cheap to clone: every field is shared.
#[derive(Clone)]
pub struct ExecutionContext {
    state: SharedState,
    queue: CommandQueue,
    host: Arc<dyn HostOperations>,
    instance: InstanceInfo,
}

impl ExecutionContext {
    pub fn new(
        state: SharedState,
        queue: CommandQueue,
        host: Arc<dyn HostOperations>,
        instance: InstanceInfo,
    ) -> Self {
        Self {
            state,
            queue,
            host,
            instance,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    pub fn host(&self) -> &Arc<dyn HostOperations> {
        &self.host
    }

    pub fn instance(&self) -> &InstanceInfo {
        &self.instance
    }

    /// Operation timing from the current settings snapshot.
    pub fn operations(&self) -> OperationsConfig {
        self.state.settings.current().operations.clone()
    }

    pub fn build(&self) -> BuildCoordinator<'_> {
        BuildCoordinator::new(self)
    }

    pub fn tests(&self) -> TestRunCoordinator<'_> {
        TestRunCoordinator::new(self)
    }

    pub fn artifacts(&self) -> ArtifactCoordinator<'_> {
        ArtifactCoordinator::new(self)
    }

    pub fn index(&self) -> IndexCoordinator<'_> {
        IndexCoordinator::new(self)
    }

    /// Run `f` on the host thread and wait up to `timeout` for its result.
    ///
    /// `Ok(None)` means the action is still queued or running when the
    /// timeout expires; it will still run later.
    pub async fn run_on_host<T, F>(&self, timeout: Duration, f: F) -> Result<Option<T>, HostCallError>
    where
        T: Send + 'static,
        F: FnOnce(&ExecutionContext) -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let ctx = self.clone();
        self.queue.enqueue(move || {
            let _ = tx.send(f(&ctx));
        })?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(_)) => Err(HostCallError::Dropped),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::host::HostExecutor;
    use crate::host::mock::MockHost;
    use crate::state::StateManagers;
    use hostlink_core::config::Config;

    /// Context wired to a mock host, plus an executor the test ticks by hand.
    pub(crate) struct Harness {
        pub ctx: ExecutionContext,
        pub host: Arc<MockHost>,
        pub executor: HostExecutor,
    }

    impl Harness {
        pub(crate) fn new(host: MockHost) -> Self {
            let mut config = Config::default();
            config.operations.poll_interval_ms = 0;
            config.operations.dependency_wait_timeout_ms = 60_000;
            Self::with_config(host, config)
        }

        pub(crate) fn with_config(host: MockHost, config: Config) -> Self {
            let host = Arc::new(host);
            let state = StateManagers::shared(config);
            let queue = CommandQueue::new();
            let executor = HostExecutor::new(queue.clone(), Arc::clone(&state), host.clone());
            let ctx = ExecutionContext::new(
                state,
                queue,
                host.clone(),
                InstanceInfo {
                    instance_key: "test-instance".to_string(),
                    port: None,
                },
            );
            Self {
                ctx,
                host,
                executor,
            }
        }

        pub(crate) fn tick(&self) -> usize {
            self.executor.tick()
        }

        /// Tick until the queue is empty (bounded).
        pub(crate) fn settle(&self) {
            for _ in 0..1000 {
                if self.tick() == 0 && self.ctx.queue().is_empty() {
                    return;
                }
            }
            panic!("queue did not settle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::Harness;
    use super::*;
    use crate::host::mock::MockHost;

    #[tokio::test]
    async fn test_run_on_host_returns_reply_after_tick() {
        let harness = Harness::new(MockHost::new());
        let ctx = harness.ctx.clone();
        let call = tokio::spawn(async move {
            ctx.run_on_host(Duration::from_secs(5), |ctx| ctx.instance().instance_key.clone())
                .await
        });

        for _ in 0..100 {
            tokio::task::yield_now().await;
            if harness.tick() > 0 {
                break;
            }
        }
        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply.as_deref(), Some("test-instance"));
    }

    #[tokio::test]
    async fn test_run_on_host_times_out_without_ticks() {
        let harness = Harness::new(MockHost::new());
        let reply = harness
            .ctx
            .run_on_host(Duration::from_millis(20), |_| 1)
            .await
            .unwrap();
        assert_eq!(reply, None);
        assert_eq!(harness.ctx.queue().len(), 1);
    }

    #[tokio::test]
    async fn test_run_on_host_reports_closed_and_dropped() {
        let harness = Harness::new(MockHost::new());
        harness.ctx.queue().close();
        let closed = harness
            .ctx
            .run_on_host(Duration::from_millis(20), |_| 1)
            .await;
        assert_eq!(closed, Err(HostCallError::QueueClosed(QueueClosed)));

        let harness = Harness::new(MockHost::new());
        let ctx = harness.ctx.clone();
        let call = tokio::spawn(async move {
            ctx.run_on_host(Duration::from_secs(5), |_| -> u8 { panic!("host hook blew up") })
                .await
        });
        for _ in 0..100 {
            tokio::task::yield_now().await;
            if harness.tick() > 0 {
                break;
            }
        }
        assert_eq!(call.await.unwrap(), Err(HostCallError::Dropped));
    }
}
