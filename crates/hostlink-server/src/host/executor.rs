//! Host executor: drains the command queue on the host thread.

use super::hooks::{HostOperations, panic_message};
use super::queue::CommandQueue;
use crate::state::SharedState;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Name of the thread spawned in dedicated mode.
pub const HOST_THREAD_NAME: &str = "hostlink-host";

#[derive(Clone)]
pub struct HostExecutor {
    queue: CommandQueue,
    state: SharedState,
    host: Arc<dyn HostOperations>,
}

impl HostExecutor {
    pub fn new(queue: CommandQueue, state: SharedState, host: Arc<dyn HostOperations>) -> Self {
        Self { queue, state, host }
    }

    /// Run everything queued before this call, in order, then sample the
    /// host's editor flags. Returns the number of actions run.
    ///
    /// A panicking action is logged and skipped; the remaining actions in
    /// the snapshot still run.
    pub fn tick(&self) -> usize {
        let pending = self.queue.take_pending();
        let drained = pending.len();

        for action in pending {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(action)) {
                error!(
                    "host action panicked: {}",
                    panic_message(payload.as_ref())
                );
                self.state.editor.record_panic();
            }
        }

        let host = Arc::clone(&self.host);
        let snapshot = match catch_unwind(AssertUnwindSafe(move || host.editor_snapshot())) {
            Ok(snapshot) => snapshot,
            Err(payload) => {
                warn!(
                    "editor_snapshot panicked, keeping previous flags: {}",
                    panic_message(payload.as_ref())
                );
                self.state.editor.snapshot().host
            }
        };
        self.state.editor.record_tick(snapshot, drained);
        drained
    }

    /// Move the executor onto its own thread, ticking every `interval`
    /// until `cancel` fires.
    pub fn spawn_dedicated(
        self,
        interval: Duration,
        cancel: CancellationToken,
    ) -> std::io::Result<DedicatedExecutor> {
        let thread_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name(HOST_THREAD_NAME.to_string())
            .spawn(move || {
                debug!(?interval, "host executor thread started");
                while !thread_cancel.is_cancelled() {
                    self.tick();
                    thread::sleep(interval);
                }
                debug!("host executor thread stopped");
            })?;
        info!(?interval, "dedicated host executor running");
        Ok(DedicatedExecutor {
            cancel,
            handle: Some(handle),
        })
    }
}

/// Handle on the dedicated executor thread.
pub struct DedicatedExecutor {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl DedicatedExecutor {
    pub fn is_alive(&self) -> bool {
        !self.cancel.is_cancelled() && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the thread and wait up to `timeout` for it to exit.
    ///
    /// Returns `false` if the thread is still running when the timeout
    /// expires (it is then detached). Idempotent.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                error!(?timeout, "host executor thread did not stop in time; detaching it");
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        if handle.join().is_err() {
            error!("host executor thread panicked");
        }
        true
    }
}

impl Drop for DedicatedExecutor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::MockHost;
    use crate::state::{EditorSnapshot, StateManagers};
    use hostlink_core::config::Config;
    use std::sync::Mutex;

    fn executor(host: Arc<MockHost>) -> (HostExecutor, CommandQueue, SharedState) {
        let queue = CommandQueue::new();
        let state = StateManagers::shared(Config::default());
        let exec = HostExecutor::new(queue.clone(), Arc::clone(&state), host);
        (exec, queue, state)
    }

    #[test]
    fn test_panicking_action_does_not_stop_the_tick() {
        let (exec, queue, state) = executor(Arc::new(MockHost::new()));
        let ran = Arc::new(Mutex::new(Vec::new()));

        let before = Arc::clone(&ran);
        queue.enqueue(move || before.lock().unwrap().push(1)).unwrap();
        queue.enqueue(|| panic!("boom")).unwrap();
        let after = Arc::clone(&ran);
        queue.enqueue(move || after.lock().unwrap().push(3)).unwrap();

        assert_eq!(exec.tick(), 3);
        assert_eq!(*ran.lock().unwrap(), vec![1, 3]);
        let editor = state.editor.snapshot();
        assert_eq!(editor.action_panics, 1);
        assert_eq!(editor.last_tick_actions, 3);
    }

    #[test]
    fn test_tick_samples_editor_flags() {
        let host = Arc::new(MockHost::new());
        host.set_editor(EditorSnapshot {
            is_playing: true,
            is_paused: false,
            is_focused: true,
        });
        let (exec, _queue, state) = executor(Arc::clone(&host));

        assert_eq!(exec.tick(), 0);
        let editor = state.editor.snapshot();
        assert!(editor.host.is_playing);
        assert!(editor.host.is_focused);
        assert_eq!(editor.tick_count, 1);
    }

    #[test]
    fn test_dedicated_thread_drains_and_stops() {
        let (exec, queue, _state) = executor(Arc::new(MockHost::new()));
        let (tx, rx) = std::sync::mpsc::channel();
        let mut dedicated = exec
            .spawn_dedicated(Duration::from_millis(5), CancellationToken::new())
            .unwrap();
        assert!(dedicated.is_alive());

        queue
            .enqueue(move || {
                tx.send(thread::current().name().map(str::to_string)).unwrap();
            })
            .unwrap();
        let name = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(name.as_deref(), Some(HOST_THREAD_NAME));

        assert!(dedicated.stop(Duration::from_secs(2)));
        assert!(!dedicated.is_alive());
        assert!(dedicated.stop(Duration::from_secs(2)));
    }
}
