//! Thread-safe FIFO of actions bound for the host thread.
//!
//! Any thread may enqueue. Only the executor drains, taking a snapshot of
//! everything queued at the start of a tick, so an action enqueued while a
//! tick is running (including a continuation re-enqueuing itself) runs on
//! the next tick rather than extending the current one.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// A unit of host-thread work.
pub type Command = Box<dyn FnOnce() + Send + 'static>;

/// The queue was closed by teardown; the action was dropped.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("command queue is closed; the control plane is shutting down")]
pub struct QueueClosed;

#[derive(Default)]
struct Inner {
    pending: VecDeque<Command>,
    closed: bool,
}

/// Cheap to clone; clones share the same queue.
#[derive(Clone, Default)]
pub struct CommandQueue {
    inner: Arc<Mutex<Inner>>,
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("CommandQueue")
            .field("pending", &inner.pending.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an action. Never blocks beyond the queue mutex.
    pub fn enqueue<F>(&self, action: F) -> Result<(), QueueClosed>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.lock();
        if inner.closed {
            return Err(QueueClosed);
        }
        inner.pending.push_back(Box::new(action));
        Ok(())
    }

    /// Take everything queued so far, in enqueue order.
    pub(crate) fn take_pending(&self) -> VecDeque<Command> {
        std::mem::take(&mut self.lock().pending)
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Refuse further actions and drop the pending ones.
    ///
    /// Returns how many pending actions were dropped. The actions are dropped
    /// after the lock is released, since dropping one may drop the last
    /// handle on something that itself touches the queue.
    pub fn close(&self) -> usize {
        let dropped = {
            let mut inner = self.lock();
            inner.closed = true;
            std::mem::take(&mut inner.pending)
        };
        dropped.len()
    }
}
