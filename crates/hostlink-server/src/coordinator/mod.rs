//! Operation coordinators.
//!
//! Every category follows the same shape:
//!
//! 1. `start` runs on a worker thread. Under the category's tracker lock it
//!    either reports the run already in flight or moves the record to
//!    `Running`, then enqueues the host-side entry action and returns at once.
//! 2. On the host thread the entry action waits for conflicting categories
//!    to go idle. The wait is a continuation that re-enqueues itself and
//!    re-checks every `poll_interval`, so it never blocks a tick; it gives up
//!    with `precondition_timeout` after `dependency_wait_timeout`.
//! 3. The host hook starts the work and hands back a [`HostJob`] that is
//!    polled once per continuation until it is ready or the category timeout
//!    expires.
//! 4. The outcome and the terminal state are written in one tracker update.
//!
//! Continuations check that their run is still current before doing
//! anything, so a run that was interrupted or cancelled stops quietly.
//!
//! [`HostJob`]: crate::host::HostJob

pub mod artifacts;
pub mod build;
pub mod index;
pub mod test_run;

pub use artifacts::{ArtifactCoordinator, resolve_selection};
pub use build::BuildCoordinator;
pub use index::IndexCoordinator;
pub use test_run::{CancelOutcome, TestRunCoordinator};

use crate::context::ExecutionContext;
use crate::host::hooks::{BoxedJob, HostError, HostJob, HostOperations, guarded};
use crate::host::QueueClosed;
use crate::state::{BeginOutcome, FailureKind, OperationCategory};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::task::Poll;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Result of a coordinator `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Accepted { identifier: String },
    AlreadyRunning { identifier: Option<String> },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),

    #[error("{0}")]
    InvalidRequest(String),
}

/// Host-side work of one run, entered once its dependencies are idle.
pub(crate) type Body = Box<dyn FnOnce(ExecutionContext, String) + Send + 'static>;

/// Completion callback of a job-based run.
pub(crate) type Finish<T> = Box<dyn FnOnce(&ExecutionContext, &str, T) + Send + 'static>;

/// Enqueue `action` on the context's queue. A closed queue means teardown
/// is in progress; the run is failed as interrupted when the control plane
/// restarts or shuts down, so the continuation is simply dropped.
pub(crate) fn requeue<F>(ctx: &ExecutionContext, action: F)
where
    F: FnOnce() + Send + 'static,
{
    if ctx.queue().enqueue(action).is_err() {
        debug!("command queue closed; dropping continuation");
    }
}

/// Shared `start` path for every category.
pub(crate) fn launch(
    ctx: &ExecutionContext,
    category: OperationCategory,
    request: serde_json::Value,
    body: Body,
) -> Result<StartOutcome, StartError> {
    let tracker = ctx.state().tracker(category);
    let identifier = match tracker.try_begin(request) {
        BeginOutcome::Started { identifier } => identifier,
        BeginOutcome::AlreadyRunning { identifier } => {
            return Ok(StartOutcome::AlreadyRunning { identifier });
        }
    };

    let wait = DependencyWait {
        ctx: ctx.clone(),
        category,
        identifier: identifier.clone(),
        since: None,
        next_check: None,
        body,
    };
    if let Err(closed) = ctx.queue().enqueue(move || wait.check()) {
        tracker.fail(
            &identifier,
            FailureKind::StartFailed,
            format!("{} could not be queued: {closed}", category.label()),
            None,
        );
        return Err(closed.into());
    }
    Ok(StartOutcome::Accepted { identifier })
}

struct DependencyWait {
    ctx: ExecutionContext,
    category: OperationCategory,
    identifier: String,
    since: Option<Instant>,
    next_check: Option<Instant>,
    body: Body,
}

impl DependencyWait {
    fn check(mut self) {
        let tracker = self.ctx.state().tracker(self.category);
        if !tracker.is_current(&self.identifier) {
            debug!(category = %self.category, identifier = %self.identifier, "run no longer current; abandoning dependency wait");
            return;
        }

        let now = Instant::now();
        let since = *self.since.get_or_insert(now);
        if self.next_check.is_some_and(|at| now < at) {
            let ctx = self.ctx.clone();
            requeue(&ctx, move || self.check());
            return;
        }

        let ops = self.ctx.operations();
        let Some(blocking) = self.ctx.state().first_running(self.category.dependencies()) else {
            let Self {
                ctx,
                identifier,
                body,
                ..
            } = self;
            body(ctx, identifier);
            return;
        };

        let waited = now.duration_since(since);
        if waited >= ops.dependency_wait_timeout() {
            tracker.fail(
                &self.identifier,
                FailureKind::PreconditionTimeout,
                format!(
                    "{} timed out after {:.1}s waiting for the running {blocking} to finish",
                    self.category.label(),
                    waited.as_secs_f64()
                ),
                None,
            );
            return;
        }

        debug!(category = %self.category, %blocking, "waiting for dependency");
        self.next_check = Some(now + ops.poll_interval());
        let ctx = self.ctx.clone();
        requeue(&ctx, move || self.check());
    }
}

/// Invoke a start hook and drive the returned job to completion.
///
/// A hook error or panic fails the run with `start_failed`. The job is
/// polled immediately, then once per tick.
pub(crate) fn start_job<T, S>(
    ctx: ExecutionContext,
    category: OperationCategory,
    identifier: String,
    timeout: Duration,
    start: S,
    finish: Finish<T>,
) where
    T: Send + 'static,
    S: FnOnce(&dyn HostOperations) -> Result<BoxedJob<T>, HostError>,
{
    let tracker = ctx.state().tracker(category);
    let host = ctx.host().clone();
    match guarded(|| start(host.as_ref())) {
        Ok(job) => {
            tracker.mark_host_started(&identifier);
            JobDriver {
                ctx,
                category,
                identifier,
                job,
                deadline: Instant::now() + timeout,
                timeout,
                finish,
            }
            .advance();
        }
        Err(e) => {
            tracker.fail(
                &identifier,
                FailureKind::StartFailed,
                format!("{} failed to start: {e}", category.label()),
                None,
            );
        }
    }
}

struct JobDriver<T> {
    ctx: ExecutionContext,
    category: OperationCategory,
    identifier: String,
    job: BoxedJob<T>,
    deadline: Instant,
    timeout: Duration,
    finish: Finish<T>,
}

impl<T: Send + 'static> JobDriver<T> {
    fn advance(mut self) {
        let tracker = self.ctx.state().tracker(self.category);
        if !tracker.is_current(&self.identifier) {
            debug!(category = %self.category, identifier = %self.identifier, "run no longer current; dropping host job");
            return;
        }

        let polled = catch_unwind(AssertUnwindSafe(|| self.job.poll()));
        match polled {
            Ok(Poll::Ready(outcome)) => {
                let Self {
                    ctx,
                    identifier,
                    finish,
                    ..
                } = self;
                finish(&ctx, &identifier, outcome);
            }
            Ok(Poll::Pending) if Instant::now() >= self.deadline => {
                tracker.fail(
                    &self.identifier,
                    FailureKind::TimedOut,
                    format!(
                        "{} did not finish within {}s",
                        self.category.label(),
                        self.timeout.as_secs()
                    ),
                    None,
                );
            }
            Ok(Poll::Pending) => {
                let ctx = self.ctx.clone();
                requeue(&ctx, move || self.advance());
            }
            Err(payload) => {
                tracker.fail(
                    &self.identifier,
                    FailureKind::InvocationFailed,
                    format!(
                        "{} host job panicked: {}",
                        self.category.label(),
                        crate::host::hooks::panic_message(payload.as_ref())
                    ),
                    None,
                );
            }
        }
    }
}
