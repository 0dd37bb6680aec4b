//! The seam between the control plane and the host it drives.
//!
//! A host (an editor, a build system, the bundled simulator) implements
//! [`HostOperations`]. Every method is called on the host thread only, from
//! inside an executor tick, so implementations may touch host-domain state
//! freely. Methods must return promptly: work that takes longer than a frame
//! is handed back as a [`HostJob`] and polled on later ticks.

use crate::state::{Diagnostic, EditorSnapshot, TestCaseFailure, TestSummary};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::task::Poll;
use thiserror::Error;

/// Failure reported by (or around) a host hook.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("{0}")]
    Failed(String),

    #[error("host hook panicked: {0}")]
    Panicked(String),
}

impl HostError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Work started by a host hook and finished on a later tick.
///
/// `poll` runs on the host thread, once per tick, until it returns
/// `Poll::Ready`; it is never polled again after that.
pub trait HostJob<T>: Send {
    fn poll(&mut self) -> Poll<T>;
}

impl<T, F> HostJob<T> for F
where
    F: FnMut() -> Poll<T> + Send,
{
    fn poll(&mut self) -> Poll<T> {
        self()
    }
}

pub type BoxedJob<T> = Box<dyn HostJob<T>>;

/// A job that is finished the first time it is polled.
pub fn ready_job<T: Send + 'static>(value: T) -> BoxedJob<T> {
    let mut slot = Some(value);
    Box::new(move || match slot.take() {
        Some(value) => Poll::Ready(value),
        None => Poll::Pending,
    })
}

// ── Requests ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestMode {
    #[default]
    #[serde(alias = "edit", alias = "editmode")]
    EditMode,
    #[serde(alias = "play", alias = "playmode")]
    PlayMode,
}

/// Which tests a run executes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestFilter {
    #[default]
    All,
    Single { test_name: String },
    Regex { pattern: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunRequest {
    pub mode: TestMode,
    pub filter: TestFilter,
}

/// Which artifacts a batch compiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArtifactSelection {
    All,
    Pattern { pattern: String },
    Single { name: String },
}

impl ArtifactSelection {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Pattern { .. } => "pattern",
            Self::Single { .. } => "single",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRefreshRequest {
    #[serde(default)]
    pub force: bool,
}

// ── Outcomes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutcome {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestRunOutcome {
    /// The runner executed to the end. Failing tests still count as a
    /// finished run; they show up in `summary` and `failures`.
    pub finished: bool,
    pub summary: TestSummary,
    pub failures: Vec<TestCaseFailure>,
    /// The host stopped the run early because of a cancellation request.
    pub cancelled: bool,
    /// Why the runner did not finish, when `finished` is false.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactOutcome {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRefreshOutcome {
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
    /// The refresh picked up source changes and queued a build.
    pub triggered_build: bool,
}

/// Host-domain hooks invoked by the executor.
pub trait HostOperations: Send + Sync + 'static {
    fn start_build(&self, request: &BuildRequest) -> Result<BoxedJob<BuildOutcome>, HostError>;

    fn start_test_run(
        &self,
        run_id: &str,
        request: &TestRunRequest,
    ) -> Result<BoxedJob<TestRunOutcome>, HostError>;

    /// Ask the host to stop test run `run_id`. `true` means the request was
    /// accepted, not that the run has stopped.
    fn cancel_test_run(&self, run_id: &str) -> bool;

    /// Names of every compilable artifact, in host order.
    fn list_artifacts(&self) -> Result<Vec<String>, HostError>;

    /// Compile one artifact. Called once per tick per item.
    fn compile_artifact(&self, name: &str) -> Result<ArtifactOutcome, HostError>;

    fn start_index_refresh(
        &self,
        request: &IndexRefreshRequest,
    ) -> Result<BoxedJob<IndexRefreshOutcome>, HostError>;

    /// Leave play mode. `Ok(false)` means the host was not playing.
    fn exit_play_mode(&self) -> Result<bool, HostError>;

    /// Current editor flags, sampled once per tick.
    fn editor_snapshot(&self) -> EditorSnapshot;
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run a host hook, turning a panic into [`HostError::Panicked`].
pub(crate) fn guarded<T>(f: impl FnOnce() -> Result<T, HostError>) -> Result<T, HostError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(HostError::Panicked(panic_message(payload.as_ref()))),
    }
}
