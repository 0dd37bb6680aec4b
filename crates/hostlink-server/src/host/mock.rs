//! Scripted host for tests.
//!
//! Jobs are gated by default: a started build stays pending until the test
//! calls [`MockHost::finish_build`]. [`MockHost::immediate`] makes every job
//! finish on its first poll with the configured default outcome.

use super::hooks::{
    ArtifactOutcome, BoxedJob, BuildOutcome, BuildRequest, HostError, HostOperations,
    IndexRefreshOutcome, IndexRefreshRequest, TestRunOutcome, TestRunRequest, ready_job,
};
use crate::state::{Diagnostic, EditorSnapshot, OperationCategory, TestSummary};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Poll;

type Slot<T> = Arc<Mutex<Option<T>>>;

fn gated<T: Send + 'static>(slot: &Slot<T>) -> BoxedJob<T> {
    let slot = Arc::clone(slot);
    Box::new(move || match slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
        Some(value) => Poll::Ready(value),
        None => Poll::Pending,
    })
}

struct MockState {
    editor: EditorSnapshot,
    immediate: bool,
    build_outcome: BuildOutcome,
    test_outcome: TestRunOutcome,
    refresh_outcome: IndexRefreshOutcome,
    build_slot: Option<Slot<BuildOutcome>>,
    test_slot: Option<Slot<TestRunOutcome>>,
    refresh_slot: Option<Slot<IndexRefreshOutcome>>,
    start_failures: HashMap<OperationCategory, String>,
    start_panics: HashSet<OperationCategory>,
    cancel_accepts: bool,
    cancel_requests: Vec<String>,
    test_requests: Vec<TestRunRequest>,
    artifacts: Vec<String>,
    failing_artifacts: HashSet<String>,
    compiled: Vec<String>,
    calls: HashMap<&'static str, usize>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            editor: EditorSnapshot::default(),
            immediate: false,
            build_outcome: BuildOutcome {
                success: true,
                diagnostics: vec![],
            },
            test_outcome: TestRunOutcome {
                finished: true,
                ..TestRunOutcome::default()
            },
            refresh_outcome: IndexRefreshOutcome {
                success: true,
                ..IndexRefreshOutcome::default()
            },
            build_slot: None,
            test_slot: None,
            refresh_slot: None,
            start_failures: HashMap::new(),
            start_panics: HashSet::new(),
            cancel_accepts: true,
            cancel_requests: vec![],
            test_requests: vec![],
            artifacts: vec![],
            failing_artifacts: HashSet::new(),
            compiled: vec![],
            calls: HashMap::new(),
        }
    }
}

#[derive(Default)]
pub struct MockHost {
    inner: Mutex<MockState>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every job finishes on its first poll.
    pub fn immediate(self) -> Self {
        self.lock().immediate = true;
        self
    }

    pub fn with_artifacts(self, names: &[&str]) -> Self {
        self.lock().artifacts = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_build_outcome(self, outcome: BuildOutcome) -> Self {
        self.lock().build_outcome = outcome;
        self
    }

    pub fn with_test_outcome(self, outcome: TestRunOutcome) -> Self {
        self.lock().test_outcome = outcome;
        self
    }

    pub fn fail_artifact(&self, name: &str) {
        self.lock().failing_artifacts.insert(name.to_string());
    }

    pub fn fail_start(&self, category: OperationCategory, message: &str) {
        self.lock().start_failures.insert(category, message.to_string());
    }

    pub fn panic_on_start(&self, category: OperationCategory) {
        self.lock().start_panics.insert(category);
    }

    pub fn set_cancel_accepts(&self, accepts: bool) {
        self.lock().cancel_accepts = accepts;
    }

    pub fn set_editor(&self, editor: EditorSnapshot) {
        self.lock().editor = editor;
    }

    /// Let the pending build finish. Returns `false` if no build is pending.
    pub fn finish_build(&self, outcome: BuildOutcome) -> bool {
        fill(self.lock().build_slot.as_ref(), outcome)
    }

    pub fn finish_test_run(&self, outcome: TestRunOutcome) -> bool {
        fill(self.lock().test_slot.as_ref(), outcome)
    }

    pub fn finish_index_refresh(&self, outcome: IndexRefreshOutcome) -> bool {
        fill(self.lock().refresh_slot.as_ref(), outcome)
    }

    /// Number of times hook `name` (e.g. `"start_build"`) was invoked.
    pub fn calls(&self, name: &str) -> usize {
        self.lock().calls.get(name).copied().unwrap_or(0)
    }

    pub fn compiled(&self) -> Vec<String> {
        self.lock().compiled.clone()
    }

    pub fn cancel_requests(&self) -> Vec<String> {
        self.lock().cancel_requests.clone()
    }

    pub fn test_requests(&self) -> Vec<TestRunRequest> {
        self.lock().test_requests.clone()
    }

    /// Shared start path: count the call, apply scripted failures, then hand
    /// out either a ready job or a gated one.
    fn start<T: Clone + Send + 'static>(
        &self,
        hook: &'static str,
        category: OperationCategory,
        pick: impl FnOnce(&mut MockState) -> (T, &mut Option<Slot<T>>),
    ) -> Result<BoxedJob<T>, HostError> {
        let mut state = self.lock();
        *state.calls.entry(hook).or_default() += 1;
        if state.start_panics.contains(&category) {
            drop(state);
            panic!("{hook} panicked");
        }
        if let Some(message) = state.start_failures.get(&category) {
            return Err(HostError::failed(message.clone()));
        }
        let immediate = state.immediate;
        let (default_outcome, slot) = pick(&mut *state);
        if immediate {
            return Ok(ready_job(default_outcome));
        }
        let fresh: Slot<T> = Arc::new(Mutex::new(None));
        *slot = Some(Arc::clone(&fresh));
        Ok(gated(&fresh))
    }
}

fn fill<T>(slot: Option<&Slot<T>>, value: T) -> bool {
    match slot {
        Some(slot) => {
            *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
            true
        }
        None => false,
    }
}

impl HostOperations for MockHost {
    fn start_build(&self, _request: &BuildRequest) -> Result<BoxedJob<BuildOutcome>, HostError> {
        self.start("start_build", OperationCategory::Build, |s| {
            (s.build_outcome.clone(), &mut s.build_slot)
        })
    }

    fn start_test_run(
        &self,
        _run_id: &str,
        request: &TestRunRequest,
    ) -> Result<BoxedJob<TestRunOutcome>, HostError> {
        let request = request.clone();
        self.start("start_test_run", OperationCategory::TestRun, move |s| {
            s.test_requests.push(request);
            (s.test_outcome.clone(), &mut s.test_slot)
        })
    }

    fn cancel_test_run(&self, run_id: &str) -> bool {
        let mut state = self.lock();
        *state.calls.entry("cancel_test_run").or_default() += 1;
        state.cancel_requests.push(run_id.to_string());
        state.cancel_accepts
    }

    fn list_artifacts(&self) -> Result<Vec<String>, HostError> {
        let mut state = self.lock();
        *state.calls.entry("list_artifacts").or_default() += 1;
        if let Some(message) = state.start_failures.get(&OperationCategory::ArtifactBatch) {
            return Err(HostError::failed(message.clone()));
        }
        Ok(state.artifacts.clone())
    }

    fn compile_artifact(&self, name: &str) -> Result<ArtifactOutcome, HostError> {
        let mut state = self.lock();
        *state.calls.entry("compile_artifact").or_default() += 1;
        state.compiled.push(name.to_string());
        if state.failing_artifacts.contains(name) {
            return Ok(ArtifactOutcome {
                success: false,
                diagnostics: vec![Diagnostic::error(format!("{name}: undeclared identifier"))],
            });
        }
        Ok(ArtifactOutcome {
            success: true,
            diagnostics: vec![],
        })
    }

    fn start_index_refresh(
        &self,
        _request: &IndexRefreshRequest,
    ) -> Result<BoxedJob<IndexRefreshOutcome>, HostError> {
        self.start("start_index_refresh", OperationCategory::IndexRefresh, |s| {
            (s.refresh_outcome.clone(), &mut s.refresh_slot)
        })
    }

    fn exit_play_mode(&self) -> Result<bool, HostError> {
        let mut state = self.lock();
        *state.calls.entry("exit_play_mode").or_default() += 1;
        let was_playing = state.editor.is_playing;
        state.editor.is_playing = false;
        state.editor.is_paused = false;
        Ok(was_playing)
    }

    fn editor_snapshot(&self) -> EditorSnapshot {
        self.lock().editor
    }
}

/// A finished test run with the given counts.
pub fn test_outcome(passed: u32, failed: u32) -> TestRunOutcome {
    TestRunOutcome {
        finished: true,
        summary: TestSummary {
            total: passed + failed,
            passed,
            failed,
            skipped: 0,
            duration_secs: 0.5,
        },
        ..TestRunOutcome::default()
    }
}
