//! Stand-in host used by the standalone binary.
//!
//! It has no editor behind it: jobs finish after fixed delays and the
//! artifact and test catalogs are canned, which is enough to exercise every
//! tool end to end from a client.

use super::hooks::{
    ArtifactOutcome, BoxedJob, BuildOutcome, BuildRequest, HostError, HostOperations,
    IndexRefreshOutcome, IndexRefreshRequest, TestFilter, TestMode, TestRunOutcome,
    TestRunRequest,
};
use crate::state::{Diagnostic, EditorSnapshot, TestCaseFailure, TestSummary};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::Poll;
use std::time::{Duration, Instant};

const ARTIFACTS: [&str; 4] = [
    "Custom/Water",
    "Custom/Terrain",
    "Hidden/Blit",
    "Legacy/BrokenGlass",
];

const TESTS: [&str; 5] = [
    "Core.MathTests.Adds",
    "Core.MathTests.Divides",
    "Net.ClientTests.Connects",
    "Net.ClientTests.Reconnects",
    "UI.MenuTests.Opens",
];

/// Always fails, so status output shows a failure path.
const FLAKY_TEST: &str = "Net.ClientTests.Reconnects";
const BROKEN_ARTIFACT: &str = "Legacy/BrokenGlass";

#[derive(Debug, Clone)]
pub struct SimulatedTimings {
    pub build: Duration,
    pub test_run: Duration,
    pub index_refresh: Duration,
}

impl Default for SimulatedTimings {
    fn default() -> Self {
        Self {
            build: Duration::from_secs(2),
            test_run: Duration::from_secs(3),
            index_refresh: Duration::from_secs(1),
        }
    }
}

#[derive(Default)]
struct SimState {
    editor: EditorSnapshot,
    cancel_flags: HashMap<String, Arc<AtomicBool>>,
}

pub struct SimulatedHost {
    timings: SimulatedTimings,
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHost {
    pub fn new(timings: SimulatedTimings) -> Self {
        let state = SimState {
            editor: EditorSnapshot {
                is_focused: true,
                ..EditorSnapshot::default()
            },
            ..SimState::default()
        };
        Self {
            timings,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new(SimulatedTimings::default())
    }
}

fn after<T: Send + 'static>(delay: Duration, make: impl FnOnce() -> T + Send + 'static) -> BoxedJob<T> {
    let deadline = Instant::now() + delay;
    let mut make = Some(make);
    Box::new(move || {
        if Instant::now() < deadline {
            return Poll::Pending;
        }
        match make.take() {
            Some(make) => Poll::Ready(make()),
            None => Poll::Pending,
        }
    })
}

fn select_tests(filter: &TestFilter) -> Result<Vec<&'static str>, HostError> {
    match filter {
        TestFilter::All => Ok(TESTS.to_vec()),
        TestFilter::Single { test_name } => Ok(TESTS
            .iter()
            .copied()
            .filter(|t| t == test_name || t.ends_with(&format!(".{test_name}")))
            .collect()),
        TestFilter::Regex { pattern } => {
            let re = Regex::new(pattern).map_err(|e| HostError::failed(e.to_string()))?;
            Ok(TESTS.iter().copied().filter(|t| re.is_match(t)).collect())
        }
    }
}

impl HostOperations for SimulatedHost {
    fn start_build(&self, _request: &BuildRequest) -> Result<BoxedJob<BuildOutcome>, HostError> {
        Ok(after(self.timings.build, || BuildOutcome {
            success: true,
            diagnostics: vec![
                Diagnostic::warning("CS0168: variable 'e' is declared but never used")
                    .at("Assets/Scripts/Net/Client.cs", 88),
            ],
        }))
    }

    fn start_test_run(
        &self,
        run_id: &str,
        request: &TestRunRequest,
    ) -> Result<BoxedJob<TestRunOutcome>, HostError> {
        let selected = select_tests(&request.filter)?;
        let cancelled = Arc::new(AtomicBool::new(false));
        let play_mode = request.mode == TestMode::PlayMode;
        {
            let mut state = self.lock();
            state
                .cancel_flags
                .insert(run_id.to_string(), Arc::clone(&cancelled));
            if play_mode {
                state.editor.is_playing = true;
            }
        }

        let shared = Arc::clone(&self.state);
        let run_id = run_id.to_string();
        let deadline = Instant::now() + self.timings.test_run;
        let job: BoxedJob<TestRunOutcome> = Box::new(move || {
            let was_cancelled = cancelled.load(Ordering::SeqCst);
            if !was_cancelled && Instant::now() < deadline {
                return Poll::Pending;
            }
            {
                let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                state.cancel_flags.remove(&run_id);
                if play_mode {
                    state.editor.is_playing = false;
                }
            }
            if was_cancelled {
                return Poll::Ready(TestRunOutcome {
                    finished: false,
                    cancelled: true,
                    error: Some("run cancelled".to_string()),
                    ..TestRunOutcome::default()
                });
            }
            let failures: Vec<_> = selected
                .iter()
                .filter(|t| **t == FLAKY_TEST)
                .map(|t| TestCaseFailure {
                    name: t.to_string(),
                    message: "Expected: Connected  But was: TimedOut".to_string(),
                })
                .collect();
            let failed = failures.len() as u32;
            let total = selected.len() as u32;
            Poll::Ready(TestRunOutcome {
                finished: true,
                summary: TestSummary {
                    total,
                    passed: total - failed,
                    failed,
                    skipped: 0,
                    duration_secs: 0.2 * f64::from(total),
                },
                failures,
                cancelled: false,
                error: None,
            })
        });
        Ok(job)
    }

    fn cancel_test_run(&self, run_id: &str) -> bool {
        match self.lock().cancel_flags.get(run_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    fn list_artifacts(&self) -> Result<Vec<String>, HostError> {
        Ok(ARTIFACTS.iter().map(|a| a.to_string()).collect())
    }

    fn compile_artifact(&self, name: &str) -> Result<ArtifactOutcome, HostError> {
        if !ARTIFACTS.contains(&name) {
            return Err(HostError::failed(format!("unknown artifact '{name}'")));
        }
        if name == BROKEN_ARTIFACT {
            return Ok(ArtifactOutcome {
                success: false,
                diagnostics: vec![
                    Diagnostic::error("undeclared identifier 'refraction'")
                        .at("Assets/Shaders/BrokenGlass.shader", 41),
                ],
            });
        }
        Ok(ArtifactOutcome {
            success: true,
            diagnostics: vec![],
        })
    }

    fn start_index_refresh(
        &self,
        request: &IndexRefreshRequest,
    ) -> Result<BoxedJob<IndexRefreshOutcome>, HostError> {
        let force = request.force;
        Ok(after(self.timings.index_refresh, move || IndexRefreshOutcome {
            success: true,
            diagnostics: vec![],
            triggered_build: force,
        }))
    }

    fn exit_play_mode(&self) -> Result<bool, HostError> {
        let mut state = self.lock();
        let was_playing = state.editor.is_playing;
        state.editor.is_playing = false;
        state.editor.is_paused = false;
        Ok(was_playing)
    }

    fn editor_snapshot(&self) -> EditorSnapshot {
        self.lock().editor
    }
}
