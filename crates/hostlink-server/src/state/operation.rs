//! Operation record types shared by the trackers, coordinators and tools.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four kinds of long-running host operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    Build,
    TestRun,
    ArtifactBatch,
    IndexRefresh,
}

impl OperationCategory {
    pub const ALL: [OperationCategory; 4] = [
        Self::Build,
        Self::TestRun,
        Self::ArtifactBatch,
        Self::IndexRefresh,
    ];

    /// Categories that must not be running when this one starts its host work.
    pub fn dependencies(self) -> &'static [OperationCategory] {
        match self {
            Self::Build => &[Self::IndexRefresh],
            Self::TestRun => &[Self::IndexRefresh, Self::Build],
            Self::ArtifactBatch => &[Self::IndexRefresh],
            Self::IndexRefresh => &[],
        }
    }

    /// Capitalized name used at the start of messages ("Build", "Test run").
    pub fn label(self) -> &'static str {
        match self {
            Self::Build => "Build",
            Self::TestRun => "Test run",
            Self::ArtifactBatch => "Artifact compilation",
            Self::IndexRefresh => "Asset refresh",
        }
    }

    /// Warning returned when a start arrives while a run is in flight.
    /// Clients match on these texts, so they are fixed per category.
    pub fn already_running_message(self) -> &'static str {
        match self {
            Self::Build => "Build already in progress. Please wait for current build to complete.",
            Self::TestRun => {
                "Tests are already running. Please wait for current test run to complete."
            }
            Self::ArtifactBatch => {
                "Artifact compilation already in progress. Please wait for current compilation to complete."
            }
            Self::IndexRefresh => {
                "Asset refresh already in progress. Please wait for current refresh to complete."
            }
        }
    }

    /// Lowercase noun used mid-sentence ("the current build").
    pub fn noun(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::TestRun => "test run",
            Self::ArtifactBatch => "artifact compilation",
            Self::IndexRefresh => "refresh",
        }
    }
}

impl std::fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.noun())
    }
}

/// Lifecycle state of an operation record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Why a run ended in [`OperationState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The host hook errored or panicked before the work began.
    StartFailed,
    /// A conflicting operation did not finish within the dependency wait.
    PreconditionTimeout,
    /// The host ran the operation and reported failure.
    InvocationFailed,
    /// The host did not finish within the category's timeout.
    TimedOut,
    /// The control plane was torn down while the run was in flight.
    Interrupted,
    /// The run stopped after an accepted cancellation request.
    Cancelled,
}

/// Sub-item progress of a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: u32,
    pub total: u32,
    pub current_item_label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One compiler / importer / test message reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: u32) -> Self {
        self.file = Some(file.into());
        self.line = Some(line);
        self
    }
}

pub(crate) fn count_severity(diagnostics: &[Diagnostic], severity: Severity) -> usize {
    diagnostics.iter().filter(|d| d.severity == severity).count()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseFailure {
    pub name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactItemResult {
    pub name: String,
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub duration_ms: u64,
}

/// Category-specific result payload, tagged by `kind` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationResult {
    Build {
        diagnostics: Vec<Diagnostic>,
        error_count: usize,
        warning_count: usize,
    },
    TestRun {
        summary: TestSummary,
        failures: Vec<TestCaseFailure>,
        cancelled: bool,
    },
    ArtifactBatch {
        selection: String,
        items: Vec<ArtifactItemResult>,
        successful: usize,
        failed: usize,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        other_matches: Vec<String>,
    },
    IndexRefresh {
        diagnostics: Vec<Diagnostic>,
        triggered_build: bool,
    },
}

/// The single current-or-last run of one category.
///
/// A terminal state (`completed` / `failed`) stays visible, with its result
/// and error, until the next accepted start replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub category: OperationCategory,
    pub state: OperationState,
    pub identifier: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: Option<Progress>,
    pub result: Option<OperationResult>,
    pub last_error: Option<String>,
    pub failure: Option<FailureKind>,
    /// Parameters of the run, echoed back to status readers.
    pub request: Option<serde_json::Value>,
    /// Accepted starts since the state managers were created.
    pub run_count: u64,
    /// The host hook has been invoked for this run (dependency wait is over).
    pub host_started: bool,
    pub cancel_requested: bool,
}

impl OperationRecord {
    pub fn idle(category: OperationCategory) -> Self {
        Self {
            category,
            state: OperationState::Idle,
            identifier: None,
            started_at: None,
            finished_at: None,
            progress: None,
            result: None,
            last_error: None,
            failure: None,
            request: None,
            run_count: 0,
            host_started: false,
            cancel_requested: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == OperationState::Running
    }

    /// Elapsed run time: up to now while running, start to finish otherwise.
    pub fn elapsed_secs(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds().max(0) as f64 / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dependency_table() {
        use OperationCategory::*;
        assert_eq!(Build.dependencies(), &[IndexRefresh]);
        assert_eq!(TestRun.dependencies(), &[IndexRefresh, Build]);
        assert_eq!(ArtifactBatch.dependencies(), &[IndexRefresh]);
        assert!(IndexRefresh.dependencies().is_empty());
    }

    #[test]
    fn test_no_category_depends_on_itself() {
        for category in OperationCategory::ALL {
            assert!(!category.dependencies().contains(&category));
        }
    }

    #[test]
    fn test_result_is_tagged_by_kind() {
        let result = OperationResult::IndexRefresh {
            diagnostics: vec![Diagnostic::warning("reimported 3 assets")],
            triggered_build: true,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["kind"], "index_refresh");
        assert_eq!(value["triggered_build"], true);
        assert_eq!(value["diagnostics"][0]["severity"], "warning");
        assert!(value["diagnostics"][0].get("file").is_none());
    }

    #[test]
    fn test_idle_record_serializes_snake_case() {
        let value = serde_json::to_value(OperationRecord::idle(OperationCategory::TestRun)).unwrap();
        assert_eq!(value["category"], "test_run");
        assert_eq!(value["state"], "idle");
        assert_eq!(value["identifier"], json!(null));
    }

    #[test]
    fn test_diagnostic_location_and_counts() {
        let diags = vec![
            Diagnostic::error("CS0103: name does not exist").at("Assets/Foo.cs", 12),
            Diagnostic::warning("unused variable"),
            Diagnostic::error("CS1002: ; expected"),
        ];
        assert_eq!(diags[0].line, Some(12));
        assert_eq!(count_severity(&diags, Severity::Error), 2);
        assert_eq!(count_severity(&diags, Severity::Warning), 1);
        assert!(OperationState::Failed.is_terminal());
        assert!(!OperationState::Running.is_terminal());
    }
}
