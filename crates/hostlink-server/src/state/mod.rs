//! State managers: the single source of truth for operation status.
//!
//! Worker threads read snapshots; only host-thread actions and the start
//! path of the coordinators write.

pub mod editor;
pub mod managers;
pub mod operation;
pub mod settings;
pub mod tracker;

pub use editor::{EditorSnapshot, EditorStateManager, EditorStatus};
pub use managers::{SharedState, StateManagers};
pub use operation::{
    ArtifactItemResult, Diagnostic, FailureKind, OperationCategory, OperationRecord,
    OperationResult, OperationState, Progress, Severity, TestCaseFailure, TestSummary,
};
pub use settings::SettingsStateManager;
pub use tracker::{BeginOutcome, OperationTracker};
