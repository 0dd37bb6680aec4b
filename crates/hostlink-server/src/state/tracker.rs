//! Per-category operation state machine.
//!
//! `Idle → Running → {Completed | Failed}`, with a terminal state staying
//! visible until the next accepted start. The record lives behind one mutex,
//! so the check-and-transition in [`OperationTracker::try_begin`] is atomic
//! and status readers never see a half-written result.
//!
//! Every mutator that the host side calls takes the run identifier it was
//! started with. A call whose identifier no longer matches the running
//! record (the run was interrupted, or a newer run replaced it) is ignored.

use super::operation::{
    FailureKind, OperationCategory, OperationRecord, OperationResult, OperationState, Progress,
};
use chrono::Utc;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Result of [`OperationTracker::try_begin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The record moved to `Running` under this new identifier.
    Started { identifier: String },
    /// A run was already in flight; nothing changed.
    AlreadyRunning { identifier: Option<String> },
}

#[derive(Debug)]
pub struct OperationTracker {
    category: OperationCategory,
    record: Mutex<OperationRecord>,
}

impl OperationTracker {
    pub fn new(category: OperationCategory) -> Self {
        Self {
            category,
            record: Mutex::new(OperationRecord::idle(category)),
        }
    }

    pub fn category(&self) -> OperationCategory {
        self.category
    }

    fn lock(&self) -> MutexGuard<'_, OperationRecord> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consistent copy of the record.
    pub fn snapshot(&self) -> OperationRecord {
        self.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_running()
    }

    pub fn running_identifier(&self) -> Option<String> {
        let record = self.lock();
        if record.is_running() {
            record.identifier.clone()
        } else {
            None
        }
    }

    /// `true` while `identifier` is the running run.
    pub fn is_current(&self, identifier: &str) -> bool {
        let record = self.lock();
        record.is_running() && record.identifier.as_deref() == Some(identifier)
    }

    /// Atomically enter `Running` unless a run is already in flight.
    ///
    /// On success the previous result, error and progress are cleared and a
    /// fresh identifier is minted.
    pub fn try_begin(&self, request: serde_json::Value) -> BeginOutcome {
        let mut record = self.lock();
        if record.is_running() {
            return BeginOutcome::AlreadyRunning {
                identifier: record.identifier.clone(),
            };
        }

        let identifier = uuid::Uuid::new_v4().to_string();
        let run_count = record.run_count + 1;
        *record = OperationRecord {
            state: OperationState::Running,
            identifier: Some(identifier.clone()),
            started_at: Some(Utc::now()),
            request: Some(request),
            run_count,
            ..OperationRecord::idle(self.category)
        };
        info!(category = %self.category, %identifier, "operation started");
        BeginOutcome::Started { identifier }
    }

    /// Apply `f` to the record if `identifier` is still the running run.
    fn with_current<R>(
        &self,
        identifier: &str,
        f: impl FnOnce(&mut OperationRecord) -> R,
    ) -> Option<R> {
        let mut record = self.lock();
        if record.is_running() && record.identifier.as_deref() == Some(identifier) {
            Some(f(&mut record))
        } else {
            debug!(category = %self.category, identifier, "ignoring update for a run that is no longer current");
            None
        }
    }

    /// Publish the sub-item count: progress becomes `{0, total, ""}`.
    pub fn begin_progress(&self, identifier: &str, total: u32) -> bool {
        self.with_current(identifier, |record| {
            record.progress = Some(Progress {
                completed: 0,
                total,
                current_item_label: String::new(),
            });
        })
        .is_some()
    }

    /// Name the sub-item about to be processed.
    pub fn set_current_item(&self, identifier: &str, label: &str) -> bool {
        self.with_current(identifier, |record| {
            if let Some(progress) = record.progress.as_mut() {
                progress.current_item_label = label.to_string();
            }
        })
        .is_some()
    }

    /// Count one sub-item as done. `completed` never exceeds `total`.
    pub fn item_done(&self, identifier: &str) -> bool {
        self.with_current(identifier, |record| {
            if let Some(progress) = record.progress.as_mut() {
                progress.completed = (progress.completed + 1).min(progress.total);
            }
        })
        .is_some()
    }

    pub fn mark_host_started(&self, identifier: &str) -> bool {
        self.with_current(identifier, |record| record.host_started = true)
            .is_some()
    }

    pub fn host_started(&self, identifier: &str) -> bool {
        self.with_current(identifier, |record| record.host_started)
            .unwrap_or(false)
    }

    pub fn mark_cancel_requested(&self, identifier: &str) -> bool {
        self.with_current(identifier, |record| record.cancel_requested = true)
            .is_some()
    }

    pub fn cancel_requested(&self, identifier: &str) -> bool {
        self.with_current(identifier, |record| record.cancel_requested)
            .unwrap_or(false)
    }

    /// Record a successful run: result and `Completed` are written together.
    pub fn complete(&self, identifier: &str, result: OperationResult) -> bool {
        self.finish(identifier, Some(result), None)
    }

    /// Record a failed run, optionally with whatever result the host produced.
    pub fn fail(
        &self,
        identifier: &str,
        kind: FailureKind,
        message: impl Into<String>,
        result: Option<OperationResult>,
    ) -> bool {
        self.finish(identifier, result, Some((kind, message.into())))
    }

    fn finish(
        &self,
        identifier: &str,
        result: Option<OperationResult>,
        failure: Option<(FailureKind, String)>,
    ) -> bool {
        let category = self.category;
        self.with_current(identifier, |record| {
            finalize_progress(record);
            record.finished_at = Some(Utc::now());
            record.result = result;
            match failure {
                Some((kind, message)) => {
                    warn!(%category, identifier, ?kind, %message, "operation failed");
                    record.state = OperationState::Failed;
                    record.failure = Some(kind);
                    record.last_error = Some(message);
                }
                None => {
                    info!(%category, identifier, "operation completed");
                    record.state = OperationState::Completed;
                }
            }
        })
        .is_some()
    }

    /// Flip a `Running` record to `Failed(interrupted)`, whatever its
    /// identifier. Used when the queue holding its continuation is gone.
    pub fn interrupt_if_running(&self, message: &str) -> bool {
        let mut record = self.lock();
        if !record.is_running() {
            return false;
        }
        warn!(category = %self.category, identifier = ?record.identifier, "operation interrupted: {message}");
        finalize_progress(&mut record);
        record.state = OperationState::Failed;
        record.failure = Some(FailureKind::Interrupted);
        record.last_error = Some(message.to_string());
        record.finished_at = Some(Utc::now());
        true
    }
}

fn finalize_progress(record: &mut OperationRecord) {
    if let Some(progress) = record.progress.as_mut() {
        progress.completed = progress.total;
        progress.current_item_label.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Barrier};

    fn started(tracker: &OperationTracker) -> String {
        match tracker.try_begin(json!({})) {
            BeginOutcome::Started { identifier } => identifier,
            other => panic!("expected start, got {other:?}"),
        }
    }

    fn build_result() -> OperationResult {
        OperationResult::Build {
            diagnostics: vec![],
            error_count: 0,
            warning_count: 0,
        }
    }

    #[test]
    fn test_begin_while_running_is_rejected_without_change() {
        let tracker = OperationTracker::new(OperationCategory::Build);
        let id = started(&tracker);
        let before = tracker.snapshot();

        let outcome = tracker.try_begin(json!({"again": true}));
        assert_eq!(
            outcome,
            BeginOutcome::AlreadyRunning {
                identifier: Some(id)
            }
        );
        assert_eq!(tracker.snapshot(), before);
    }

    #[test]
    fn test_terminal_state_persists_until_next_start() {
        let tracker = OperationTracker::new(OperationCategory::Build);
        let first = started(&tracker);
        assert!(tracker.fail(&first, FailureKind::InvocationFailed, "2 errors", None));

        let record = tracker.snapshot();
        assert_eq!(record.state, OperationState::Failed);
        assert_eq!(record.last_error.as_deref(), Some("2 errors"));
        assert!(record.finished_at.is_some());

        let second = started(&tracker);
        let record = tracker.snapshot();
        assert_ne!(first, second);
        assert_eq!(record.state, OperationState::Running);
        assert_eq!(record.last_error, None);
        assert_eq!(record.failure, None);
        assert_eq!(record.run_count, 2);
    }

    #[test]
    fn test_stale_identifier_cannot_finish_new_run() {
        let tracker = OperationTracker::new(OperationCategory::Build);
        let old = started(&tracker);
        assert!(tracker.interrupt_if_running("control plane restarted"));
        let current = started(&tracker);

        assert!(!tracker.complete(&old, build_result()));
        assert!(tracker.is_current(&current));
        assert!(tracker.complete(&current, build_result()));
        assert_eq!(tracker.snapshot().state, OperationState::Completed);
    }

    #[test]
    fn test_progress_is_capped_and_finalized() {
        let tracker = OperationTracker::new(OperationCategory::ArtifactBatch);
        let id = started(&tracker);
        tracker.begin_progress(&id, 2);
        tracker.set_current_item(&id, "Water");
        tracker.item_done(&id);
        tracker.item_done(&id);
        tracker.item_done(&id);
        assert_eq!(tracker.snapshot().progress.unwrap().completed, 2);

        tracker.complete(&id, build_result());
        assert_eq!(
            tracker.snapshot().progress,
            Some(Progress {
                completed: 2,
                total: 2,
                current_item_label: String::new(),
            })
        );
    }

    #[test]
    fn test_interrupt_only_touches_running_records() {
        let tracker = OperationTracker::new(OperationCategory::TestRun);
        assert!(!tracker.interrupt_if_running("restart"));
        let id = started(&tracker);
        tracker.mark_cancel_requested(&id);
        assert!(tracker.cancel_requested(&id));
        assert!(tracker.interrupt_if_running("restart"));
        let record = tracker.snapshot();
        assert_eq!(record.failure, Some(FailureKind::Interrupted));
        assert_eq!(tracker.running_identifier(), None);
    }

    #[test]
    fn test_concurrent_begin_admits_exactly_one() {
        let tracker = Arc::new(OperationTracker::new(OperationCategory::Build));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    matches!(tracker.try_begin(json!({})), BeginOutcome::Started { .. })
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(tracker.snapshot().run_count, 1);
    }
}
