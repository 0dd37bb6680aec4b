//! Aggregate of every state manager owned by one host process.

use super::editor::EditorStateManager;
use super::operation::{OperationCategory, OperationRecord};
use super::settings::SettingsStateManager;
use super::tracker::OperationTracker;
use hostlink_core::config::Config;
use std::sync::Arc;

/// Lives as long as the host process. A state-preserving reload of the
/// control plane reuses the same instance, so status survives it.
#[derive(Debug)]
pub struct StateManagers {
    pub build: OperationTracker,
    pub test_run: OperationTracker,
    pub artifact_batch: OperationTracker,
    pub index_refresh: OperationTracker,
    pub editor: EditorStateManager,
    pub settings: SettingsStateManager,
}

pub type SharedState = Arc<StateManagers>;

impl StateManagers {
    pub fn new(config: Config) -> Self {
        Self {
            build: OperationTracker::new(OperationCategory::Build),
            test_run: OperationTracker::new(OperationCategory::TestRun),
            artifact_batch: OperationTracker::new(OperationCategory::ArtifactBatch),
            index_refresh: OperationTracker::new(OperationCategory::IndexRefresh),
            editor: EditorStateManager::new(),
            settings: SettingsStateManager::new(config),
        }
    }

    pub fn shared(config: Config) -> SharedState {
        Arc::new(Self::new(config))
    }

    pub fn tracker(&self, category: OperationCategory) -> &OperationTracker {
        match category {
            OperationCategory::Build => &self.build,
            OperationCategory::TestRun => &self.test_run,
            OperationCategory::ArtifactBatch => &self.artifact_batch,
            OperationCategory::IndexRefresh => &self.index_refresh,
        }
    }

    pub fn snapshot(&self, category: OperationCategory) -> OperationRecord {
        self.tracker(category).snapshot()
    }

    /// First running category among `categories`, if any.
    pub fn first_running(&self, categories: &[OperationCategory]) -> Option<OperationCategory> {
        categories
            .iter()
            .copied()
            .find(|c| self.tracker(*c).is_running())
    }

    /// Fail every running record with `interrupted`. Returns how many flipped.
    pub fn interrupt_running(&self, message: &str) -> usize {
        OperationCategory::ALL
            .iter()
            .filter(|c| self.tracker(**c).interrupt_if_running(message))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tracker::BeginOutcome;
    use serde_json::json;

    #[test]
    fn test_tracker_lookup_matches_category() {
        let state = StateManagers::new(Config::default());
        for category in OperationCategory::ALL {
            assert_eq!(state.tracker(category).category(), category);
        }
    }

    #[test]
    fn test_first_running_and_interrupt() {
        let state = StateManagers::new(Config::default());
        assert_eq!(state.first_running(&OperationCategory::ALL), None);

        assert!(matches!(
            state.build.try_begin(json!({})),
            BeginOutcome::Started { .. }
        ));
        assert_eq!(
            state.first_running(OperationCategory::TestRun.dependencies()),
            Some(OperationCategory::Build)
        );
        assert_eq!(state.first_running(&[OperationCategory::IndexRefresh]), None);

        assert_eq!(state.interrupt_running("shutdown"), 1);
        assert_eq!(state.interrupt_running("shutdown"), 0);
    }
}
