//! Host-reported editor flags plus executor bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Flags the host reports on every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorSnapshot {
    pub is_playing: bool,
    pub is_paused: bool,
    pub is_focused: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditorStatus {
    #[serde(flatten)]
    pub host: EditorSnapshot,
    pub tick_count: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Actions drained by the most recent tick.
    pub last_tick_actions: usize,
    /// Queued actions that panicked since the state managers were created.
    pub action_panics: u64,
    /// Successful control-plane starts (first start and every restart).
    pub initializations: u64,
}

#[derive(Debug, Default)]
pub struct EditorStateManager {
    inner: Mutex<EditorStatus>,
}

impl EditorStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EditorStatus> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> EditorStatus {
        self.lock().clone()
    }

    pub fn record_tick(&self, host: EditorSnapshot, drained: usize) {
        let mut status = self.lock();
        status.host = host;
        status.tick_count += 1;
        status.last_tick_at = Some(Utc::now());
        status.last_tick_actions = drained;
    }

    pub fn record_panic(&self) {
        self.lock().action_panics += 1;
    }

    pub fn record_initialization(&self) {
        self.lock().initializations += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_updates_flags_and_counters() {
        let editor = EditorStateManager::new();
        editor.record_tick(
            EditorSnapshot {
                is_playing: true,
                ..EditorSnapshot::default()
            },
            3,
        );
        editor.record_tick(EditorSnapshot::default(), 0);
        editor.record_panic();

        let status = editor.snapshot();
        assert_eq!(status.tick_count, 2);
        assert!(!status.host.is_playing);
        assert_eq!(status.last_tick_actions, 0);
        assert_eq!(status.action_panics, 1);
        assert!(status.last_tick_at.is_some());
    }

    #[test]
    fn test_status_flattens_host_flags() {
        let value = serde_json::to_value(EditorStatus::default()).unwrap();
        assert_eq!(value["is_playing"], false);
        assert_eq!(value["tick_count"], 0);
    }
}
