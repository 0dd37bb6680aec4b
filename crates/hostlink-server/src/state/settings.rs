//! Cached configuration snapshot, refreshed in the background.

use chrono::{DateTime, Utc};
use hostlink_core::config::{Config, ConfigSource};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

#[derive(Debug)]
struct Cached {
    config: Arc<Config>,
    refreshed_at: DateTime<Utc>,
}

/// Readers get a cheap `Arc` clone; timing values read at the moment of use
/// pick up edits to the config files without a restart.
#[derive(Debug)]
pub struct SettingsStateManager {
    inner: Mutex<Cached>,
}

impl SettingsStateManager {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Mutex::new(Cached {
                config: Arc::new(config),
                refreshed_at: Utc::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cached> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> Arc<Config> {
        Arc::clone(&self.lock().config)
    }

    pub fn refreshed_at(&self) -> DateTime<Utc> {
        self.lock().refreshed_at
    }

    pub fn replace(&self, config: Config) {
        let mut cached = self.lock();
        if *cached.config != config {
            debug!("settings snapshot changed");
        }
        cached.config = Arc::new(config);
        cached.refreshed_at = Utc::now();
    }

    /// Re-resolve from `source`. A broken config keeps the previous snapshot.
    pub fn refresh_from(&self, source: &ConfigSource) -> bool {
        match source.resolve() {
            Ok(config) => {
                self.replace(config);
                true
            }
            Err(e) => {
                warn!("keeping previous settings: {e}");
                false
            }
        }
    }
}
