//! Sync configuration: schema, persistence and the live handle.

pub mod schema;
pub mod store;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

pub use schema::{SettingsPatch, SyncConfig};
pub use store::{JsonSettingsStore, MemorySettingsStore, SettingsStore};

/// Atomically swappable configuration.
///
/// Readers take an `Arc` snapshot; a cycle keeps the snapshot it started
/// with even if the config is replaced mid-cycle.
#[derive(Debug)]
pub struct ConfigHandle {
    current: RwLock<Arc<SyncConfig>>,
    version: AtomicU64,
}

impl ConfigHandle {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            version: AtomicU64::new(1),
        }
    }

    /// Returns the current config snapshot.
    pub fn load(&self) -> Arc<SyncConfig> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Replaces the config and returns the new version number.
    pub fn replace(&self, config: SyncConfig) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(config);
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_survives_replace() {
        let handle = ConfigHandle::new(SyncConfig::default());
        let before = handle.load();
        assert_eq!(handle.version(), 1);

        let version = handle.replace(SyncConfig {
            interval_seconds: 30,
            ..Default::default()
        });

        assert_eq!(version, 2);
        assert_eq!(handle.version(), 2);
        assert_eq!(before.interval_seconds, 600);
        assert_eq!(handle.load().interval_seconds, 30);
    }
}
