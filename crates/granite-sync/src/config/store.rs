//! Settings persistence.
//!
//! The engine reads its configuration from a [`SettingsStore`] at startup
//! and after external updates, and writes back only when settings change
//! through its own control surface.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};

use super::schema::SyncConfig;
use crate::error::{Result, SyncError};

/// Persistence collaborator for [`SyncConfig`].
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<SyncConfig>;
    fn save(&self, config: &SyncConfig) -> Result<()>;
}

/// Stores the sync settings inside a shared `user-settings.json`.
///
/// The config lives under `plugins.git`; other keys in the file are kept
/// as they are. A missing file or section loads the defaults.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
}

impl JsonSettingsStore {
    pub const SECTION: &'static str = "plugins";
    pub const KEY: &'static str = "git";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Value> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Value::Object(Map::new())),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Object(Map::new())),
            Err(e) => Err(SyncError::ReadSettings {
                path: self.path.clone(),
                source: e,
            }),
        }
    }

    fn write_document(&self, document: &Value) -> Result<()> {
        let write_err = |source| SyncError::WriteSettings {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let content = serde_json::to_string_pretty(document)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content).map_err(write_err)?;
        std::fs::rename(&tmp_path, &self.path).map_err(write_err)?;
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load(&self) -> Result<SyncConfig> {
        let document = self.read_document()?;
        let mut config = match document.get(Self::SECTION).and_then(|s| s.get(Self::KEY)) {
            Some(value) => serde_json::from_value(value.clone())?,
            None => {
                log::debug!(
                    "No git settings in {}, using defaults",
                    self.path.display()
                );
                SyncConfig::default()
            }
        };
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn save(&self, config: &SyncConfig) -> Result<()> {
        let mut document = self.read_document()?;
        if !document.is_object() {
            log::warn!(
                "Settings file {} is not a JSON object, replacing it",
                self.path.display()
            );
            document = Value::Object(Map::new());
        }

        let root = document
            .as_object_mut()
            .ok_or_else(|| SyncError::InvalidConfig("settings root is not an object".into()))?;
        let section = root
            .entry(Self::SECTION)
            .or_insert_with(|| Value::Object(Map::new()));
        if !section.is_object() {
            *section = Value::Object(Map::new());
        }
        if let Some(section) = section.as_object_mut() {
            section.insert(Self::KEY.to_string(), serde_json::to_value(config)?);
        }

        self.write_document(&document)
    }
}

/// In-memory store, for embedding without a settings file and for tests.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    config: Mutex<SyncConfig>,
    saves: Mutex<usize>,
}

impl MemorySettingsStore {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config: Mutex::new(config),
            saves: Mutex::new(0),
        }
    }

    /// Number of times `save` has been called.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the stored config, as an external editor of the settings would.
    pub fn set(&self, config: SyncConfig) {
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = config;
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<SyncConfig> {
        Ok(self.config.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, config: &SyncConfig) -> Result<()> {
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = config.clone();
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}
