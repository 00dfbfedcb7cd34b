//! Engine facade: control surface and lifecycle hooks.
//!
//! Every control call returns without waiting for git. Triggers hand a job
//! to the worker and report whether it was queued; status reads the last
//! published snapshot and never touches the gate.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::{ConfigHandle, SettingsPatch, SettingsStore, SyncConfig};
use crate::error::{Result, SyncError};
use crate::git::{CommandRunner, ProcessRunner};
use crate::keys::{
    ensure_outside_tree, resolve_key_email, ConnectionStatus, KeyManager, DEFAULT_TEST_HOST,
};
use crate::sync::{
    CycleAction, CycleReport, Scheduler, StatusSnapshot, TriggerKind, TriggerResult,
    WorkerContext,
};

/// Host-provided engine parameters.
#[derive(Clone)]
pub struct EngineOptions {
    /// Working tree used when the settings do not set `repo_path`.
    pub notes_root: PathBuf,
    /// Git executable.
    pub git_program: String,
    /// Private key managed by the key operations; defaults to the
    /// configured `ssh_key_path`, then `~/.ssh/id_ed25519`.
    pub key_path: Option<PathBuf>,
    pub runner: Arc<dyn CommandRunner>,
    /// Initial enabled state.
    pub enabled: bool,
}

impl EngineOptions {
    pub fn new(notes_root: impl Into<PathBuf>) -> Self {
        Self {
            notes_root: notes_root.into(),
            git_program: "git".to_string(),
            key_path: None,
            runner: Arc::new(ProcessRunner),
            enabled: true,
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_git_program(mut self, program: impl Into<String>) -> Self {
        self.git_program = program.into();
        self
    }

    pub fn with_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Outcome of a control call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// The synchronization engine.
pub struct SyncEngine {
    store: Arc<dyn SettingsStore>,
    config: Arc<ConfigHandle>,
    scheduler: Scheduler,
    runner: Arc<dyn CommandRunner>,
    notes_root: PathBuf,
    key_path: Option<PathBuf>,
    enabled: AtomicBool,
    /// Serializes read-modify-write of the settings.
    settings_lock: Mutex<()>,
}

impl SyncEngine {
    /// Loads the settings and starts the worker. The timer stays disarmed
    /// until [`SyncEngine::on_startup`].
    ///
    /// Unreadable settings fall back to defaults; the file is left alone.
    pub fn new(store: Arc<dyn SettingsStore>, options: EngineOptions) -> Result<Self> {
        let config = match store.load() {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load git sync settings, using defaults: {}", e);
                SyncConfig::default()
            }
        };
        let config = Arc::new(ConfigHandle::new(config));

        let scheduler = Scheduler::spawn(
            WorkerContext {
                config: Arc::clone(&config),
                runner: Arc::clone(&options.runner),
                git_program: options.git_program.clone(),
                notes_root: options.notes_root.clone(),
            },
            options.enabled,
        )?;

        Ok(Self {
            store,
            config,
            scheduler,
            runner: options.runner,
            notes_root: options.notes_root,
            key_path: options.key_path,
            enabled: AtomicBool::new(options.enabled),
            settings_lock: Mutex::new(()),
        })
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Queues the startup pull (when `pull_on_startup`) and arms the timer.
    /// Returns immediately; a failed pull leaves the engine running with
    /// `last_error` set.
    pub fn on_startup(&self) -> Result<()> {
        log::info!("Git sync starting");
        self.scheduler.startup()
    }

    /// Disarms the timer and stops the worker without waiting for an
    /// in-flight cycle.
    pub fn on_shutdown(&self) {
        log::info!("Git sync shutting down");
        if let Err(e) = self.scheduler.disarm() {
            log::debug!("Disarm on shutdown: {}", e);
        }
        self.scheduler.shutdown();
    }

    /// Blocks until the worker thread has exited.
    pub fn join(&self) {
        self.scheduler.join();
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn get_status(&self) -> StatusSnapshot {
        self.scheduler.status()
    }

    /// Receiver that is notified whenever the snapshot changes.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.scheduler.subscribe()
    }

    /// Id of the most recent cycle, if any.
    pub fn last_cycle_id(&self) -> Option<Uuid> {
        self.get_status().last_outcome.map(|report| report.id)
    }

    /// Waits until a cycle other than `previous` has been recorded.
    pub async fn wait_for_cycle(&self, previous: Option<Uuid>) -> Result<CycleReport> {
        let mut rx = self.subscribe();
        let report = rx
            .wait_for(|status| status.last_outcome.as_ref().map(|r| r.id) != previous)
            .await
            .map_err(|_| SyncError::WorkerStopped)?
            .last_outcome
            .clone();
        report.ok_or(SyncError::WorkerStopped)
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub fn get_settings(&self) -> SyncConfig {
        self.config.load().as_ref().clone()
    }

    /// Validates, persists and activates a partial update.
    ///
    /// On any failure the active config is unchanged.
    pub fn update_settings(&self, patch: &SettingsPatch) -> ControlResponse {
        let _guard = self
            .settings_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let current = self.config.load();
        let next = match patch.apply(&current) {
            Ok(next) => next,
            Err(e) => {
                log::warn!("Rejected settings update: {}", e);
                return ControlResponse::err(e.to_string());
            }
        };

        if next == *current {
            return ControlResponse::ok("Settings unchanged");
        }

        if let Err(e) = self.store.save(&next) {
            log::error!("Failed to persist git sync settings: {}", e);
            return ControlResponse::err(e.to_string());
        }

        let interval_changed = next.interval_seconds != current.interval_seconds;
        self.activate(next);
        if interval_changed {
            log::info!("Backup interval updated to {}s", self.config.load().interval_seconds);
        }
        ControlResponse::ok("Settings updated")
    }

    /// Re-reads the store after an external change.
    pub fn reload_settings(&self) -> ControlResponse {
        let _guard = self
            .settings_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match self.store.load() {
            Ok(config) => {
                self.activate(config);
                ControlResponse::ok("Settings reloaded")
            }
            Err(e) => {
                log::error!("Failed to reload git sync settings: {}", e);
                ControlResponse::err(e.to_string())
            }
        }
    }

    fn activate(&self, config: SyncConfig) {
        let version = self.config.replace(config);
        if let Err(e) = self.scheduler.config_replaced(version) {
            log::warn!("Settings stored but worker not notified: {}", e);
        }
    }

    pub fn set_enabled(&self, enabled: bool) -> ControlResponse {
        self.enabled.store(enabled, Ordering::Release);
        match self.scheduler.set_enabled(enabled) {
            Ok(()) if enabled => ControlResponse::ok("Git sync enabled"),
            Ok(()) => ControlResponse::ok("Git sync disabled"),
            Err(e) => ControlResponse::err(e.to_string()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Manual triggers
    // ------------------------------------------------------------------

    pub fn trigger_backup(&self) -> ControlResponse {
        self.trigger(CycleAction::Backup)
    }

    pub fn trigger_pull(&self) -> ControlResponse {
        self.trigger(CycleAction::Pull)
    }

    fn trigger(&self, action: CycleAction) -> ControlResponse {
        if !self.is_enabled() {
            return ControlResponse::err("Git sync is disabled");
        }

        let label = match action {
            CycleAction::Backup => "Backup",
            CycleAction::Pull => "Pull",
        };
        match self.scheduler.trigger_now(TriggerKind::Manual, action) {
            TriggerResult::Started => {
                log::info!("Manual {} triggered", action);
                let mut message = format!("{} started", label);
                if let Some(error) = self.get_status().last_error {
                    message.push_str(&format!(" (last error: {})", error.message));
                }
                ControlResponse::ok(message)
            }
            TriggerResult::AlreadyRunning => {
                ControlResponse::err("Sync already running")
            }
            TriggerResult::Stopped => ControlResponse::err(SyncError::WorkerStopped.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Keys
    // ------------------------------------------------------------------

    /// Manager for the active key location. Refuses a location inside the
    /// working tree, where a backup would commit the private key.
    fn key_manager(&self) -> Result<KeyManager> {
        let config = self.config.load();
        let runner = Arc::clone(&self.runner);
        let manager = match self.key_path.clone().or_else(|| config.ssh_key()) {
            Some(path) => KeyManager::new(runner, path),
            None => KeyManager::with_default_path(runner),
        };
        let tree = config.working_dir(&self.notes_root);
        ensure_outside_tree(&manager.key_pair().private_path, &tree)?;
        Ok(manager)
    }

    /// Creates a key pair; refuses if one exists.
    pub async fn generate_key(&self, email: Option<&str>) -> ControlResponse {
        let config = self.config.load();
        let email = resolve_key_email(email, config.identity_email.as_deref());
        let manager = match self.key_manager() {
            Ok(manager) => manager,
            Err(e) => return ControlResponse::err(e.to_string()),
        };
        match manager.generate(&email).await {
            Ok(pair) => ControlResponse::ok(format!(
                "SSH key generated at {}",
                pair.private_path.display()
            )),
            Err(e) => ControlResponse::err(e.to_string()),
        }
    }

    /// Replaces the key pair. Any host trusting the old key must be updated.
    pub async fn regenerate_key(&self, email: Option<&str>) -> ControlResponse {
        let config = self.config.load();
        let email = resolve_key_email(email, config.identity_email.as_deref());
        let manager = match self.key_manager() {
            Ok(manager) => manager,
            Err(e) => return ControlResponse::err(e.to_string()),
        };
        match manager.regenerate(&email).await {
            Ok(pair) => ControlResponse::ok(format!(
                "SSH key regenerated at {}",
                pair.private_path.display()
            )),
            Err(e) => ControlResponse::err(e.to_string()),
        }
    }

    /// Returns the public key in `message`.
    pub async fn get_public_key(&self) -> ControlResponse {
        let manager = match self.key_manager() {
            Ok(manager) => manager,
            Err(e) => return ControlResponse::err(e.to_string()),
        };
        match manager.public_key().await {
            Ok(key) => ControlResponse::ok(key),
            Err(e) => ControlResponse::err(e.to_string()),
        }
    }

    pub async fn test_key_connection(&self, host: Option<&str>) -> ControlResponse {
        let host = host
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .unwrap_or(DEFAULT_TEST_HOST);
        let manager = match self.key_manager() {
            Ok(manager) => manager,
            Err(e) => return ControlResponse::err(e.to_string()),
        };
        match manager.test_connection(host).await {
            Ok(ConnectionStatus::Authenticated) => {
                ControlResponse::ok(format!("Successfully connected to {}", host))
            }
            Ok(ConnectionStatus::PermissionDenied) => ControlResponse::err(format!(
                "Permission denied. Add your public key to {}",
                host
            )),
            Ok(ConnectionStatus::Unrecognized(output)) if output.is_empty() => {
                ControlResponse::err(format!("No response from {}", host))
            }
            Ok(ConnectionStatus::Unrecognized(output)) => ControlResponse::err(output),
            Err(e) => ControlResponse::err(e.to_string()),
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}
