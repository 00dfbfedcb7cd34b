//! Background sync worker and its scheduling handle.
//!
//! A single worker thread runs its own current-thread tokio runtime, owns
//! the interval timer and the [`SyncState`], and executes every cycle in
//! order. Callers talk to it through [`Scheduler`], which only sends
//! commands and reads the published [`StatusSnapshot`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{ConfigHandle, SyncConfig};
use crate::error::{Result, SyncError};
use crate::git::auth::transport_env;
use crate::git::{CommandRunner, GitRepository};

use super::backup::commit_and_push;
use super::gate::{GatePermit, SyncGate};
use super::pull::pull_from_remote;
use super::state::{
    CycleAction, CycleOutcome, CycleReport, ErrorInfo, StatusSnapshot, SyncState, TriggerKind,
};

/// Stand-in for an unreachable first tick (about 30 years).
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Result of asking for an immediate cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    /// The job was queued and holds the gate.
    Started,
    /// Another job holds the gate; this request was dropped.
    AlreadyRunning,
    /// The worker has shut down.
    Stopped,
}

enum WorkerCommand {
    Run {
        kind: TriggerKind,
        action: CycleAction,
        permit: GatePermit,
    },
    Startup,
    Arm,
    Disarm,
    SetEnabled(bool),
    ConfigReplaced(u64),
    Shutdown,
}

/// Everything the worker needs to build a repository for a cycle.
pub struct WorkerContext {
    pub config: Arc<ConfigHandle>,
    pub runner: Arc<dyn CommandRunner>,
    pub git_program: String,
    pub notes_root: PathBuf,
}

impl WorkerContext {
    fn repository(&self, config: &SyncConfig) -> GitRepository {
        let ssh_key = config.ssh_key();
        GitRepository::new(
            Arc::clone(&self.runner),
            self.git_program.clone(),
            config.working_dir(&self.notes_root),
        )
        .with_timeout(config.command_timeout())
        .with_transport_env(transport_env(ssh_key.as_deref()))
    }
}

/// Handle to the background worker.
pub struct Scheduler {
    tx: mpsc::UnboundedSender<WorkerCommand>,
    gate: SyncGate,
    status_rx: watch::Receiver<StatusSnapshot>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Starts the worker thread. The timer stays disarmed until
    /// [`Scheduler::startup`] or [`Scheduler::arm`].
    pub fn spawn(context: WorkerContext, enabled: bool) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let gate = SyncGate::new();
        let state = SyncState::new(enabled, context.config.version());
        let (status_tx, status_rx) = watch::channel(state.snapshot());

        let worker = Worker {
            context,
            gate: gate.clone(),
            state,
            status_tx,
            timer: None,
            started: false,
        };

        let handle = std::thread::Builder::new()
            .name("granite-sync-worker".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        log::error!("Failed to start sync worker runtime: {}", e);
                        return;
                    }
                };
                rt.block_on(worker.run(rx));
            })
            .map_err(|source| SyncError::Spawn {
                program: "sync worker".to_string(),
                source,
            })?;

        Ok(Self {
            tx,
            gate,
            status_rx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queues a cycle if the gate is open.
    pub fn trigger_now(&self, kind: TriggerKind, action: CycleAction) -> TriggerResult {
        let Some(permit) = self.gate.try_acquire() else {
            log::info!("{} {} dropped, sync already running", kind, action);
            return TriggerResult::AlreadyRunning;
        };
        match self.tx.send(WorkerCommand::Run {
            kind,
            action,
            permit,
        }) {
            Ok(()) => TriggerResult::Started,
            Err(_) => TriggerResult::Stopped,
        }
    }

    /// Runs the startup pull (if configured) and then arms the timer.
    pub fn startup(&self) -> Result<()> {
        self.send(WorkerCommand::Startup)
    }

    /// (Re)starts the timer with the current interval.
    pub fn arm(&self) -> Result<()> {
        self.send(WorkerCommand::Arm)
    }

    pub fn disarm(&self) -> Result<()> {
        self.send(WorkerCommand::Disarm)
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        self.send(WorkerCommand::SetEnabled(enabled))
    }

    /// Tells the worker a new config is live; an armed timer is re-armed
    /// with the new interval.
    pub fn config_replaced(&self, version: u64) -> Result<()> {
        self.send(WorkerCommand::ConfigReplaced(version))
    }

    /// Asks the worker to stop after the current cycle. Does not wait.
    pub fn shutdown(&self) {
        // Already gone is fine.
        let _ = self.tx.send(WorkerCommand::Shutdown);
    }

    /// Waits for the worker thread to exit.
    pub fn join(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Sync worker thread panicked");
            }
        }
    }

    /// The last published snapshot.
    pub fn status(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_held()
    }

    fn send(&self, command: WorkerCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| SyncError::WorkerStopped)
    }
}

enum Event {
    Command(Option<WorkerCommand>),
    Tick,
}

struct Worker {
    context: WorkerContext,
    gate: SyncGate,
    state: SyncState,
    status_tx: watch::Sender<StatusSnapshot>,
    timer: Option<Interval>,
    started: bool,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkerCommand>) {
        log::debug!("Sync worker started");
        loop {
            let event = match self.timer.as_mut() {
                // Commands first: a queued disable or shutdown beats a due tick.
                Some(timer) => tokio::select! {
                    biased;
                    command = rx.recv() => Event::Command(command),
                    _ = timer.tick() => Event::Tick,
                },
                None => Event::Command(rx.recv().await),
            };

            let command = match event {
                Event::Tick => {
                    self.on_tick().await;
                    continue;
                }
                Event::Command(Some(command)) => command,
                // Every handle is gone.
                Event::Command(None) => break,
            };

            match command {
                WorkerCommand::Run {
                    kind,
                    action,
                    permit,
                } => {
                    if self.state.enabled() {
                        self.run_cycle(kind, action, Some(permit)).await;
                    } else {
                        log::info!("Git sync disabled, dropping queued {}", action);
                    }
                }
                WorkerCommand::Startup => self.on_startup().await,
                WorkerCommand::Arm => self.arm(),
                WorkerCommand::Disarm => self.disarm(),
                WorkerCommand::SetEnabled(enabled) => self.set_enabled(enabled),
                WorkerCommand::ConfigReplaced(version) => {
                    self.state.set_config_version(version);
                    if self.timer.is_some() {
                        self.arm();
                    } else {
                        self.publish();
                    }
                }
                WorkerCommand::Shutdown => break,
            }
        }

        self.timer = None;
        self.state.set_timer_armed(false);
        self.publish();
        log::info!("Sync worker stopped");
    }

    async fn on_tick(&mut self) {
        if !self.state.enabled() {
            return;
        }
        match self.gate.try_acquire() {
            Some(permit) => {
                self.run_cycle(TriggerKind::Scheduled, CycleAction::Backup, Some(permit))
                    .await
            }
            None => log::debug!("Scheduled backup skipped, sync already running"),
        }
    }

    async fn on_startup(&mut self) {
        if self.started {
            log::debug!("Startup already handled");
            return;
        }
        self.started = true;
        if !self.state.enabled() {
            log::info!("Git sync disabled, not arming");
            self.publish();
            return;
        }

        if self.context.config.load().pull_on_startup {
            // A held gate means a manual job is queued behind this command;
            // the worker runs both in order either way.
            let permit = self.gate.try_acquire();
            if permit.is_none() {
                log::debug!("Startup pull runs ahead of a queued job");
            }
            self.run_cycle(TriggerKind::Startup, CycleAction::Pull, permit)
                .await;
        }
        self.arm();
    }

    fn arm(&mut self) {
        if !self.state.enabled() {
            log::debug!("Git sync disabled, timer stays disarmed");
            return;
        }
        let period = self.context.config.load().interval();
        let now = Instant::now();
        // An interval too long to represent never fires.
        let start = now
            .checked_add(period)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let mut timer = tokio::time::interval_at(start, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
        self.state.set_timer_armed(true);
        self.publish();
        log::info!("Backup timer armed every {}s", period.as_secs());
    }

    fn disarm(&mut self) {
        if self.timer.take().is_some() {
            log::info!("Backup timer disarmed");
        }
        self.state.set_timer_armed(false);
        self.publish();
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.state.set_enabled(enabled);
        if enabled {
            if self.started && self.timer.is_none() {
                self.arm();
            } else {
                self.publish();
            }
        } else {
            self.disarm();
        }
        log::info!("Git sync {}", if enabled { "enabled" } else { "disabled" });
    }

    async fn run_cycle(
        &mut self,
        kind: TriggerKind,
        action: CycleAction,
        permit: Option<GatePermit>,
    ) {
        let config = self.context.config.load();
        let repo = self.context.repository(&config);
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = tracing::info_span!("sync_cycle", %id, trigger = %kind, %action);

        let result = async {
            log::info!("Starting {} {}", kind, action);
            match action {
                CycleAction::Backup => commit_and_push(&repo, &config, started_at).await,
                CycleAction::Pull => pull_from_remote(&repo, &config)
                    .await
                    .map(|pull| CycleOutcome::Pulled { pull }),
            }
        }
        .instrument(span)
        .await;

        let finished_at = Utc::now();
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("{} {} failed: {}", kind, action, e);
                CycleOutcome::Failed {
                    error: ErrorInfo::from_error(&e, finished_at),
                }
            }
        };

        self.state.record(CycleReport {
            id,
            trigger: kind,
            action,
            started_at,
            finished_at,
            outcome,
        });
        // Release before publishing so observers of the report see an open gate.
        drop(permit);
        self.publish();
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.state.snapshot());
    }
}
