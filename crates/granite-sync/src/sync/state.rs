//! Engine state and the published status snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, SyncError};
use crate::git::{CommitResult, PullResult};

/// What caused a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Scheduled,
    Manual,
    Startup,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Scheduled => write!(f, "scheduled"),
            TriggerKind::Manual => write!(f, "manual"),
            TriggerKind::Startup => write!(f, "startup"),
        }
    }
}

/// The operation a cycle runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleAction {
    Backup,
    Pull,
}

impl std::fmt::Display for CycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleAction::Backup => write!(f, "backup"),
            CycleAction::Pull => write!(f, "pull"),
        }
    }
}

/// A recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl ErrorInfo {
    pub fn from_error(error: &SyncError, at: DateTime<Utc>) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            at,
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// A commit was created; `push_error` is set when the push failed.
    Committed {
        commit: CommitResult,
        pushed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        push_error: Option<ErrorInfo>,
    },
    /// Remote history was integrated.
    Pulled { pull: PullResult },
    /// Nothing to do; not an error.
    Skipped { reason: String },
    /// The cycle failed.
    Failed { error: ErrorInfo },
}

/// Summary of one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub id: Uuid,
    pub trigger: TriggerKind,
    pub action: CycleAction,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: CycleOutcome,
}

/// Read-only view of the engine state, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub enabled: bool,
    pub backup_count: u64,
    pub last_backup_time: Option<DateTime<Utc>>,
    pub timer_armed: bool,
    pub last_error: Option<ErrorInfo>,
    pub last_outcome: Option<CycleReport>,
    pub config_version: u64,
}

/// Engine state, owned and mutated by the worker only.
#[derive(Debug, Clone)]
pub struct SyncState {
    enabled: bool,
    backup_count: u64,
    last_backup_time: Option<DateTime<Utc>>,
    last_error: Option<ErrorInfo>,
    timer_armed: bool,
    last_outcome: Option<CycleReport>,
    config_version: u64,
}

impl SyncState {
    pub fn new(enabled: bool, config_version: u64) -> Self {
        Self {
            enabled,
            backup_count: 0,
            last_backup_time: None,
            last_error: None,
            timer_armed: false,
            last_outcome: None,
            config_version,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_timer_armed(&mut self, armed: bool) {
        self.timer_armed = armed;
    }

    pub fn set_config_version(&mut self, version: u64) {
        self.config_version = version;
    }

    /// Applies a finished cycle to the counters and error slot.
    pub fn record(&mut self, report: CycleReport) {
        match &report.outcome {
            CycleOutcome::Committed { push_error, .. } => {
                self.backup_count += 1;
                self.last_backup_time = Some(report.started_at);
                // The commit succeeded; only a failed push is left to report.
                self.last_error = push_error.clone();
            }
            // Nothing to commit still means every check passed.
            CycleOutcome::Pulled { .. } | CycleOutcome::Skipped { .. } => {
                self.last_error = None;
            }
            CycleOutcome::Failed { error } => {
                self.last_error = Some(error.clone());
            }
        }
        self.last_outcome = Some(report);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            enabled: self.enabled,
            backup_count: self.backup_count,
            last_backup_time: self.last_backup_time,
            timer_armed: self.timer_armed,
            last_error: self.last_error.clone(),
            last_outcome: self.last_outcome.clone(),
            config_version: self.config_version,
        }
    }
}
