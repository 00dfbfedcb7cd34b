//! Sync operations, scheduling and engine state.

pub mod backup;
pub mod gate;
pub mod ignore;
pub mod inspector;
pub mod message;
pub mod pull;
pub mod recovery;
pub mod scheduler;
pub mod state;

pub use backup::{commit_and_push, ensure_identity};
pub use gate::{GatePermit, SyncGate};
pub use ignore::IgnoreSet;
pub use inspector::RepoInspector;
pub use message::render_commit_message;
pub use pull::pull_from_remote;
pub use recovery::{recover, RecoveryReport};
pub use scheduler::{Scheduler, TriggerResult, WorkerContext};
pub use state::{
    CycleAction, CycleOutcome, CycleReport, ErrorInfo, StatusSnapshot, SyncState, TriggerKind,
};
