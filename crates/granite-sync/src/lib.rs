pub mod config;
pub mod engine;
pub mod error;
pub mod git;
pub mod keys;
pub mod logging;
pub mod sync;

pub use config::{
    ConfigHandle, JsonSettingsStore, MemorySettingsStore, SettingsPatch, SettingsStore, SyncConfig,
};
pub use engine::{ControlResponse, EngineOptions, SyncEngine};
pub use error::{classify_git_error, ErrorKind, Result, SyncError};
pub use git::{
    CommandOutput, CommandRunner, CommandSpec, CommitResult, GitRepository, ProcessRunner,
    PullResult, PullStrategy,
};
pub use keys::{ConnectionStatus, KeyManager, KeyPair};
pub use logging::{init_logging, LogFormat};
pub use sync::{CycleAction, CycleOutcome, CycleReport, ErrorInfo, StatusSnapshot, TriggerKind};
