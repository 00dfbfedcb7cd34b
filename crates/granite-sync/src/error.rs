//! Error types for the sync engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while synchronizing the notes repository.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Executable not found: {0}")]
    ToolMissing(String),

    #[error("Not a git repository: '{0}'. Initialize it manually before enabling sync")]
    NotARepository(PathBuf),

    #[error("Git user identity is not configured. Set identity_name and identity_email in settings")]
    IdentityMissing,

    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Git remote is not configured: {0}")]
    RemoteMissing(String),

    #[error("Git integration conflict: {0}")]
    IntegrationConflict(String),

    #[error("Git network error: {0}")]
    Network(String),

    #[error("Git authentication failed: {0}")]
    AuthFailed(String),

    #[error("'{program}' timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read settings from '{path}': {source}")]
    ReadSettings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write settings to '{path}': {source}")]
    WriteSettings {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON: {0}")]
    ParseSettings(#[from] serde_json::Error),

    #[error("SSH key already exists at {0}")]
    KeyExists(PathBuf),

    #[error("No SSH public key found at {0}. Generate one first")]
    KeyNotFound(PathBuf),

    #[error("SSH key path {0} is inside the synchronized notes tree. Choose a location outside it")]
    KeyInsideTree(PathBuf),

    #[error("SSH key operation failed: {0}")]
    KeyOperation(String),

    #[error("Sync worker is not running")]
    WorkerStopped,
}

/// Coarse classification of failures, surfaced through the status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Git missing or the directory is not a repository.
    Environment,
    /// Identity, remote or settings problems the operator has to fix.
    Configuration,
    /// Pull/rebase/merge could not integrate remote history.
    IntegrationConflict,
    /// Transport failure: unreachable remote or rejected credentials.
    NetworkAuth,
    /// A command exceeded its time bound and was killed.
    Timeout,
    /// Any other git failure.
    Operation,
    /// Settings or key files could not be read or written.
    Storage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Environment => write!(f, "environment"),
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::IntegrationConflict => write!(f, "integration_conflict"),
            ErrorKind::NetworkAuth => write!(f, "network_auth"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Operation => write!(f, "operation"),
            ErrorKind::Storage => write!(f, "storage"),
        }
    }
}

impl SyncError {
    /// Returns the taxonomy bucket this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::ToolMissing(_) | SyncError::NotARepository(_) => ErrorKind::Environment,
            SyncError::IdentityMissing
            | SyncError::InvalidConfig(_)
            | SyncError::RemoteMissing(_)
            | SyncError::KeyInsideTree(_) => ErrorKind::Configuration,
            SyncError::IntegrationConflict(_) => ErrorKind::IntegrationConflict,
            SyncError::Network(_) | SyncError::AuthFailed(_) => ErrorKind::NetworkAuth,
            SyncError::Timeout { .. } => ErrorKind::Timeout,
            SyncError::GitOperation(_) | SyncError::Spawn { .. } | SyncError::WorkerStopped => {
                ErrorKind::Operation
            }
            SyncError::ReadSettings { .. }
            | SyncError::WriteSettings { .. }
            | SyncError::ParseSettings(_)
            | SyncError::KeyExists(_)
            | SyncError::KeyNotFound(_)
            | SyncError::KeyOperation(_) => ErrorKind::Storage,
        }
    }

    /// Returns true if the next scheduled cycle may succeed without operator action.
    ///
    /// Timeouts are grouped with transport failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Network(_) | SyncError::AuthFailed(_) | SyncError::Timeout { .. }
        )
    }
}

/// Classifies git stderr into a more specific error variant.
pub fn classify_git_error(stderr: &str) -> SyncError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("unable to access")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
        || lower.contains("could not read from remote repository")
    {
        // ssh reports auth failures alongside "could not read from remote"
        if lower.contains("permission denied") || lower.contains("authentication failed") {
            return SyncError::AuthFailed(message);
        }
        if lower.contains("does not appear to be a git repository") {
            return SyncError::RemoteMissing(message);
        }
        return SyncError::Network(message);
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
        || lower.contains("host key verification failed")
    {
        return SyncError::AuthFailed(message);
    }

    if lower.contains("no such remote")
        || lower.contains("does not appear to be a git repository")
        || lower.contains("couldn't find remote ref")
    {
        return SyncError::RemoteMissing(message);
    }

    if lower.contains("conflict")
        || lower.contains("could not apply")
        || lower.contains("divergent branches")
        || lower.contains("non-fast-forward")
        || lower.contains("[rejected]")
        || lower.contains("fetch first")
        || lower.contains("unmerged files")
    {
        return SyncError::IntegrationConflict(message);
    }

    SyncError::GitOperation(message)
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
