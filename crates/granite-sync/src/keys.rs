//! SSH key management for git transport.
//!
//! Keys live outside the notes tree. Only the public half and the outcome
//! of a connection test ever leave this module.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Result, SyncError};
use crate::git::auth::expand_home;
use crate::git::parse::format_git_error;
use crate::git::{CommandRunner, CommandSpec};

/// Email used for new keys when neither the caller nor the settings give one.
pub const DEFAULT_KEY_EMAIL: &str = "granite@localhost";

/// Host tested when the caller does not name one.
pub const DEFAULT_TEST_HOST: &str = "github.com";

const DEFAULT_KEY_PATH: &str = "~/.ssh/id_ed25519";
const KEYGEN_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Location of a managed key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    pub private_path: PathBuf,
    pub public_path: PathBuf,
}

/// What an authentication round trip reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Authenticated,
    PermissionDenied,
    /// Anything else; carries the ssh output.
    Unrecognized(String),
}

impl ConnectionStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, ConnectionStatus::Authenticated)
    }

    /// Git hosts exit non-zero even on success, so only the text counts.
    fn from_output(output: &str) -> Self {
        let lower = output.to_lowercase();
        if lower.contains("successfully authenticated") || lower.contains("welcome") {
            ConnectionStatus::Authenticated
        } else if lower.contains("permission denied") {
            ConnectionStatus::PermissionDenied
        } else {
            ConnectionStatus::Unrecognized(output.trim().to_string())
        }
    }
}

/// Generates, reads and tests an ed25519 key pair.
#[derive(Clone)]
pub struct KeyManager {
    runner: Arc<dyn CommandRunner>,
    private_path: PathBuf,
    keygen_program: String,
    ssh_program: String,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("private_path", &self.private_path)
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    pub fn new(runner: Arc<dyn CommandRunner>, private_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            private_path: private_path.into(),
            keygen_program: "ssh-keygen".to_string(),
            ssh_program: "ssh".to_string(),
        }
    }

    /// Manager for `~/.ssh/id_ed25519`.
    pub fn with_default_path(runner: Arc<dyn CommandRunner>) -> Self {
        Self::new(runner, expand_home(DEFAULT_KEY_PATH))
    }

    /// Overrides the `ssh-keygen` and `ssh` executables.
    pub fn with_programs(mut self, keygen: impl Into<String>, ssh: impl Into<String>) -> Self {
        self.keygen_program = keygen.into();
        self.ssh_program = ssh.into();
        self
    }

    pub fn key_pair(&self) -> KeyPair {
        KeyPair {
            private_path: self.private_path.clone(),
            public_path: public_path_for(&self.private_path),
        }
    }

    pub fn exists(&self) -> bool {
        self.private_path.exists()
    }

    /// Creates a new key pair. Refuses if a private key is already present.
    pub async fn generate(&self, email: &str) -> Result<KeyPair> {
        validate_email(email)?;
        if self.exists() {
            return Err(SyncError::KeyExists(self.private_path.clone()));
        }

        if let Some(dir) = self.private_path.parent() {
            create_key_dir(dir).await?;
        }

        let path = self.private_path.display().to_string();
        let spec = CommandSpec::new(self.keygen_program.as_str())
            .args(["-t", "ed25519", "-C", email, "-f", path.as_str(), "-N", ""])
            .timeout(KEYGEN_TIMEOUT);
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(SyncError::KeyOperation(format_git_error(&output)));
        }

        log::info!("Generated SSH key at {}", self.private_path.display());
        Ok(self.key_pair())
    }

    /// Removes the current pair, if any, and generates a new one.
    pub async fn regenerate(&self, email: &str) -> Result<KeyPair> {
        validate_email(email)?;
        let pair = self.key_pair();
        remove_if_present(&pair.private_path).await?;
        remove_if_present(&pair.public_path).await?;
        log::warn!("Removed SSH key at {}", pair.private_path.display());
        self.generate(email).await
    }

    /// Returns the trimmed public key.
    pub async fn public_key(&self) -> Result<String> {
        let public_path = public_path_for(&self.private_path);
        match tokio::fs::read_to_string(&public_path).await {
            Ok(contents) => Ok(contents.trim().to_string()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(SyncError::KeyNotFound(public_path))
            }
            Err(e) => Err(SyncError::KeyOperation(format!(
                "Error reading public key: {}",
                e
            ))),
        }
    }

    /// Authentication-only round trip against `git@<host>`.
    pub async fn test_connection(&self, host: &str) -> Result<ConnectionStatus> {
        validate_host(host)?;

        let mut args: Vec<String> = vec!["-T".to_string()];
        if self.exists() {
            args.push("-i".to_string());
            args.push(self.private_path.display().to_string());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }
        args.extend(
            [
                "-o",
                "BatchMode=yes",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-o",
                "ConnectTimeout=10",
            ]
            .map(String::from),
        );
        args.push(format!("git@{}", host));

        let spec = CommandSpec::new(self.ssh_program.as_str())
            .args(args)
            .timeout(CONNECT_TIMEOUT);
        let output = self.runner.run(&spec).await?;
        let status = ConnectionStatus::from_output(&output.combined());
        log::info!(
            "SSH connection test to {}: {}",
            host,
            if status.is_authenticated() {
                "authenticated"
            } else {
                "not authenticated"
            }
        );
        Ok(status)
    }
}

/// Picks the comment for a new key: the requested email, then the
/// configured identity, then [`DEFAULT_KEY_EMAIL`].
pub fn resolve_key_email(requested: Option<&str>, configured: Option<&str>) -> String {
    requested
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .or_else(|| configured.map(str::trim).filter(|e| !e.is_empty()))
        .unwrap_or(DEFAULT_KEY_EMAIL)
        .to_string()
}

pub fn validate_email(email: &str) -> Result<()> {
    if email.len() < 3 || !email.contains('@') {
        return Err(SyncError::InvalidConfig(format!(
            "'{}' is not a valid email address",
            email
        )));
    }
    if email.starts_with('-') || email.chars().any(char::is_control) {
        return Err(SyncError::InvalidConfig(format!(
            "'{}' is not a valid email address",
            email
        )));
    }
    Ok(())
}

pub fn validate_host(host: &str) -> Result<()> {
    if host.len() < 3 || host.starts_with('-') || host.chars().any(char::is_whitespace) {
        return Err(SyncError::InvalidConfig(format!(
            "'{}' is not a valid host",
            host
        )));
    }
    Ok(())
}

/// Returns the key's path relative to `tree` (forward slashes) when the key
/// would land inside it. Missing trailing components are resolved against
/// their nearest existing ancestor.
pub fn path_in_tree(key: &Path, tree: &Path) -> Option<String> {
    let key = resolve_existing_prefix(key);
    let tree = resolve_existing_prefix(tree);
    let relative = key.strip_prefix(&tree).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Fails with [`SyncError::KeyInsideTree`] when `key` lies under `tree`.
pub fn ensure_outside_tree(key: &Path, tree: &Path) -> Result<()> {
    match path_in_tree(key, tree) {
        Some(_) => Err(SyncError::KeyInsideTree(key.to_path_buf())),
        None => Ok(()),
    }
}

/// Both halves of a key pair, relative to `tree`, for those inside it.
pub fn key_files_in_tree(private_path: &Path, tree: &Path) -> Vec<String> {
    [private_path.to_path_buf(), public_path_for(private_path)]
        .iter()
        .filter_map(|path| path_in_tree(path, tree))
        .collect()
}

fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut missing = Vec::new();
    loop {
        if let Ok(real) = existing.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(real, |acc: PathBuf, part| acc.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
}

fn public_path_for(private_path: &Path) -> PathBuf {
    let mut name = private_path.as_os_str().to_os_string();
    name.push(".pub");
    PathBuf::from(name)
}

async fn create_key_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| SyncError::KeyOperation(format!("Cannot create {}: {}", dir.display(), e)))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(|e| {
                SyncError::KeyOperation(format!("Cannot restrict {}: {}", dir.display(), e))
            })?;
    }
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SyncError::KeyOperation(format!(
            "Cannot remove {}: {}",
            path.display(),
            e
        ))),
    }
}
