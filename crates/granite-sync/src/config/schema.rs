//! Sync configuration schema.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::git::auth::expand_home;

/// Longest accepted backup interval (30 days).
pub const MAX_INTERVAL_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Longest accepted per-command time bound (1 hour).
pub const MAX_COMMAND_TIMEOUT_SECONDS: u64 = 60 * 60;

/// Synchronization settings.
///
/// Field names match the persisted JSON; aliases accept the keys written by
/// earlier versions of the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Seconds between scheduled backups.
    #[serde(default = "default_interval", alias = "backup_interval")]
    pub interval_seconds: u64,

    /// Pull from the remote once when the engine starts.
    #[serde(default = "default_true")]
    pub pull_on_startup: bool,

    /// Push after every successful commit.
    #[serde(default = "default_true")]
    pub auto_push: bool,

    /// Remote branch to pull from and push to.
    #[serde(default = "default_branch")]
    pub remote_branch: String,

    /// Commit author name; falls back to git's own configuration.
    #[serde(default, alias = "git_user_name")]
    pub identity_name: Option<String>,

    /// Commit author email; falls back to git's own configuration.
    #[serde(default, alias = "git_user_email")]
    pub identity_email: Option<String>,

    /// Stage untracked files too, not only tracked modifications.
    #[serde(default = "default_true")]
    pub stage_all_files: bool,

    /// Skip the cycle when the working tree has no relevant changes.
    #[serde(default = "default_true")]
    pub skip_if_no_changes: bool,

    /// Commit message template; supports `{timestamp}` and `{date}`.
    #[serde(default = "default_message_template")]
    pub commit_message_template: String,

    /// Working tree override; defaults to the notes root.
    #[serde(default, alias = "git_repo_path")]
    pub repo_path: Option<String>,

    /// Glob-like patterns excluded from change detection and staging.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Remote that pull and push talk to.
    #[serde(default = "default_remote")]
    pub remote_name: String,

    /// Time bound for each git invocation, in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,

    /// Private key used for ssh transport, if any.
    #[serde(default)]
    pub ssh_key_path: Option<String>,
}

fn default_interval() -> u64 {
    600 // 10 minutes
}

fn default_true() -> bool {
    true
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_message_template() -> String {
    "Auto-backup: {timestamp}".to_string()
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        "plugin_config.json".to_string(),
        "__pycache__".to_string(),
        "*.pyc".to_string(),
    ]
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_command_timeout() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            pull_on_startup: true,
            auto_push: true,
            remote_branch: default_branch(),
            identity_name: None,
            identity_email: None,
            stage_all_files: true,
            skip_if_no_changes: true,
            commit_message_template: default_message_template(),
            repo_path: None,
            ignore_patterns: default_ignore_patterns(),
            remote_name: default_remote(),
            command_timeout_seconds: default_command_timeout(),
            ssh_key_path: None,
        }
    }
}

impl SyncConfig {
    /// Trims string fields and turns blank optional values into `None`.
    pub fn normalize(&mut self) {
        fn blank_to_none(value: &mut Option<String>) {
            *value = value
                .take()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty());
        }

        blank_to_none(&mut self.identity_name);
        blank_to_none(&mut self.identity_email);
        blank_to_none(&mut self.repo_path);
        blank_to_none(&mut self.ssh_key_path);
        self.remote_branch = self.remote_branch.trim().to_string();
        self.remote_name = self.remote_name.trim().to_string();
        self.ignore_patterns.retain(|p| !p.trim().is_empty());
    }

    /// Checks every field; the first problem found is returned.
    pub fn validate(&self) -> Result<()> {
        if self.interval_seconds == 0 {
            return Err(invalid("interval_seconds must be greater than 0"));
        }
        if self.interval_seconds > MAX_INTERVAL_SECONDS {
            return Err(invalid(format!(
                "interval_seconds must be at most {}",
                MAX_INTERVAL_SECONDS
            )));
        }
        if self.command_timeout_seconds == 0 {
            return Err(invalid("command_timeout_seconds must be greater than 0"));
        }
        if self.command_timeout_seconds > MAX_COMMAND_TIMEOUT_SECONDS {
            return Err(invalid(format!(
                "command_timeout_seconds must be at most {}",
                MAX_COMMAND_TIMEOUT_SECONDS
            )));
        }
        validate_ref_name("remote_branch", &self.remote_branch)?;
        validate_ref_name("remote_name", &self.remote_name)?;

        if self.commit_message_template.trim().is_empty() {
            return Err(invalid("commit_message_template must not be empty"));
        }
        if let Some(email) = &self.identity_email {
            if !email.contains('@') || email.len() < 3 {
                return Err(invalid(format!("identity_email '{}' is not an email address", email)));
            }
        }
        for pattern in &self.ignore_patterns {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(invalid(format!("invalid ignore pattern '{}': {}", pattern, e)));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    /// The working tree: `repo_path` if set, otherwise `notes_root`.
    pub fn working_dir(&self, notes_root: &Path) -> PathBuf {
        match &self.repo_path {
            Some(path) => expand_home(path),
            None => notes_root.to_path_buf(),
        }
    }

    pub fn ssh_key(&self) -> Option<PathBuf> {
        self.ssh_key_path.as_deref().map(expand_home)
    }
}

fn invalid(message: impl Into<String>) -> SyncError {
    SyncError::InvalidConfig(message.into())
}

fn validate_ref_name(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(invalid(format!("{} must not be empty", field)));
    }
    if value.starts_with('-') {
        return Err(invalid(format!("{} must not start with '-'", field)));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid(format!("{} must not contain whitespace", field)));
    }
    if value.contains("..") || value.contains(':') {
        return Err(invalid(format!("{} '{}' is not a valid git name", field, value)));
    }
    Ok(())
}

/// Partial settings update. Absent fields keep their current value.
///
/// For optional string fields, an empty string clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
    #[serde(default, alias = "backup_interval")]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub pull_on_startup: Option<bool>,
    #[serde(default)]
    pub auto_push: Option<bool>,
    #[serde(default)]
    pub remote_branch: Option<String>,
    #[serde(default, alias = "git_user_name")]
    pub identity_name: Option<String>,
    #[serde(default, alias = "git_user_email")]
    pub identity_email: Option<String>,
    #[serde(default)]
    pub stage_all_files: Option<bool>,
    #[serde(default)]
    pub skip_if_no_changes: Option<bool>,
    #[serde(default)]
    pub commit_message_template: Option<String>,
    #[serde(default, alias = "git_repo_path")]
    pub repo_path: Option<String>,
    #[serde(default)]
    pub ignore_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub remote_name: Option<String>,
    #[serde(default)]
    pub command_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub ssh_key_path: Option<String>,
}

impl SettingsPatch {
    /// Produces a new validated config; `base` is left untouched.
    pub fn apply(&self, base: &SyncConfig) -> Result<SyncConfig> {
        let mut next = base.clone();

        if let Some(v) = self.interval_seconds {
            next.interval_seconds = v;
        }
        if let Some(v) = self.pull_on_startup {
            next.pull_on_startup = v;
        }
        if let Some(v) = self.auto_push {
            next.auto_push = v;
        }
        if let Some(v) = &self.remote_branch {
            next.remote_branch = v.clone();
        }
        if let Some(v) = &self.identity_name {
            next.identity_name = Some(v.clone());
        }
        if let Some(v) = &self.identity_email {
            next.identity_email = Some(v.clone());
        }
        if let Some(v) = self.stage_all_files {
            next.stage_all_files = v;
        }
        if let Some(v) = self.skip_if_no_changes {
            next.skip_if_no_changes = v;
        }
        if let Some(v) = &self.commit_message_template {
            next.commit_message_template = v.clone();
        }
        if let Some(v) = &self.repo_path {
            next.repo_path = Some(v.clone());
        }
        if let Some(v) = &self.ignore_patterns {
            next.ignore_patterns = v.clone();
        }
        if let Some(v) = &self.remote_name {
            next.remote_name = v.clone();
        }
        if let Some(v) = self.command_timeout_seconds {
            next.command_timeout_seconds = v;
        }
        if let Some(v) = &self.ssh_key_path {
            next.ssh_key_path = Some(v.clone());
        }

        next.normalize();
        next.validate()?;
        Ok(next)
    }

    pub fn is_empty(&self) -> bool {
        self == &SettingsPatch::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.interval_seconds, 600);
        assert!(config.pull_on_startup);
        assert!(config.auto_push);
        assert_eq!(config.remote_branch, "main");
        assert_eq!(config.commit_message_template, "Auto-backup: {timestamp}");
        assert_eq!(config.ignore_patterns.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_empty_object_uses_defaults() {
        let config: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn test_deserialize_legacy_keys() {
        let json = r#"{
            "backup_interval": 120,
            "git_user_name": "Ada",
            "git_user_email": "ada@example.com",
            "git_repo_path": null,
            "auto_push": false
        }"#;
        let config: SyncConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.interval_seconds, 120);
        assert_eq!(config.identity_name.as_deref(), Some("Ada"));
        assert_eq!(config.identity_email.as_deref(), Some("ada@example.com"));
        assert!(!config.auto_push);
    }

    #[test]
    fn test_normalize_blank_identity() {
        let mut config = SyncConfig {
            identity_name: Some("  ".to_string()),
            identity_email: Some(String::new()),
            ..Default::default()
        };
        config.normalize();
        assert_eq!(config.identity_name, None);
        assert_eq!(config.identity_email, None);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = SyncConfig {
            interval_seconds: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("interval_seconds"));
    }

    #[test]
    fn test_validate_rejects_oversized_durations() {
        let config = SyncConfig {
            interval_seconds: u64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            interval_seconds: MAX_INTERVAL_SECONDS,
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = SyncConfig {
            command_timeout_seconds: MAX_COMMAND_TIMEOUT_SECONDS + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_branch() {
        for branch in ["", "-delete", "my branch", "a..b", "HEAD:main"] {
            let config = SyncConfig {
                remote_branch: branch.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "branch {:?} accepted", branch);
        }
    }

    #[test]
    fn test_validate_rejects_bad_email_and_pattern() {
        let config = SyncConfig {
            identity_email: Some("nobody".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = SyncConfig {
            ignore_patterns: vec!["[unclosed".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_patch_apply() {
        let base = SyncConfig::default();
        let patch = SettingsPatch {
            interval_seconds: Some(60),
            identity_name: Some("Ada".to_string()),
            ..Default::default()
        };
        let next = patch.apply(&base).unwrap();
        assert_eq!(next.interval_seconds, 60);
        assert_eq!(next.identity_name.as_deref(), Some("Ada"));
        assert_eq!(next.remote_branch, base.remote_branch);
    }

    #[test]
    fn test_patch_empty_string_clears_optional() {
        let base = SyncConfig {
            identity_name: Some("Ada".to_string()),
            ..Default::default()
        };
        let patch = SettingsPatch {
            identity_name: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(patch.apply(&base).unwrap().identity_name, None);
    }

    #[test]
    fn test_patch_invalid_leaves_base() {
        let base = SyncConfig::default();
        let patch = SettingsPatch {
            interval_seconds: Some(0),
            ..Default::default()
        };
        assert!(patch.apply(&base).is_err());
        assert_eq!(base.interval_seconds, 600);
    }

    #[test]
    fn test_patch_rejects_unknown_fields() {
        let result: std::result::Result<SettingsPatch, _> =
            serde_json::from_str(r#"{"interval_seconds": 5, "bogus": true}"#);
        assert!(result.is_err());

        let patch: SettingsPatch = serde_json::from_str(r#"{"backup_interval": 5}"#).unwrap();
        assert_eq!(patch.interval_seconds, Some(5));
    }

    #[test]
    fn test_working_dir() {
        let root = Path::new("/srv/notes");
        let config = SyncConfig::default();
        assert_eq!(config.working_dir(root), PathBuf::from("/srv/notes"));

        let config = SyncConfig {
            repo_path: Some("/data/repo".to_string()),
            ..Default::default()
        };
        assert_eq!(config.working_dir(root), PathBuf::from("/data/repo"));
    }
}
