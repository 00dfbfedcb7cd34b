//! Git transport authentication environment.

use std::path::{Path, PathBuf};

/// Expands a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        dirs::home_dir().unwrap_or_default()
    } else if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .map(|h| h.join(rest))
            .unwrap_or_else(|| PathBuf::from(path))
    } else {
        PathBuf::from(path)
    }
}

/// Quotes a path for use inside `GIT_SSH_COMMAND`, which git runs through a shell.
pub fn shell_quote_path(path: &Path) -> String {
    let display = path.display().to_string();
    let escaped = display.replace('\'', "'\\''");
    if escaped.starts_with('-') {
        format!("'./{}'", escaped)
    } else {
        format!("'{}'", escaped)
    }
}

/// Environment for git commands that talk to a remote.
///
/// Interactive prompts are always disabled so an unattended cycle fails fast
/// instead of waiting for input. When `ssh_key` points at an existing file,
/// ssh is told to use it.
pub fn transport_env(ssh_key: Option<&Path>) -> Vec<(String, String)> {
    let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];

    match ssh_key {
        Some(key) if key.exists() => {
            env.push((
                "GIT_SSH_COMMAND".to_string(),
                format!(
                    "ssh -i {} -o IdentitiesOnly=yes -o BatchMode=yes -o StrictHostKeyChecking=accept-new",
                    shell_quote_path(key)
                ),
            ));
        }
        Some(key) => {
            log::warn!(
                "Configured SSH key {} does not exist, using default ssh configuration",
                key.display()
            );
        }
        None => {}
    }

    env
}
