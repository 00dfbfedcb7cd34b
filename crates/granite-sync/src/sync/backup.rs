//! Commit-and-push operation.

use chrono::{DateTime, Utc};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::git::{CommitResult, GitRepository};
use crate::keys::key_files_in_tree;

use super::ignore::IgnoreSet;
use super::inspector::RepoInspector;
use super::message::render_commit_message;
use super::state::{CycleOutcome, ErrorInfo};

/// Writes the configured identity into the repository config and checks
/// that commits can be attributed.
pub async fn ensure_identity(repo: &GitRepository, config: &SyncConfig) -> Result<()> {
    if let Some(name) = &config.identity_name {
        repo.config_set("user.name", name).await?;
    }
    if let Some(email) = &config.identity_email {
        repo.config_set("user.email", email).await?;
    }
    if RepoInspector::new(repo).identity_configured().await {
        Ok(())
    } else {
        Err(SyncError::IdentityMissing)
    }
}

/// Stages, commits and optionally pushes the working tree.
///
/// Returns `Skipped` when there is nothing to commit. A push failure does
/// not undo the commit: it is reported inside `Committed`.
pub async fn commit_and_push(
    repo: &GitRepository,
    config: &SyncConfig,
    started_at: DateTime<Utc>,
) -> Result<CycleOutcome> {
    let inspector = RepoInspector::new(repo);
    inspector.ensure_ready().await?;
    ensure_identity(repo, config).await?;

    let ignore = IgnoreSet::new(&exclusions(config, repo));
    let changed = inspector.changed_entries(&ignore).await?;

    if config.skip_if_no_changes && changed.is_empty() {
        log::info!("No changes detected, skipping backup");
        return Ok(skipped("No changes detected"));
    }

    // Entries with a clean work tree column are already staged; naming a
    // path that only exists in the index (e.g. a staged deletion) would make
    // `git add` fail on an unmatched pathspec.
    let paths: Vec<String> = changed
        .iter()
        .filter(|entry| config.stage_all_files || !entry.is_untracked())
        .filter(|entry| entry.worktree != ' ')
        .map(|entry| entry.path.clone())
        .collect();

    let staged_ignored = inspector.staged_ignored(&ignore).await?;
    if !staged_ignored.is_empty() {
        log::info!("Unstaging {} ignored path(s)", staged_ignored.len());
        repo.unstage_paths(&staged_ignored).await?;
    }

    if !paths.is_empty() {
        log::debug!("Staging {} path(s)", paths.len());
        repo.add_paths(&paths).await?;
    }

    if !repo.has_staged_changes().await? {
        log::info!("Nothing to commit after exclusions");
        return Ok(skipped("Nothing to commit"));
    }

    let message = render_commit_message(&config.commit_message_template, started_at);
    let commit_hash = match repo.commit(&message).await? {
        Some(hash) => hash,
        None => return Ok(skipped("Nothing to commit")),
    };
    log::info!("Committed {}: {}", commit_hash, message);

    let commit = CommitResult {
        commit_hash,
        message,
        files_staged: paths.len(),
    };

    if !config.auto_push {
        return Ok(CycleOutcome::Committed {
            commit,
            pushed: false,
            push_error: None,
        });
    }

    match repo.push(&config.remote_name, &config.remote_branch).await {
        Ok(()) => {
            log::info!(
                "Pushed to {}/{}",
                config.remote_name,
                config.remote_branch
            );
            Ok(CycleOutcome::Committed {
                commit,
                pushed: true,
                push_error: None,
            })
        }
        Err(e) => {
            log::warn!(
                "Push to {}/{} failed, commit kept locally: {}",
                config.remote_name,
                config.remote_branch,
                e
            );
            Ok(CycleOutcome::Committed {
                commit,
                pushed: false,
                push_error: Some(ErrorInfo::from_error(&e, Utc::now())),
            })
        }
    }
}

/// The configured ignore patterns plus the transport key, when it lives in
/// the working tree.
fn exclusions(config: &SyncConfig, repo: &GitRepository) -> Vec<String> {
    let mut patterns = config.ignore_patterns.clone();
    if let Some(key) = config.ssh_key() {
        let inside = key_files_in_tree(&key, repo.repo_path());
        if !inside.is_empty() {
            log::warn!(
                "SSH key {} is inside the notes tree and is excluded from backups",
                key.display()
            );
        }
        patterns.extend(inside.iter().map(|path| glob::Pattern::escape(path)));
    }
    patterns
}

fn skipped(reason: &str) -> CycleOutcome {
    CycleOutcome::Skipped {
        reason: reason.to_string(),
    }
}
