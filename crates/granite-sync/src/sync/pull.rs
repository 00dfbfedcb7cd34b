//! Pull operation: rebase first, fall back to merge, always recover.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::git::parse::conflicting_files;
use crate::git::{GitRepository, PullResult, PullStrategy};

use super::backup::ensure_identity;
use super::inspector::RepoInspector;
use super::recovery::recover;

/// Integrates `remote_branch` into the working tree.
///
/// 1. fetch; a transport failure here ends the operation, nothing was touched
/// 2. `pull --rebase`; on failure, recover and
/// 3. `pull --no-rebase` once; on failure, recover again and report
///
/// The working tree never stays mid-rebase or mid-merge.
pub async fn pull_from_remote(repo: &GitRepository, config: &SyncConfig) -> Result<PullResult> {
    RepoInspector::new(repo).ensure_ready().await?;

    // A merge fallback creates a commit, so the identity has to be in place.
    if let Err(e) = ensure_identity(repo, config).await {
        log::warn!("Pull continues without a confirmed identity: {}", e);
    }

    let remote = config.remote_name.as_str();
    let branch = config.remote_branch.as_str();

    log::info!("Pulling latest changes from {}/{}", remote, branch);
    repo.fetch(remote, branch).await?;

    let rebase_error = match repo.pull(remote, branch, PullStrategy::Rebase).await {
        Ok(result) => {
            log::info!("Pulled {}/{} with rebase", remote, branch);
            return Ok(result);
        }
        Err(e) => e,
    };

    log::warn!(
        "Rebase pull from {}/{} failed, recovering: {}",
        remote,
        branch,
        rebase_error
    );
    let report = recover(repo).await;
    if !report.is_clean() {
        log::error!("Recovery after rebase incomplete: {:?}", report.errors);
    }

    if rebase_error.is_retryable() {
        // The remote is not reachable; a second attempt would fail the same way.
        return Err(rebase_error);
    }

    match repo.pull(remote, branch, PullStrategy::Merge).await {
        Ok(result) => {
            log::info!("Pulled {}/{} with merge fallback", remote, branch);
            Ok(result)
        }
        Err(merge_error) => {
            log::error!(
                "Merge pull from {}/{} failed, recovering: {}",
                remote,
                branch,
                merge_error
            );
            let report = recover(repo).await;
            if !report.is_clean() {
                log::error!("Recovery after merge incomplete: {:?}", report.errors);
            }
            Err(match merge_error {
                SyncError::GitOperation(message) | SyncError::IntegrationConflict(message) => {
                    SyncError::IntegrationConflict(describe_conflicts(message))
                }
                other => other,
            })
        }
    }
}

/// Leads the git output with the paths it reported as conflicting.
fn describe_conflicts(message: String) -> String {
    let files = conflicting_files(&message);
    if files.is_empty() {
        return message;
    }
    log::warn!("Conflicting files: {}", files.join(", "));
    format!("conflicting files: {}\n{}", files.join(", "), message)
}
