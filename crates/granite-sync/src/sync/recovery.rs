//! Working tree recovery after a failed integration.

use serde::Serialize;

use crate::git::GitRepository;

use super::inspector::RepoInspector;

/// What recovery did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub rebase_aborted: bool,
    pub merge_aborted: bool,
    pub index_reset: bool,
    /// Steps that failed; recovery continues past them.
    pub errors: Vec<String>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Restores the working tree after a failed pull.
///
/// Each step checks repository state instead of assuming it and runs even
/// if an earlier step failed. Unrelated uncommitted edits are kept.
pub async fn recover(repo: &GitRepository) -> RecoveryReport {
    let inspector = RepoInspector::new(repo);
    let mut report = RecoveryReport::default();

    match inspector.rebase_in_progress().await {
        Ok(true) => match repo.rebase_abort().await {
            Ok(()) => {
                log::warn!("Aborted in-progress rebase");
                report.rebase_aborted = true;
            }
            Err(e) => {
                log::error!("Failed to abort rebase: {}", e);
                report.errors.push(format!("rebase --abort: {}", e));
            }
        },
        Ok(false) => {}
        Err(e) => {
            log::error!("Could not determine rebase state: {}", e);
            report.errors.push(format!("rebase state: {}", e));
        }
    }

    match inspector.merge_in_progress().await {
        Ok(true) => match repo.merge_abort().await {
            Ok(()) => {
                log::warn!("Aborted in-progress merge");
                report.merge_aborted = true;
            }
            Err(e) => {
                log::error!("Failed to abort merge: {}", e);
                report.errors.push(format!("merge --abort: {}", e));
            }
        },
        Ok(false) => {}
        Err(e) => {
            log::error!("Could not determine merge state: {}", e);
            report.errors.push(format!("merge state: {}", e));
        }
    }

    match repo.status_entries().await {
        Ok(entries) if entries.iter().any(|e| e.is_unmerged()) => match repo.reset_merge().await {
            Ok(()) => {
                log::warn!("Reset leftover conflicted paths");
                report.index_reset = true;
            }
            Err(e) => {
                log::error!("Failed to reset conflicted paths: {}", e);
                report.errors.push(format!("reset --merge: {}", e));
            }
        },
        Ok(_) => {}
        Err(e) => {
            log::error!("Could not read status after recovery: {}", e);
            report.errors.push(format!("status: {}", e));
        }
    }

    report
}
