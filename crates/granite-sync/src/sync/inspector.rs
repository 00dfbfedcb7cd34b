//! Read-only repository checks that gate every cycle.

use crate::error::{Result, SyncError};
use crate::git::{GitRepository, StatusEntry};

use super::ignore::IgnoreSet;

/// Read-only queries against the working tree.
#[derive(Debug, Clone)]
pub struct RepoInspector<'a> {
    repo: &'a GitRepository,
}

impl<'a> RepoInspector<'a> {
    pub fn new(repo: &'a GitRepository) -> Self {
        Self { repo }
    }

    /// Checks that the git executable resolves.
    pub async fn tool_available(&self) -> bool {
        match self.repo.version().await {
            Ok(version) => {
                log::debug!("Using {}", version);
                true
            }
            Err(e) => {
                log::debug!("Git not available: {}", e);
                false
            }
        }
    }

    /// Checks that the working directory is the root of an existing git work tree.
    pub async fn is_repository(&self) -> bool {
        self.repo.is_work_tree().await.unwrap_or(false)
    }

    /// Status entries that are not covered by `ignore`.
    pub async fn changed_entries(&self, ignore: &IgnoreSet) -> Result<Vec<StatusEntry>> {
        let entries = self.repo.status_entries().await?;
        Ok(entries
            .into_iter()
            .filter(|entry| is_relevant(entry, ignore))
            .collect())
    }

    /// Ignored paths that already sit in the index, e.g. staged by hand.
    pub async fn staged_ignored(&self, ignore: &IgnoreSet) -> Result<Vec<String>> {
        let entries = self.repo.status_entries().await?;
        Ok(entries
            .into_iter()
            .filter(|entry| !matches!(entry.index, ' ' | '?' | '!'))
            .filter(|entry| !is_relevant(entry, ignore))
            .map(|entry| entry.path)
            .collect())
    }

    /// Checks whether the working tree differs from the last commit,
    /// ignoring paths matched by `ignore`.
    pub async fn has_changes(&self, ignore: &IgnoreSet) -> Result<bool> {
        Ok(!self.changed_entries(ignore).await?.is_empty())
    }

    /// Checks that commits can be attributed: both `user.name` and `user.email` resolve.
    pub async fn identity_configured(&self) -> bool {
        let name = self.repo.config_get("user.name").await.ok().flatten();
        let email = self.repo.config_get("user.email").await.ok().flatten();
        name.is_some() && email.is_some()
    }

    /// Checks for rebase state left in the git directory.
    pub async fn rebase_in_progress(&self) -> Result<bool> {
        for dir in ["rebase-merge", "rebase-apply"] {
            if self.repo.git_path(dir).await?.exists() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Checks for an unfinished merge.
    pub async fn merge_in_progress(&self) -> Result<bool> {
        self.repo.ref_exists("MERGE_HEAD").await
    }

    /// Runs the environment gates shared by every cycle.
    pub async fn ensure_ready(&self) -> Result<()> {
        if !self.tool_available().await {
            return Err(SyncError::ToolMissing(self.repo.program().to_string()));
        }
        if !self.is_repository().await {
            return Err(SyncError::NotARepository(self.repo.repo_path().to_path_buf()));
        }
        Ok(())
    }
}

fn is_relevant(entry: &StatusEntry, ignore: &IgnoreSet) -> bool {
    !ignore.is_ignored(&entry.path)
        || entry
            .orig_path
            .as_deref()
            .is_some_and(|orig| !ignore.is_ignored(orig))
}
