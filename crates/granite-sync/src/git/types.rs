//! Pure data types for git operations.

use serde::{Deserialize, Serialize};

/// One entry of `git status --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEntry {
    /// Path relative to the repository root (the new path for renames).
    pub path: String,
    /// Original path of a rename or copy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orig_path: Option<String>,
    /// Index status column (`X`).
    pub index: char,
    /// Work tree status column (`Y`).
    pub worktree: char,
}

impl StatusEntry {
    /// Untracked (`??`) entries are not yet known to git.
    pub fn is_untracked(&self) -> bool {
        self.index == '?' && self.worktree == '?'
    }

    /// Both sides modified: the path is in a conflicted state.
    pub fn is_unmerged(&self) -> bool {
        matches!(
            (self.index, self.worktree),
            ('D', 'D') | ('A', 'U') | ('U', 'D') | ('U', 'A') | ('D', 'U') | ('A', 'A') | ('U', 'U')
        )
    }
}

/// Integration strategy used for a pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullStrategy {
    Rebase,
    Merge,
}

impl std::fmt::Display for PullStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PullStrategy::Rebase => write!(f, "rebase"),
            PullStrategy::Merge => write!(f, "merge"),
        }
    }
}

/// Result of a successful pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResult {
    /// Strategy that integrated the remote history.
    pub strategy: PullStrategy,
    /// Whether the branch was already current.
    pub up_to_date: bool,
    /// Number of files changed, when git reports it.
    pub files_changed: u32,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    /// Short hash of the new commit.
    pub commit_hash: String,
    /// Rendered commit message.
    pub message: String,
    /// Number of paths staged into the commit.
    pub files_staged: usize,
}
