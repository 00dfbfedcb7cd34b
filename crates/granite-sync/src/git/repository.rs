//! Git repository operations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::executor::{CommandOutput, CommandRunner, CommandSpec};
use super::parse::{count_changed_files, format_git_error, parse_porcelain_z};
use super::types::{PullResult, PullStrategy, StatusEntry};
use crate::error::{classify_git_error, Result};

/// Maximum number of paths passed to a single `git add`.
const ADD_CHUNK_SIZE: usize = 100;

/// Git operations against one working directory.
///
/// Commands run through the injected [`CommandRunner`], so every call is
/// bounded by the configured timeout.
#[derive(Clone)]
pub struct GitRepository {
    runner: Arc<dyn CommandRunner>,
    /// Git executable name or path.
    program: String,
    /// Path to the working tree.
    repo_path: PathBuf,
    timeout: Duration,
    /// Extra environment for commands that contact the remote.
    transport_env: Vec<(String, String)>,
}

impl GitRepository {
    /// Creates a new repository handle.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        program: impl Into<String>,
        repo_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            program: program.into(),
            repo_path: repo_path.into(),
            timeout: Duration::from_secs(30),
            transport_env: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_transport_env(mut self, env: Vec<(String, String)>) -> Self {
        self.transport_env = env;
        self
    }

    /// Returns the repository path.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Returns the git executable name.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns `git --version` output.
    ///
    /// Runs outside the working directory, so a missing directory is not
    /// mistaken for a missing executable.
    pub async fn version(&self) -> Result<String> {
        let spec = CommandSpec::new(&self.program)
            .args(["--version"])
            .timeout(self.timeout);
        let output = self.runner.run(&spec).await?;
        if output.success() {
            Ok(output.stdout.trim().to_string())
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }

    /// Checks whether the working directory is the root of a git work tree.
    ///
    /// A subdirectory of some enclosing repository does not count.
    pub async fn is_work_tree(&self) -> Result<bool> {
        if !self.repo_path.is_dir() {
            return Ok(false);
        }
        let output = self.run_git(&["rev-parse", "--show-toplevel"]).await?;
        if !output.success() {
            return Ok(false);
        }
        let toplevel = PathBuf::from(output.stdout.trim());
        if same_dir(&toplevel, &self.repo_path) {
            Ok(true)
        } else {
            log::warn!(
                "{} is inside the repository at {}, not its root",
                self.repo_path.display(),
                toplevel.display()
            );
            Ok(false)
        }
    }

    /// Resolves a path inside the git directory (e.g. `rebase-merge`).
    pub async fn git_path(&self, name: &str) -> Result<PathBuf> {
        let output = self.run_checked(&["rev-parse", "--git-path", name]).await?;
        let path = PathBuf::from(output.stdout.trim());
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(self.repo_path.join(path))
        }
    }

    /// Checks whether a ref resolves (e.g. `MERGE_HEAD`).
    pub async fn ref_exists(&self, name: &str) -> Result<bool> {
        let output = self
            .run_git(&["rev-parse", "-q", "--verify", name])
            .await?;
        Ok(output.success())
    }

    /// Lists working tree changes, including every untracked file.
    pub async fn status_entries(&self) -> Result<Vec<StatusEntry>> {
        let output = self
            .run_checked(&["status", "--porcelain", "-z", "--untracked-files=all"])
            .await?;
        Ok(parse_porcelain_z(&output.stdout))
    }

    /// Reads a config value; `None` when unset or blank.
    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        let output = self.run_git(&["config", "--get", key]).await?;
        if !output.success() {
            return Ok(None);
        }
        let value = output.stdout.trim();
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    /// Sets a repository-local config value.
    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.run_checked(&["config", key, value]).await?;
        Ok(())
    }

    /// Stages the given paths (additions, modifications and deletions).
    pub async fn add_paths(&self, paths: &[String]) -> Result<()> {
        for chunk in paths.chunks(ADD_CHUNK_SIZE) {
            let mut args: Vec<String> = vec!["add".into(), "-A".into(), "--".into()];
            args.extend(chunk.iter().cloned());
            let spec = self
                .spec_owned(args)
                .env("GIT_LITERAL_PATHSPECS", "1");
            let output = self.runner.run(&spec).await?;
            if !output.success() {
                return Err(classify_git_error(&format_git_error(&output)));
            }
        }
        Ok(())
    }

    /// Removes the given paths from the index, leaving the files on disk.
    pub async fn unstage_paths(&self, paths: &[String]) -> Result<()> {
        for chunk in paths.chunks(ADD_CHUNK_SIZE) {
            let mut args: Vec<String> = vec!["reset".into(), "-q".into(), "--".into()];
            args.extend(chunk.iter().cloned());
            let spec = self
                .spec_owned(args)
                .env("GIT_LITERAL_PATHSPECS", "1");
            let output = self.runner.run(&spec).await?;
            if !output.success() {
                return Err(classify_git_error(&format_git_error(&output)));
            }
        }
        Ok(())
    }

    /// Returns true if the index differs from HEAD.
    pub async fn has_staged_changes(&self) -> Result<bool> {
        let output = self.run_git(&["diff", "--cached", "--quiet"]).await?;
        match output.exit_code {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(classify_git_error(&format_git_error(&output))),
        }
    }

    /// Creates a commit from the index. Returns `None` if git found nothing to commit.
    pub async fn commit(&self, message: &str) -> Result<Option<String>> {
        let output = self.run_git(&["commit", "-m", message]).await?;

        if !output.success() {
            let combined = output.combined().to_lowercase();
            if combined.contains("nothing to commit") || combined.contains("no changes added") {
                return Ok(None);
            }
            return Err(classify_git_error(&format_git_error(&output)));
        }

        let hash = self.run_checked(&["rev-parse", "--short", "HEAD"]).await?;
        Ok(Some(hash.stdout.trim().to_string()))
    }

    /// Fetches a branch from the remote.
    pub async fn fetch(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_remote(&["fetch", remote, branch]).await?;
        Ok(())
    }

    /// Pulls a branch, integrating with the given strategy.
    ///
    /// Local uncommitted edits are stashed around the integration.
    pub async fn pull(
        &self,
        remote: &str,
        branch: &str,
        strategy: PullStrategy,
    ) -> Result<PullResult> {
        let args: &[&str] = match strategy {
            PullStrategy::Rebase => &["pull", "--rebase", "--autostash", remote, branch],
            PullStrategy::Merge => &[
                "pull",
                "--no-rebase",
                "--autostash",
                "--no-edit",
                remote,
                branch,
            ],
        };
        let output = self.run_remote(args).await?;
        let up_to_date = output.combined().to_lowercase().contains("up to date");

        Ok(PullResult {
            strategy,
            up_to_date,
            files_changed: if up_to_date {
                0
            } else {
                count_changed_files(&output.stdout)
            },
        })
    }

    /// Pushes `HEAD` to `branch` on the remote.
    pub async fn push(&self, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{}", branch);
        self.run_remote(&["push", remote, &refspec]).await?;
        Ok(())
    }

    /// Aborts an in-progress rebase.
    pub async fn rebase_abort(&self) -> Result<()> {
        self.run_checked(&["rebase", "--abort"]).await?;
        Ok(())
    }

    /// Aborts an in-progress merge.
    pub async fn merge_abort(&self) -> Result<()> {
        self.run_checked(&["merge", "--abort"]).await?;
        Ok(())
    }

    /// Resets the index and conflicted files back to `HEAD`, keeping unrelated edits.
    pub async fn reset_merge(&self) -> Result<()> {
        self.run_checked(&["reset", "--merge"]).await?;
        Ok(())
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    fn spec(&self, args: &[&str]) -> CommandSpec {
        CommandSpec::new(&self.program)
            .args(args.iter().copied())
            .cwd(&self.repo_path)
            .timeout(self.timeout)
    }

    fn spec_owned(&self, args: Vec<String>) -> CommandSpec {
        CommandSpec::new(&self.program)
            .args(args)
            .cwd(&self.repo_path)
            .timeout(self.timeout)
    }

    /// Runs a git command in the repository directory.
    async fn run_git(&self, args: &[&str]) -> Result<CommandOutput> {
        self.runner.run(&self.spec(args)).await
    }

    /// Runs a git command and classifies a non-zero exit.
    async fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run_git(args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }

    /// Runs a command that contacts the remote, with the transport environment.
    async fn run_remote(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut spec = self.spec(args);
        spec.envs.extend(self.transport_env.iter().cloned());
        let output = self.runner.run(&spec).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(classify_git_error(&format_git_error(&output)))
        }
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

impl std::fmt::Debug for GitRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitRepository")
            .field("program", &self.program)
            .field("repo_path", &self.repo_path)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::executor::ProcessRunner;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_repo(dir: &Path) {
        for args in [
            vec!["init", "-q", "-b", "main"],
            vec!["config", "user.email", "test@test.com"],
            vec!["config", "user.name", "Test"],
            vec!["config", "commit.gpgsign", "false"],
        ] {
            let status = Command::new("git")
                .current_dir(dir)
                .args(&args)
                .status()
                .unwrap();
            assert!(status.success());
        }
    }

    fn repo(dir: &Path) -> GitRepository {
        GitRepository::new(Arc::new(ProcessRunner), "git", dir)
    }

    #[tokio::test]
    async fn test_is_work_tree_false() {
        let dir = TempDir::new().unwrap();
        assert!(!repo(dir.path()).is_work_tree().await.unwrap());
    }

    #[tokio::test]
    async fn test_is_work_tree_missing_dir() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(!repo(&missing).is_work_tree().await.unwrap());
    }

    #[tokio::test]
    async fn test_is_work_tree_rejects_subdirectory() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let sub = dir.path().join("data");
        std::fs::create_dir(&sub).unwrap();

        assert!(repo(dir.path()).is_work_tree().await.unwrap());
        assert!(!repo(&sub).is_work_tree().await.unwrap());
    }

    #[tokio::test]
    async fn test_version_ignores_missing_dir() {
        let dir = TempDir::new().unwrap();
        let version = repo(&dir.path().join("nope")).version().await.unwrap();
        assert!(version.starts_with("git version"));
    }

    #[tokio::test]
    async fn test_status_and_commit() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let repo = repo(dir.path());
        assert!(repo.is_work_tree().await.unwrap());

        std::fs::create_dir(dir.path().join("notes")).unwrap();
        std::fs::write(dir.path().join("notes/a.md"), "# A").unwrap();

        let entries = repo.status_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "notes/a.md");
        assert!(entries[0].is_untracked());

        repo.add_paths(&["notes/a.md".to_string()]).await.unwrap();
        assert!(repo.has_staged_changes().await.unwrap());

        let hash = repo.commit("first").await.unwrap();
        assert!(hash.is_some());
        assert!(repo.status_entries().await.unwrap().is_empty());
        assert!(!repo.has_staged_changes().await.unwrap());
    }

    #[tokio::test]
    async fn test_commit_nothing_to_commit() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let repo = repo(dir.path());
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        repo.add_paths(&["a.md".to_string()]).await.unwrap();
        repo.commit("first").await.unwrap();

        assert_eq!(repo.commit("again").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_paths_literal_special_chars() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let repo = repo(dir.path());
        std::fs::write(dir.path().join("star*.md"), "x").unwrap();
        std::fs::write(dir.path().join("starfish.md"), "y").unwrap();

        repo.add_paths(&["star*.md".to_string()]).await.unwrap();
        let entries = repo.status_entries().await.unwrap();
        let fish = entries.iter().find(|e| e.path == "starfish.md").unwrap();
        assert!(fish.is_untracked());
    }

    #[tokio::test]
    async fn test_config_get_and_set() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let repo = repo(dir.path());
        repo.config_set("granite.test", "value").await.unwrap();
        assert_eq!(
            repo.config_get("granite.test").await.unwrap().as_deref(),
            Some("value")
        );
        assert_eq!(repo.config_get("granite.unset").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_push_without_remote_is_classified() {
        let dir = TempDir::new().unwrap();
        init_repo(dir.path());
        let repo = repo(dir.path());
        std::fs::write(dir.path().join("a.md"), "a").unwrap();
        repo.add_paths(&["a.md".to_string()]).await.unwrap();
        repo.commit("first").await.unwrap();

        let err = repo.push("origin", "main").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }
}
