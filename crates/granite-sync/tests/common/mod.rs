//! Shared helpers for granite-sync integration tests.
//!
//! `RemoteHarness` builds a bare remote seeded with one commit and hands
//! out clones of it, so scenarios can push, diverge and pull with the
//! real `git` binary.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use granite_sync::{
    CycleReport, EngineOptions, MemorySettingsStore, StatusSnapshot, SyncConfig, SyncEngine,
};

pub const USER_NAME: &str = "Granite Test";
pub const USER_EMAIL: &str = "test@granite.local";

/// Runs git in `dir`, panicking with its stderr on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", &format!("user.name={}", USER_NAME)])
        .args(["-c", &format!("user.email={}", USER_EMAIL)])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A bare remote with one commit on `main`.
pub struct RemoteHarness {
    temp_dir: TempDir,
    pub remote: PathBuf,
}

impl RemoteHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let remote = temp_dir.path().join("remote.git");
        let seed = temp_dir.path().join("seed");
        std::fs::create_dir_all(&seed).unwrap();

        git(temp_dir.path(), &["init", "-q", "--bare", "-b", "main", "remote.git"]);
        git(&seed, &["init", "-q", "-b", "main"]);
        std::fs::write(seed.join("welcome.md"), "# Welcome\n").unwrap();
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "-q", "-m", "Initial notes"]);
        git(&seed, &["remote", "add", "origin", remote.to_str().unwrap()]);
        git(&seed, &["push", "-q", "origin", "HEAD:refs/heads/main"]);

        Self { temp_dir, remote }
    }

    /// Clones the remote into `name` with a local identity.
    pub fn clone(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        git(
            self.temp_dir.path(),
            &["clone", "-q", self.remote.to_str().unwrap(), name],
        );
        git(&path, &["config", "user.name", USER_NAME]);
        git(&path, &["config", "user.email", USER_EMAIL]);
        git(&path, &["config", "commit.gpgsign", "false"]);
        path
    }

    /// A directory that is not a repository.
    pub fn plain_dir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    pub fn remote_head(&self) -> String {
        git(&self.remote, &["rev-parse", "refs/heads/main"])
    }

    pub fn remote_commit_count(&self) -> usize {
        git(&self.remote, &["rev-list", "--count", "refs/heads/main"])
            .parse()
            .unwrap()
    }
}

/// Writes and commits a file in `repo`, optionally pushing it.
pub fn commit_file(repo: &Path, file: &str, content: &str, message: &str, push: bool) {
    std::fs::write(repo.join(file), content).unwrap();
    git(repo, &["add", "-A"]);
    git(repo, &["commit", "-q", "-m", message]);
    if push {
        git(repo, &["push", "-q", "origin", "HEAD:refs/heads/main"]);
    }
}

pub fn head(repo: &Path) -> String {
    git(repo, &["rev-parse", "HEAD"])
}

pub fn commit_count(repo: &Path) -> usize {
    git(repo, &["rev-list", "--count", "HEAD"]).parse().unwrap()
}

pub fn last_message(repo: &Path) -> String {
    git(repo, &["log", "-1", "--format=%s"])
}

pub fn porcelain(repo: &Path) -> String {
    git(repo, &["status", "--porcelain"])
}

/// Config pointing at `origin/main` with the test identity.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        pull_on_startup: false,
        identity_name: Some(USER_NAME.to_string()),
        identity_email: Some(USER_EMAIL.to_string()),
        ..SyncConfig::default()
    }
}

/// Engine over `notes_root` backed by an in-memory store.
pub fn engine_for(notes_root: &Path, config: SyncConfig) -> (SyncEngine, Arc<MemorySettingsStore>) {
    let store = Arc::new(MemorySettingsStore::new(config));
    let options = EngineOptions::new(notes_root).with_key_path(notes_root.join("no-such-key"));
    let engine = SyncEngine::new(store.clone(), options).expect("engine should start");
    (engine, store)
}

/// Blocks until the engine records a cycle newer than `previous`.
pub fn wait_for_cycle(engine: &SyncEngine, previous: Option<uuid::Uuid>) -> CycleReport {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        tokio::time::timeout(Duration::from_secs(60), engine.wait_for_cycle(previous))
            .await
            .expect("cycle did not finish in time")
            .expect("worker stopped")
    })
}

/// Polls the status until `predicate` holds.
pub fn wait_for_status(
    engine: &SyncEngine,
    predicate: impl Fn(&StatusSnapshot) -> bool,
) -> StatusSnapshot {
    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    loop {
        let status = engine.get_status();
        if predicate(&status) {
            return status;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "status never matched: {:?}",
            status
        );
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Runs one manual backup and returns its report.
pub fn run_backup(engine: &SyncEngine) -> CycleReport {
    let previous = engine.last_cycle_id();
    let response = engine.trigger_backup();
    assert!(response.success, "trigger failed: {}", response.message);
    wait_for_cycle(engine, previous)
}

/// Runs one manual pull and returns its report.
pub fn run_pull(engine: &SyncEngine) -> CycleReport {
    let previous = engine.last_cycle_id();
    let response = engine.trigger_pull();
    assert!(response.success, "trigger failed: {}", response.message);
    wait_for_cycle(engine, previous)
}

pub fn shutdown(engine: SyncEngine) {
    engine.on_shutdown();
    engine.join();
}
