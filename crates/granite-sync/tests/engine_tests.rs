//! Engine lifecycle, control surface and scheduling behavior.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use common::*;
use granite_sync::{
    CommandOutput, CommandRunner, CommandSpec, CycleOutcome, EngineOptions, ErrorKind,
    JsonSettingsStore, MemorySettingsStore, SettingsPatch, SettingsStore, SyncConfig, SyncEngine,
    SyncError, TriggerKind,
};

/// Pretends every command is slow and git is missing; tracks concurrency.
#[derive(Default)]
struct SlowMissingTool {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[async_trait]
impl CommandRunner for SlowMissingTool {
    async fn run(&self, spec: &CommandSpec) -> granite_sync::Result<CommandOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Err(SyncError::ToolMissing(spec.program.clone()))
    }
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        interval_seconds: 1,
        ..test_config()
    }
}

#[test]
fn missing_tool_keeps_retrying_on_schedule() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemorySettingsStore::new(fast_config()));
    let options = EngineOptions::new(dir.path()).with_git_program("granite-missing-git-binary");
    let engine = SyncEngine::new(store, options).unwrap();
    engine.on_startup().unwrap();

    let first = wait_for_status(&engine, |s| s.last_outcome.is_some());
    let first_id = first.last_outcome.as_ref().map(|r| r.id);

    let second = wait_for_status(&engine, |s| {
        s.last_outcome.as_ref().map(|r| r.id) != first_id
    });

    for status in [&first, &second] {
        let report = status.last_outcome.as_ref().unwrap();
        assert_eq!(report.trigger, TriggerKind::Scheduled);
        match &report.outcome {
            CycleOutcome::Failed { error } => assert_eq!(error.kind, ErrorKind::Environment),
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(status.backup_count, 0);
        assert!(status.timer_armed);
        assert!(status.enabled);
    }

    shutdown(engine);
}

#[test]
fn back_to_back_triggers_run_once() {
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(SlowMissingTool::default());
    let store = Arc::new(MemorySettingsStore::new(test_config()));
    let options = EngineOptions::new(dir.path()).with_runner(runner.clone());
    let engine = SyncEngine::new(store, options).unwrap();

    let previous = engine.last_cycle_id();
    let first = engine.trigger_backup();
    let second = engine.trigger_backup();
    let third = engine.trigger_pull();

    assert!(first.success, "{}", first.message);
    assert!(!second.success);
    assert_eq!(second.message, "Sync already running");
    assert!(!third.success);

    let report = wait_for_cycle(&engine, previous);
    assert!(matches!(report.outcome, CycleOutcome::Failed { .. }));
    assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
    assert_eq!(runner.max_in_flight.load(Ordering::SeqCst), 1);

    // The gate reopens once the cycle is done.
    wait_for_status(&engine, |s| s.last_outcome.is_some());
    let previous = engine.last_cycle_id();
    let again = engine.trigger_backup();
    assert!(again.success, "{}", again.message);
    assert!(again.message.contains("last error"));
    wait_for_cycle(&engine, previous);
    assert_eq!(runner.max_in_flight.load(Ordering::SeqCst), 1);

    shutdown(engine);
}

#[test]
fn disabling_cancels_timer_and_rejects_triggers() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemorySettingsStore::new(test_config()));
    let engine = SyncEngine::new(store, EngineOptions::new(dir.path())).unwrap();
    engine.on_startup().unwrap();
    wait_for_status(&engine, |s| s.timer_armed);

    assert!(engine.set_enabled(false).success);
    let status = wait_for_status(&engine, |s| !s.enabled);
    assert!(!status.timer_armed);

    let response = engine.trigger_backup();
    assert!(!response.success);
    assert_eq!(response.message, "Git sync is disabled");
    let response = engine.trigger_pull();
    assert!(!response.success);

    // Settings changes do not re-arm a disabled engine.
    let patch = SettingsPatch {
        interval_seconds: Some(300),
        ..Default::default()
    };
    assert!(engine.update_settings(&patch).success);
    let status = wait_for_status(&engine, |s| s.config_version == 2);
    assert!(!status.timer_armed);

    assert!(engine.set_enabled(true).success);
    wait_for_status(&engine, |s| s.enabled && s.timer_armed);

    shutdown(engine);
}

#[test]
fn interval_change_rearms_timer() {
    let harness = RemoteHarness::new();
    let notes = harness.clone("notes");
    let (engine, store) = engine_for(&notes, test_config());
    engine.on_startup().unwrap();
    wait_for_status(&engine, |s| s.timer_armed);
    assert!(engine.get_status().last_outcome.is_none());

    std::fs::write(notes.join("idea.md"), "An idea\n").unwrap();
    let patch = SettingsPatch {
        interval_seconds: Some(1),
        auto_push: Some(false),
        ..Default::default()
    };
    let response = engine.update_settings(&patch);
    assert!(response.success, "{}", response.message);
    assert_eq!(store.load().unwrap().interval_seconds, 1);

    // The old 600 s timer would never fire within the wait.
    let status = wait_for_status(&engine, |s| s.backup_count == 1);
    let report = status.last_outcome.unwrap();
    assert_eq!(report.trigger, TriggerKind::Scheduled);
    assert!(status.timer_armed);
    assert_eq!(porcelain(&notes), "");

    shutdown(engine);
}

#[test]
fn invalid_settings_are_rejected_and_not_saved() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemorySettingsStore::new(test_config()));
    let engine = SyncEngine::new(store.clone(), EngineOptions::new(dir.path())).unwrap();

    for patch in [
        SettingsPatch {
            interval_seconds: Some(0),
            ..Default::default()
        },
        SettingsPatch {
            interval_seconds: Some(u64::MAX),
            ..Default::default()
        },
        SettingsPatch {
            remote_branch: Some("bad branch".to_string()),
            ..Default::default()
        },
        SettingsPatch {
            identity_email: Some("not-an-email".to_string()),
            ..Default::default()
        },
        SettingsPatch {
            ignore_patterns: Some(vec!["[".to_string()]),
            ..Default::default()
        },
    ] {
        let response = engine.update_settings(&patch);
        assert!(!response.success, "accepted {:?}", patch);
    }

    assert_eq!(engine.get_settings(), test_config());
    assert_eq!(store.save_count(), 0);
    assert_eq!(engine.get_status().config_version, 1);

    // The worker is still there to take jobs.
    let previous = engine.last_cycle_id();
    assert!(engine.trigger_backup().success);
    wait_for_cycle(&engine, previous);

    shutdown(engine);
}

#[test]
fn settings_round_trip_through_shared_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("user-settings.json");
    std::fs::write(
        &path,
        r#"{"theme":"dark","plugins":{"git":{"backup_interval":900,"git_user_email":"me@example.com"},"other":{"on":true}}}"#,
    )
    .unwrap();

    let store = Arc::new(JsonSettingsStore::new(&path));
    let engine = SyncEngine::new(store, EngineOptions::new(dir.path())).unwrap();
    let settings = engine.get_settings();
    assert_eq!(settings.interval_seconds, 900);
    assert_eq!(settings.identity_email.as_deref(), Some("me@example.com"));

    let patch = SettingsPatch {
        auto_push: Some(false),
        ..Default::default()
    };
    assert!(engine.update_settings(&patch).success);

    let document: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(document["theme"], "dark");
    assert_eq!(document["plugins"]["other"]["on"], true);
    assert_eq!(document["plugins"]["git"]["auto_push"], false);
    assert_eq!(document["plugins"]["git"]["interval_seconds"], 900);

    // An external edit becomes live on reload.
    let mut document = document;
    document["plugins"]["git"]["interval_seconds"] = serde_json::json!(1200);
    std::fs::write(&path, serde_json::to_string(&document).unwrap()).unwrap();
    assert!(engine.reload_settings().success);
    assert_eq!(engine.get_settings().interval_seconds, 1200);
    assert!(!engine.get_settings().auto_push);

    shutdown(engine);
}

#[test]
fn status_reads_do_not_wait_for_running_cycle() {
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(SlowMissingTool::default());
    let store = Arc::new(MemorySettingsStore::new(test_config()));
    let options = EngineOptions::new(dir.path()).with_runner(runner);
    let engine = SyncEngine::new(store, options).unwrap();

    assert!(engine.trigger_backup().success);
    let started = std::time::Instant::now();
    let status = engine.get_status();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(status.backup_count, 0);

    shutdown(engine);
}

#[test]
fn shutdown_does_not_wait_for_in_flight_cycle() {
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(SlowMissingTool::default());
    let store = Arc::new(MemorySettingsStore::new(test_config()));
    let options = EngineOptions::new(dir.path()).with_runner(runner);
    let engine = SyncEngine::new(store, options).unwrap();

    assert!(engine.trigger_backup().success);
    let started = std::time::Instant::now();
    engine.on_shutdown();
    assert!(started.elapsed() < Duration::from_millis(100));

    // The in-flight cycle still finishes before the worker exits.
    engine.join();
    assert!(engine.get_status().last_outcome.is_some());
    assert!(!engine.get_status().timer_armed);
    let response = engine.trigger_backup();
    assert!(!response.success);
}
