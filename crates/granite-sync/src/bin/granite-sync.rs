//! Headless git sync daemon for a notes directory.
//!
//! Runs the startup pull, then backs the notes up on the configured
//! interval until interrupted. With `--once`, runs a single backup cycle
//! and prints its report as JSON.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use granite_sync::{
    init_logging, CycleOutcome, EngineOptions, JsonSettingsStore, LogFormat, SyncEngine,
};

/// Keep a notes directory in sync with its git remote.
#[derive(Parser)]
#[command(name = "granite-sync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file; the sync settings live under `plugins.git`
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Notes directory; must already be a git working tree
    #[arg(short, long, default_value = ".")]
    notes_root: PathBuf,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// Run one backup cycle and exit
    #[arg(long)]
    once: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_format) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, Box<dyn Error + Send + Sync>> {
    let settings = cli.settings.unwrap_or_else(default_settings_path);
    log::info!("Using settings file {}", settings.display());

    let store = Arc::new(JsonSettingsStore::new(settings));
    let engine = Arc::new(SyncEngine::new(store, EngineOptions::new(cli.notes_root))?);

    if cli.once {
        return run_once(&engine);
    }

    let handler_engine = Arc::clone(&engine);
    ctrlc::set_handler(move || {
        log::info!("Interrupt received");
        handler_engine.on_shutdown();
    })?;

    engine.on_startup()?;
    engine.join();
    Ok(ExitCode::SUCCESS)
}

fn run_once(engine: &SyncEngine) -> Result<ExitCode, Box<dyn Error + Send + Sync>> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let previous = engine.last_cycle_id();
    let response = engine.trigger_backup();
    if !response.success {
        log::error!("Backup not started: {}", response.message);
        engine.on_shutdown();
        engine.join();
        return Ok(ExitCode::FAILURE);
    }

    let report = rt.block_on(engine.wait_for_cycle(previous))?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    engine.on_shutdown();
    engine.join();

    Ok(match report.outcome {
        CycleOutcome::Failed { .. } => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn default_settings_path() -> PathBuf {
    dirs::config_dir()
        .map(|dir| dir.join("granite").join("user-settings.json"))
        .unwrap_or_else(|| PathBuf::from("user-settings.json"))
}
