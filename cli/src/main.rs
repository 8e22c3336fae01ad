//! Pulse CLI - one probe run per invocation.
//!
//! ```text
//! main() -> FileConfigStore::load -> SqliteResultStore::open
//!        -> RunOrchestrator::run -> ResultSet as JSON on stdout
//! ```
//!
//! Logs go to stderr, or are appended to `$PULSE_LOG_FILE` when set, so
//! stdout carries only the results.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use pulse_config::{ConfigSink, FileConfigStore};
use pulse_engine::RunOrchestrator;
use pulse_storage::SqliteResultStore;

const LOG_FILE_ENV_VAR: &str = "PULSE_LOG_FILE";

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warning) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        return;
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(env_filter)
        .init();

    if let Some(warning) = init_warning {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Option<String>) {
    let Some(path) = env::var_os(LOG_FILE_ENV_VAR)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
    else {
        return (None, None);
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = fs::create_dir_all(parent)
    {
        return (
            None,
            Some(format!("Failed to create log dir {}: {e}", parent.display())),
        );
    }

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => (Some((path, file)), None),
        Err(e) => (
            None,
            Some(format!("Failed to open log file {}: {e}", path.display())),
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    if let Err(err) = run().await {
        tracing::error!("{err:#}");
        return Err(err);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let store = FileConfigStore::from_env()?;
    let config = store
        .load()
        .with_context(|| format!("Failed to load config from {}", store.path().display()))?;

    let db_path = config
        .storage
        .resolved_path()
        .context("Could not determine results database path (set storage.path)")?;
    let results = SqliteResultStore::open(&db_path)?;

    let mut orchestrator = RunOrchestrator::new(Arc::new(store), results);
    let report = orchestrator.run(&config).await?;

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &report.results)
        .context("Failed to write results")?;
    writeln!(stdout).context("Failed to write results")?;
    Ok(())
}
