//! RepoSync Daemon - Background synchronization service
//!
//! This binary runs as a user service and handles:
//! - Synchronization of every configured CMIS repository
//! - Configuration reload on SIGHUP
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! Each repository gets a `RepositoryService` (event queue, handler chain,
//! connection scheduler, local watcher) backed by its own SQLite database.
//! The main task only waits for signals.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use reposync_cmis::CmisSessionFactory;
use reposync_core::config::{Config, LoggingConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod daemon;

use daemon::Daemon;

/// How long each repository queue may take to drain on shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "reposyncd", version, about = "Synchronizes local folders with CMIS repositories")]
struct Cli {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log in JSON format
    #[arg(long)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

// ============================================================================
// Tracing
// ============================================================================

fn init_tracing(logging: &LoggingConfig, verbose: u8, json: bool) -> Result<()> {
    let level = match verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    let result = match (&logging.file, json) {
        (Some(path), true) => builder
            .json()
            .with_writer(Mutex::new(open_log_file(path)?))
            .try_init(),
        (Some(path), false) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(open_log_file(path)?))
            .try_init(),
        (None, true) => builder.json().try_init(),
        (None, false) => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

// ============================================================================
// Signals
// ============================================================================

enum Signal {
    Shutdown,
    Reload,
}

#[cfg(unix)]
struct SignalListener {
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            terminate: signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?,
            hangup: signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?,
        })
    }

    async fn next(&mut self) -> Signal {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C)");
                Signal::Shutdown
            }
            _ = self.terminate.recv() => {
                info!("Received SIGTERM");
                Signal::Shutdown
            }
            _ = self.hangup.recv() => {
                info!("Received SIGHUP");
                Signal::Reload
            }
        }
    }
}

#[cfg(not(unix))]
struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> Signal {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
        Signal::Shutdown
    }
}

// ============================================================================
// Main entry point
// ============================================================================

fn load_config(cli: &Cli) -> Result<(PathBuf, Config)> {
    match &cli.config {
        Some(path) => {
            let config = Config::load(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?;
            Ok((path.clone(), config))
        }
        None => {
            let path = Config::default_path();
            let config = Config::load_or_default(&path);
            Ok((path, config))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config_path, config) = load_config(&cli)?;

    init_tracing(&config.logging, cli.verbose, cli.json)?;
    info!(config_path = %config_path.display(), "RepoSync daemon starting (reposyncd)");

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!(field = %e.field, "{}", e.message);
        }
        anyhow::bail!("Invalid configuration: {} error(s)", errors.len());
    }
    if cli.check {
        info!(repositories = config.repositories.len(), "Configuration is valid");
        return Ok(());
    }
    if config.repositories.is_empty() {
        warn!("No repositories configured; edit the configuration and send SIGHUP");
    }

    let mut signals = SignalListener::new()?;
    let mut daemon = Daemon::new(config_path, config, Arc::new(CmisSessionFactory::new()));
    daemon.start().await?;

    loop {
        match signals.next().await {
            Signal::Shutdown => break,
            Signal::Reload => {
                if let Err(e) = daemon.reload(SHUTDOWN_TIMEOUT).await {
                    error!(error = %format!("{e:#}"), "Configuration reload failed");
                }
            }
        }
    }

    daemon.shutdown(SHUTDOWN_TIMEOUT).await;
    info!("RepoSync daemon shut down gracefully");
    Ok(())
}
