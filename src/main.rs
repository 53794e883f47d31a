//! censorbox: censorship injection appliance
//!
//! This is the main entry point for the censorbox binary. It handles CLI
//! argument parsing, configuration loading, telemetry initialization, and runs
//! the appliance until interrupted.
//!
//! # I/O Architecture
//!
//! - **Audit logging**: censorship decisions go to syslog as JSON lines
//! - **Debug logging**: `tracing` output goes to stderr
//! - **Dry run**: the firewall plan is printed to stdout and nothing starts

use std::sync::Arc;

use anyhow::{Context, Result};
use censorbox::{
    appliance::{self, Appliance, Upstream},
    cli::Cli,
    config::ConfigLoader,
    telemetry::AuditLogger,
};
use clap::Parser;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before any other initialization)
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, &config.general.log_level)?;
    debug!("Loaded configuration: {:?}", config);

    if cli.dry_run {
        for line in appliance::firewall_plan(&config) {
            println!("{}", line);
        }
        return Ok(());
    }

    let audit = match AuditLogger::new() {
        Ok(logger) => logger,
        Err(e) => {
            warn!("Audit events will be discarded: {}", e);
            AuditLogger::new_null()
        }
    };
    let audit = Arc::new(audit.with_tag(config.general.tag.clone()));

    let upstream = Upstream::uncensored(&config.upstream);
    let running = Appliance::new(config, upstream, audit)
        .context("Failed to configure appliance")?
        .start()
        .await
        .context("Failed to start appliance")?;

    for handle in running.handles() {
        info!("{} listening on {}", handle.name(), handle.local_addr());
    }

    wait_for_signal().await?;
    running.shutdown().await;

    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for SIGINT")?;
            info!("Received SIGINT");
        }
        _ = term.recv() => {
            info!("Received SIGTERM");
        }
    }

    Ok(())
}

/// Initialize the tracing subscriber for debug/development logging.
///
/// This is separate from the audit telemetry which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, else `[general] log_level`, else warnings
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, log_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let fallback = if log_level.is_empty() { "warn" } else { log_level };
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
