//! BGS Monitor - Entry Point
//!
//! Loads the configuration, builds the run context and executes one
//! command: a tick announcement, a report cycle, or a maintenance notice.
//! Meant to be invoked periodically (cron, systemd timer) rather than run
//! as a daemon.

use bgs_monitor::core::config::{MonitorConfig, DEFAULT_CONFIG_PATH};
use bgs_monitor::core::error::{BgsError, Result};
use bgs_monitor::monitor::Monitor;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Background simulation monitor
#[derive(Parser, Debug)]
#[command(name = "bgs-monitor")]
#[command(about = "Detect simulation ticks and report faction influence risks")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, short = 'c', default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Announce a new galaxy tick if one happened since the last run
    Tick,
    /// Evaluate every monitored faction and deliver the reports
    Bgs {
        /// Report even if the tick has not changed
        #[arg(long)]
        force: bool,
    },
    /// Announce maintenance mode on or off
    Maintenance {
        #[arg(value_enum)]
        mode: MaintenanceMode,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum MaintenanceMode {
    On,
    Off,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bgs_monitor=info")),
        )
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_fatal() => {
            tracing::error!(error = %e, "Aborting");
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Run finished with errors");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let config = MonitorConfig::load(&args.config)?;
    let mut monitor = Monitor::from_config(config)?;

    match args.command {
        Command::Tick => {
            let change = monitor.announce_tick().await?;
            tracing::info!(changed = change.is_changed(), "Tick check complete");
        }
        Command::Bgs { force } => {
            let cycle = monitor.run_reports(force).await?;
            tracing::info!(
                delivered = cycle.delivered.len(),
                skipped = cycle.skipped.len(),
                failed = cycle.failed.len(),
                unreachable = cycle.unreachable.len(),
                commits = cycle.commits,
                "Report cycle complete"
            );
            if !cycle.failed.is_empty() {
                return Err(BgsError::Delivery(format!(
                    "reports not delivered for: {}",
                    cycle.failed.join(", ")
                )));
            }
            if !cycle.unreachable.is_empty() {
                return Err(BgsError::Unavailable(format!(
                    "factions not reachable: {}",
                    cycle.unreachable.join(", ")
                )));
            }
        }
        Command::Maintenance { mode } => {
            monitor
                .announce_maintenance(matches!(mode, MaintenanceMode::On))
                .await?;
        }
    }

    Ok(())
}
