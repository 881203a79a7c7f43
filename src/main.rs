//! Fleet diagnostics CLI.
//!
//! Validates a node roster, drives the diagnostic pipeline across the fleet,
//! and emits the consolidated report as text or JSON.

#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use fleetdiag::session::{SshConnector, SshOptions};
use fleetdiag::{config, fleet, logging, report, roster};
use miette::miette;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "fleetdiag")]
#[command(
    author,
    version,
    about = "Fleet diagnostics and benchmarking orchestrator",
    long_about = "fleetdiag validates newly provisioned compute nodes before they enter \
                  production: it probes reachability, configures data-plane interfaces, \
                  inventories disks and PCI devices, and runs storage and network \
                  micro-benchmarks, producing one consolidated report per fleet run.",
    after_help = r#"EXAMPLES:
    # Run diagnostics across a roster
    fleetdiag run --roster Config.json --output output.txt

    # Machine-readable report
    fleetdiag run --roster Config.json --json

    # Validate a roster without touching any node
    fleetdiag check --roster Config.json

    # Starting points
    fleetdiag example-roster > Config.json
    fleetdiag example-settings > fleetdiag.toml

ENVIRONMENT VARIABLES:
    FLEETDIAG_LOG_LEVEL             Logging level: trace, debug, info, warn, error, off
    FLEETDIAG_LOG_FORMAT            Log format: compact, json
    FLEETDIAG_LOG_FILE              Path to daily-rotated log file
    FLEETDIAG_MAX_IN_FLIGHT         Max concurrent node pipelines
    FLEETDIAG_MANAGEMENT_INTERFACE  Reserved interface never assigned an address
    FLEETDIAG_NODE_ID_PREFIX        Prefix stripped from node IDs to derive ordinals
"#
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the diagnostic pipeline across the whole roster.
    Run {
        /// Path to the roster JSON document.
        #[arg(long)]
        roster: PathBuf,
        /// Optional TOML settings file.
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Also write the rendered report to this file.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Emit the report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Validate a roster (and optional settings) without contacting nodes.
    Check {
        #[arg(long)]
        roster: PathBuf,
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Print an example roster document.
    ExampleRoster,
    /// Print an example settings file.
    ExampleSettings,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    let log_config = logging::LogConfig::from_env("info");
    let _guards = logging::init_logging(&log_config).map_err(|e| miette!("{e}"))?;

    match cli.command {
        Command::Run {
            roster: roster_path,
            settings: settings_path,
            output,
            json,
        } => {
            let settings = config::load_settings(settings_path.as_deref())?;
            let roster = roster::load_roster(&roster_path, &settings.node_id_prefix)?;

            let cancel = CancellationToken::new();
            let abort = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling run");
                    abort.cancel();
                }
            });

            let connector = Arc::new(SshConnector::new(
                SshOptions {
                    connect_timeout: settings.connect_timeout(),
                    command_timeout: settings.command_timeout(),
                    ..SshOptions::default()
                },
                settings.ping_count,
                settings.ping_timeout(),
            ));

            info!(nodes = roster.len(), "Starting fleet run");
            let fleet_report = fleet::run_fleet(&roster, &settings, connector, cancel).await;

            let rendered = if json {
                fleet_report
                    .to_json()
                    .map_err(|e| miette!("report serialization failed: {e}"))?
            } else {
                report::render_text(&fleet_report)
            };

            if let Some(path) = output {
                std::fs::write(&path, &rendered)
                    .map_err(|e| miette!("failed to write {}: {e}", path.display()))?;
                info!(path = %path.display(), "Report written");
            }
            println!("{rendered}");
        }
        Command::Check {
            roster: roster_path,
            settings: settings_path,
        } => {
            let settings = config::load_settings(settings_path.as_deref())?;
            let roster = roster::load_roster(&roster_path, &settings.node_id_prefix)?;
            println!("Roster OK: {} node(s)", roster.len());
        }
        Command::ExampleRoster => {
            print!("{}", roster::example_roster());
        }
        Command::ExampleSettings => {
            print!("{}", config::example_settings());
        }
    }

    Ok(())
}
