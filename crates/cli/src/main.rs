//! Observatory CLI
//!
//! A command-line tool for querying the checker daemon: current status,
//! latency anomalies, alert states, CSV export and proxy coverage.

mod client;
mod commands;
mod config;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{anomalies, coverage, status};

/// Observatory uptime checker CLI
#[derive(Parser)]
#[command(name = "obs")]
#[command(author, version, about = "CLI for the Observatory uptime checker", long_about = None)]
pub struct Cli {
    /// Checker API URL (can also be set via OBS_API_URL env var)
    #[arg(long, env = "OBS_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show current state and 24h stats of every target
    Status,

    /// List configured targets
    Targets,

    /// Show alert state per target
    Alerts,

    /// Show recent latency anomalies
    Anomalies {
        /// Lookback window in hours
        #[arg(long, default_value_t = 1)]
        hours: u32,
    },

    /// Export the last 24 hours of samples as CSV
    Export {
        /// Output file path (stdout if not specified)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Check that every proxied nginx location is monitored
    Coverage {
        /// nginx site configuration file
        #[arg(long)]
        nginx: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{e:#}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let api_url = config::Config::load()?.resolve_api_url(cli.api_url);
    let client = client::ApiClient::new(&api_url)?;

    match cli.command {
        Commands::Status => status::show_status(&client, cli.format).await?,
        Commands::Targets => status::list_targets(&client, cli.format).await?,
        Commands::Alerts => status::show_alerts(&client, cli.format).await?,
        Commands::Anomalies { hours } => {
            anomalies::show_anomalies(&client, hours, cli.format).await?
        }
        Commands::Export { output } => anomalies::export_csv(&client, output).await?,
        Commands::Coverage { nginx } => {
            if !coverage::verify(&client, &nginx, cli.format).await? {
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
