//! fleet-orchestrator binary entry point.
//!
//! Usage:
//! ```bash
//! fleet-orchestrator --config fleet.toml seed --images win10,win11 --flags ALL
//! fleet-orchestrator --config fleet.toml run
//! fleet-orchestrator --config fleet.toml run --simulate
//! fleet-orchestrator --config fleet.toml status
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleet_orchestrator::config::Config;
use std::path::{Path, PathBuf};

mod commands;

/// Runs permutation test experiments on a fleet of disposable workers.
#[derive(Parser, Debug)]
#[command(name = "fleet-orchestrator")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = "fleet.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate test cases for the configured experiment
    Seed {
        /// Comma-separated image classes
        #[arg(long)]
        images: String,

        /// ALL, or comma-separated flag=value batches (an entry with ';' sets the root)
        #[arg(long, default_value = "ALL")]
        flags: String,
    },

    /// Run the experiment to completion
    Run {
        /// Use the in-process simulated fleet instead of the compute commands
        #[arg(long)]
        simulate: bool,
    },

    /// Show test case counts per status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Seed { images, flags } => {
            commands::seed::run(&config, &images, &flags).await?;
        }
        Commands::Run { simulate } => {
            commands::run::run(config, simulate).await?;
        }
        Commands::Status => {
            commands::status::run(&config).await?;
        }
    }

    Ok(())
}

/// Load the config file, falling back to defaults when it does not exist.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::warn!("Config file {} not found, using defaults", path.display());
        return Ok(Config::default());
    }
    Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))
}
