use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use transit::config::TransitConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "transit")]
#[command(version, about = "Page-transition progress signaling")]
pub struct Cli {
    /// Enable debug logging for transit
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a navigation script through the bus and a terminal progress bar
    Simulate {
        /// Path to a TOML script. Runs the built-in demo if omitted.
        script: Option<PathBuf>,

        /// Delay before the progress bar appears, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Never draw the spinner
        #[arg(long)]
        no_spinner: bool,

        /// Print one JSON record per finished transition instead of the bar
        #[arg(long)]
        json: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default transit.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Simulate {
            script,
            delay_ms,
            no_spinner,
            json,
        } => {
            let config = TransitConfig::with_cli_args(&project_dir, *delay_ms, *no_spinner)?;
            let _guard =
                transit::logging::init(config.logging(), cli.verbose, cli.log_file.as_deref())?;
            for warning in config.validate() {
                tracing::warn!("{}", warning);
            }
            cmd::cmd_simulate(&config, script.as_deref(), *json).await?;
        }
        Commands::Config { command } => {
            cmd::cmd_config(&project_dir, command.clone())?;
        }
    }

    Ok(())
}
