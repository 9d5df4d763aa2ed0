//! PakMirror CLI - command-line interface for the PakMirror server.
//!
//! Provides commands for job, log, system, and configuration management.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, job, logs, system};
use output::OutputFormat;

/// PakMirror - Image Mirroring Job Orchestration CLI
#[derive(Parser)]
#[command(
    name = "pakmirror",
    version = "0.1.0",
    about = "PakMirror - image mirroring job orchestration",
    long_about = "CLI tool for managing PakMirror mirroring jobs, live logs, and system configuration.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "PAKMIRROR_API_URL")]
    api_url: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Job management operations
    #[command(subcommand)]
    Job(job::JobCommands),

    /// View or follow job logs
    Logs(logs::LogsArgs),

    /// System information and validation
    #[command(subcommand)]
    System(system::SystemCommands),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let api_url = cli
        .api_url
        .clone()
        .or_else(config::load_api_url)
        .unwrap_or_else(|| "http://localhost:8080".to_string());

    let client = client::ApiClient::new(&api_url)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Job(cmd) => job::execute(cmd, &client, format).await,
        Commands::Logs(args) => logs::execute(args, &client).await,
        Commands::System(cmd) => system::execute(cmd, &client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
