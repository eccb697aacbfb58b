//! Archway CLI
//!
//! Command-line interface for starting and inspecting pipeline runs.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "archway")]
#[command(about = "Archway multi-architecture build orchestrator CLI", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(
        long,
        env = "ARCHWAY_ORCHESTRATOR_URL",
        default_value = "http://localhost:8080"
    )]
    orchestrator_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = Config {
        orchestrator_url: cli.orchestrator_url,
    };

    match handle_command(cli.command, &config).await {
        Ok(code) => Ok(code),
        Err(e) => {
            eprintln!("Error: {:?}", e);
            Ok(ExitCode::from(commands::run::exit_code_for_error(&e)))
        }
    }
}
