//! Commands module
//!
//! Defines all CLI commands and their handlers.

pub mod run;
mod validate;

use anyhow::Result;
use clap::Subcommand;
use std::process::ExitCode;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start a run of a pipeline definition file
    Start {
        /// Path to the Lua pipeline definition
        definition: String,

        /// Initial artifacts as key=value pairs (e.g. source=codecommit://repo@main)
        #[arg(short, long = "artifact", value_parser = run::parse_key_val)]
        artifacts: Vec<(String, String)>,
    },
    /// Show a run snapshot; exits 0 if it succeeded, 1 if it failed or was aborted, 2 while in progress, 3 if the orchestrator could not answer
    Status {
        /// Run ID or unambiguous prefix
        id: String,

        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a pipeline definition file without starting it
    Validate {
        /// Path to the Lua pipeline definition
        definition: String,
    },
    /// List runs, newest first
    List,
    /// Abort a run in progress
    Abort {
        /// Run ID or unambiguous prefix
        id: String,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Returns
/// The process exit code
pub async fn handle_command(command: Commands, config: &Config) -> Result<ExitCode> {
    match command {
        Commands::Start {
            definition,
            artifacts,
        } => run::start_run(config, &definition, artifacts).await,
        Commands::Status { id, json } => run::show_status(config, &id, json).await,
        Commands::Validate { definition } => validate::validate_definition(&definition),
        Commands::List => run::list_runs(config).await,
        Commands::Abort { id } => run::abort_run(config, &id).await,
    }
}
