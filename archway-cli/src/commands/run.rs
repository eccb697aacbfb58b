//! Run command handlers
//!
//! Starting, inspecting, listing and aborting pipeline runs.

use anyhow::{Context, Result};
use archway_client::{ClientError, OrchestratorClient};
use archway_core::domain::job::JobStatus;
use archway_core::domain::run::{PipelineRun, RunStatus, StageStatus};
use archway_core::dto::run::{RunSummary, StartRun};
use colored::*;
use std::collections::BTreeMap;
use std::process::ExitCode;

use crate::commands::validate::load_definition;
use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use crate::types::IdOrPrefix;

/// Parse a single key=value pair
pub fn parse_key_val(s: &str) -> Result<(String, String)> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    if key.is_empty() {
        anyhow::bail!("invalid KEY=value: empty key in `{}`", s);
    }
    Ok((key.to_string(), value.to_string()))
}

/// Exit code reported by `status` for a run status
pub fn exit_code_for(status: RunStatus) -> u8 {
    match status {
        RunStatus::Succeeded => 0,
        RunStatus::Failed | RunStatus::Aborted => 1,
        RunStatus::Pending | RunStatus::Running => 2,
    }
}

/// Exit code when a command could not complete
///
/// Failures talking to the orchestrator exit with 3 so `status` never reports
/// an unreachable orchestrator as a failed run.
pub fn exit_code_for_error(err: &anyhow::Error) -> u8 {
    if err.chain().any(|cause| cause.is::<ClientError>()) {
        3
    } else {
        1
    }
}

/// Start a run from a definition file
pub async fn start_run(
    config: &Config,
    path: &str,
    artifacts: Vec<(String, String)>,
) -> Result<ExitCode> {
    let pipeline = load_definition(path)?;
    let client = OrchestratorClient::new(&config.orchestrator_url);

    let req = StartRun {
        pipeline,
        artifacts: artifacts.into_iter().collect::<BTreeMap<_, _>>(),
    };

    let started = client
        .start_run(&req)
        .await
        .context("Orchestrator rejected the run")?;

    println!("{}", "✓ Run started".green().bold());
    println!("  Run ID:   {}", started.run_id.to_string().cyan());
    println!("  Pipeline: {}", req.pipeline.name.bold());

    Ok(ExitCode::SUCCESS)
}

/// Show a run snapshot and exit with its status code
pub async fn show_status(config: &Config, id: &str, json: bool) -> Result<ExitCode> {
    let client = OrchestratorClient::new(&config.orchestrator_url);
    let run_id = resolve_run_id(&client, &IdOrPrefix::parse(id)).await?;

    let run = client.get_run(run_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print_run_details(&run);
    }

    Ok(ExitCode::from(exit_code_for(run.status)))
}

/// List all runs
pub async fn list_runs(config: &Config) -> Result<ExitCode> {
    let client = OrchestratorClient::new(&config.orchestrator_url);
    let runs = client.list_runs().await?;

    if runs.is_empty() {
        println!("{}", "No runs found.".yellow());
    } else {
        println!("{}", format!("Found {} run(s):", runs.len()).bold());
        println!();
        for run in runs {
            print_run_summary(&run);
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Abort a run in progress
pub async fn abort_run(config: &Config, id: &str) -> Result<ExitCode> {
    let client = OrchestratorClient::new(&config.orchestrator_url);
    let run_id = resolve_run_id(&client, &IdOrPrefix::parse(id)).await?;

    let run = client.abort_run(run_id).await?;

    println!(
        "{}",
        format!("✓ Run {} aborted", run.id).green().bold()
    );

    Ok(ExitCode::SUCCESS)
}

fn colored_status(status: RunStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        RunStatus::Succeeded => text.green(),
        RunStatus::Failed | RunStatus::Aborted => text.red(),
        RunStatus::Pending | RunStatus::Running => text.yellow(),
    }
}

/// Print a run summary
fn print_run_summary(run: &RunSummary) {
    println!("  {} {}", "▸".cyan(), run.pipeline.bold());
    println!("    ID:      {}", run.id.to_string().dimmed());
    println!("    Status:  {}", colored_status(run.status));
    println!(
        "    Stages:  {}/{}{}",
        run.stages_completed,
        run.stage_count,
        run.current_stage
            .as_ref()
            .map(|s| format!(" (running {})", s))
            .unwrap_or_default()
            .dimmed()
    );
    println!(
        "    Created: {}",
        run.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

/// Print detailed run information
fn print_run_details(run: &PipelineRun) {
    println!("{}", "Run Details:".bold());
    println!("  ID:        {}", run.id.to_string().cyan());
    println!("  Pipeline:  {}", run.pipeline.bold());
    println!("  Status:    {}", colored_status(run.status));
    println!("  Created:   {}", run.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(started) = run.started_at {
        println!("  Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(completed) = run.completed_at {
        println!("  Completed: {}", completed.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(stage) = &run.current_stage {
        println!("  Current:   {}", stage.yellow());
    }
    if let Some(error) = &run.error {
        println!("  Error:     {}", error.red());
    }

    println!(
        "\n{}",
        format!("Stages ({}/{}):", run.stages.len(), run.stage_count).bold()
    );
    for stage in &run.stages {
        let status = match stage.status {
            StageStatus::Succeeded => stage.status.to_string().green(),
            StageStatus::Failed if stage.non_blocking => {
                format!("{} (non-blocking)", stage.status).yellow()
            }
            StageStatus::Failed => stage.status.to_string().red(),
        };
        println!("  {} {} {}", "▸".cyan(), stage.stage.bold(), status);

        for job in &stage.jobs {
            let job_status = match job.status {
                JobStatus::Succeeded => job.status.to_string().green(),
                _ => job.status.to_string().red(),
            };
            println!(
                "    - {} [{}] {} {}",
                job.job,
                job.profile.dimmed(),
                job_status,
                format!("(attempt {})", job.attempt).dimmed()
            );
            if let Some(error) = &job.error {
                println!("      {}", error.dimmed());
            }
        }

        if !stage.forwarded.is_empty() {
            let names: Vec<&str> = stage.forwarded.iter().map(|a| a.name.as_str()).collect();
            println!("    Forwarded: {}", names.join(", ").cyan());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("source=codecommit://springboot@main").unwrap(),
            (
                "source".to_string(),
                "codecommit://springboot@main".to_string()
            )
        );
        assert_eq!(
            parse_key_val("tag=a=b").unwrap(),
            ("tag".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_key_val("empty=").unwrap(),
            ("empty".to_string(), String::new())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=value").is_err());
    }

    #[test]
    fn test_exit_code_for() {
        assert_eq!(exit_code_for(RunStatus::Succeeded), 0);
        assert_eq!(exit_code_for(RunStatus::Failed), 1);
        assert_eq!(exit_code_for(RunStatus::Aborted), 1);
        assert_eq!(exit_code_for(RunStatus::Running), 2);
        assert_eq!(exit_code_for(RunStatus::Pending), 2);
    }

    #[test]
    fn test_exit_code_for_error() {
        let garbled = anyhow::Error::from(ClientError::ParseError("truncated body".to_string()));
        assert_eq!(exit_code_for_error(&garbled), 3);

        let rejected = Err::<(), _>(ClientError::api_error(404, r#"{"error":"Run not found"}"#))
            .context("Orchestrator rejected the run")
            .unwrap_err();
        assert_eq!(exit_code_for_error(&rejected), 3);

        let local = anyhow::anyhow!("Failed to read pipeline.lua");
        assert_eq!(exit_code_for_error(&local), 1);
    }
}
