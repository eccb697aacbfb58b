//! Validate command handler
//!
//! Parses and checks a pipeline definition locally, without the orchestrator.

use anyhow::{Context, Result};
use archway_core::domain::pipeline::PipelineDefinition;
use colored::*;
use std::process::ExitCode;

/// Read and parse a pipeline definition file
pub fn load_definition(path: &str) -> Result<PipelineDefinition> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline definition: {}", path))?;

    archway_lua::parse_pipeline_definition(&source)
        .with_context(|| format!("Failed to load pipeline definition: {}", path))
}

/// Validate a pipeline definition and print its stages
pub fn validate_definition(path: &str) -> Result<ExitCode> {
    let definition = load_definition(path)?;

    println!("{}", "✓ Pipeline definition is valid".green().bold());
    print_definition(&definition);

    Ok(ExitCode::SUCCESS)
}

/// Print the stages of a definition
pub fn print_definition(definition: &PipelineDefinition) {
    println!("  Name:   {}", definition.name.bold());
    if let Some(desc) = &definition.description {
        println!("  Description: {}", desc.dimmed());
    }
    println!("  Stages: {}", definition.stages.len());

    for (index, stage) in definition.stages.iter().enumerate() {
        let mut traits = vec![stage.policy.to_string()];
        if stage.retry_count > 0 {
            traits.push(format!("retries={}", stage.retry_count));
        }
        if let Some(timeout) = stage.timeout_seconds {
            traits.push(format!("timeout={}s", timeout));
        }
        if stage.non_blocking {
            traits.push("non-blocking".to_string());
        }

        println!(
            "    {}. {} {}",
            index + 1,
            stage.name.cyan(),
            format!("({})", traits.join(", ")).dimmed()
        );
        for job in &stage.jobs {
            println!(
                "       - {} [{}] {}",
                job.display_name(),
                job.profile.yellow(),
                job.source.dimmed()
            );
        }
    }
}
