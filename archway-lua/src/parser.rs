//! Pipeline definition parser
//!
//! Evaluates a Lua pipeline file in the sandbox and converts the returned
//! table into a [`PipelineDefinition`]. The result is validated before it is
//! handed back, so callers only ever see structurally valid pipelines.

use anyhow::{Context, Result};
use archway_core::domain::pipeline::{
    ConcurrencyPolicy, EnvBinding, JobSpec, PipelineDefinition, StageDefinition,
};
use mlua::{Table, Value};
use std::collections::BTreeMap;

use crate::sandbox::create_sandbox;

/// Parse a pipeline definition from Lua source code
///
/// # Errors
/// Returns an error if:
/// - The Lua source is invalid or does not return a table
/// - Required fields are missing (name, stages, jobs, profile, source)
/// - Field types are incorrect
/// - The resulting definition fails validation (duplicate stages, empty job lists, ...)
///
/// # Example
/// ```no_run
/// use archway_lua::parser::parse_pipeline_definition;
///
/// let source = r#"
///     return {
///         name = "springboot-multiarch",
///         stages = {
///             { name = "build-arm", jobs = { { profile = "arm64", source = "repo" } } },
///             { name = "publish", jobs = {
///                 { profile = "amd64", source = "repo", env = { ARM = artifact("image@arm") } },
///             } },
///         }
///     }
/// "#;
///
/// let definition = parse_pipeline_definition(source)?;
/// assert_eq!(definition.stages.len(), 2);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn parse_pipeline_definition(source: &str) -> Result<PipelineDefinition> {
    let lua = create_sandbox().context("Failed to create sandbox")?;

    let pipeline: Table = lua
        .load(source)
        .set_name("pipeline")
        .eval()
        .context("Failed to evaluate pipeline definition")?;

    let name: String = pipeline
        .get("name")
        .context("Pipeline must have a 'name' field")?;

    let description: Option<String> = pipeline
        .get("description")
        .context("Field 'description' must be a string")?;

    let stages = parse_stages(&pipeline)?;

    let definition = PipelineDefinition {
        name,
        description,
        stages,
    };

    definition
        .validate()
        .context("Invalid pipeline definition")?;

    Ok(definition)
}

/// Parse the 'stages' field from pipeline table
fn parse_stages(pipeline: &Table) -> Result<Vec<StageDefinition>> {
    let stages_table: Table = pipeline
        .get("stages")
        .context("Pipeline must have a 'stages' field")?;

    let mut stages = Vec::new();

    for pair in stages_table.sequence_values::<Table>() {
        let stage_table = pair.context("Failed to read stage entry")?;
        stages.push(parse_stage(&stage_table)?);
    }

    Ok(stages)
}

fn parse_stage(stage_table: &Table) -> Result<StageDefinition> {
    let name: String = stage_table
        .get("name")
        .context("Stage must have a 'name' field")?;

    let policy = match stage_table
        .get::<Option<String>>("policy")
        .context(format!("Stage '{}': 'policy' must be a string", name))?
    {
        Some(policy) => policy
            .parse::<ConcurrencyPolicy>()
            .context(format!("Stage '{}'", name))?,
        None => ConcurrencyPolicy::default(),
    };

    let retry_count: u32 = stage_table
        .get::<Option<u32>>("retries")
        .context(format!(
            "Stage '{}': 'retries' must be a non-negative integer",
            name
        ))?
        .unwrap_or(0);

    let non_blocking: bool = stage_table
        .get::<Option<bool>>("non_blocking")
        .context(format!("Stage '{}': 'non_blocking' must be a boolean", name))?
        .unwrap_or(false);

    let timeout_seconds: Option<u64> = stage_table.get("timeout").context(format!(
        "Stage '{}': 'timeout' must be a number of seconds",
        name
    ))?;

    let retry_backoff_seconds: Option<u64> = stage_table.get("backoff").context(format!(
        "Stage '{}': 'backoff' must be a number of seconds",
        name
    ))?;

    let jobs_table: Table = stage_table
        .get("jobs")
        .context(format!("Stage '{}' must have a 'jobs' field", name))?;

    let mut jobs = Vec::new();
    for pair in jobs_table.sequence_values::<Table>() {
        let job_table = pair.context(format!("Failed to read job entry in stage '{}'", name))?;
        jobs.push(parse_job(&name, &job_table)?);
    }

    Ok(StageDefinition {
        name,
        jobs,
        policy,
        retry_count,
        non_blocking,
        timeout_seconds,
        retry_backoff_seconds,
    })
}

fn parse_job(stage: &str, job_table: &Table) -> Result<JobSpec> {
    let profile: String = job_table
        .get("profile")
        .context(format!("Job in stage '{}' must have a 'profile' field", stage))?;

    let source: String = job_table.get("source").context(format!(
        "Job '{}' in stage '{}' must have a 'source' field",
        profile, stage
    ))?;

    let name: Option<String> = job_table
        .get("name")
        .context(format!("Job '{}': 'name' must be a string", profile))?;

    let env = parse_env(stage, &profile, job_table)?;

    Ok(JobSpec {
        name,
        profile,
        source,
        env,
    })
}

/// Parse the 'env' table of a job
///
/// Values may be strings or numbers (literals), or `{ secret = ... }` /
/// `{ artifact = ... }` tables.
fn parse_env(stage: &str, job: &str, job_table: &Table) -> Result<BTreeMap<String, EnvBinding>> {
    let env_value: Value = job_table.get("env").unwrap_or(Value::Nil);

    match env_value {
        Value::Nil => Ok(BTreeMap::new()),
        Value::Table(table) => {
            let mut env = BTreeMap::new();

            for pair in table.pairs::<String, Value>() {
                let (key, value) = pair.context(format!(
                    "Failed to read env entry of job '{}' in stage '{}'",
                    job, stage
                ))?;

                let binding = parse_binding(&value).context(format!(
                    "Job '{}' in stage '{}': invalid value for {}",
                    job, stage, key
                ))?;

                env.insert(key, binding);
            }

            Ok(env)
        }
        _ => Err(anyhow::anyhow!(
            "Job '{}' in stage '{}': field 'env' must be a table",
            job,
            stage
        )),
    }
}

fn parse_binding(value: &Value) -> Result<EnvBinding> {
    match value {
        Value::String(s) => Ok(EnvBinding::Literal(s.to_str()?.to_string())),
        Value::Integer(i) => Ok(EnvBinding::Literal(i.to_string())),
        Value::Number(n) => Ok(EnvBinding::Literal(n.to_string())),
        Value::Boolean(b) => Ok(EnvBinding::Literal(b.to_string())),
        Value::Table(table) => {
            if let Some(secret) = table.get::<Option<String>>("secret")? {
                Ok(EnvBinding::Secret(secret))
            } else if let Some(artifact) = table.get::<Option<String>>("artifact")? {
                Ok(EnvBinding::Artifact(artifact))
            } else {
                Err(anyhow::anyhow!(
                    "binding table must have a 'secret' or 'artifact' field"
                ))
            }
        }
        _ => Err(anyhow::anyhow!(
            "expected a string, number, boolean, secret() or artifact()"
        )),
    }
}
