//! Pipeline domain types
//!
//! A pipeline is an ordered list of stages. Each stage groups one or more build
//! jobs that run together under a completion policy. Definitions are resolved
//! once before a run starts and are never mutated while it executes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;
use thiserror::Error;

/// Stage name under which artifacts supplied at run start are stored
pub const INPUT_STAGE: &str = "@input";

/// Pipeline definition
///
/// Structure shared between the CLI (parses and submits) and the orchestrator (executes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub stages: Vec<StageDefinition>,
}

/// How the outcomes of a stage's jobs fold into the stage status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConcurrencyPolicy {
    /// Every job must succeed; nothing is forwarded otherwise
    #[default]
    AllMustSucceed,
    /// At least one job must succeed; successful jobs' artifacts are forwarded
    BestEffort,
}

impl FromStr for ConcurrencyPolicy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" | "all_must_succeed" => Ok(ConcurrencyPolicy::AllMustSucceed),
            "best_effort" | "any" => Ok(ConcurrencyPolicy::BestEffort),
            other => Err(ConfigurationError::InvalidPolicy(other.to_string())),
        }
    }
}

impl std::fmt::Display for ConcurrencyPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcurrencyPolicy::AllMustSucceed => write!(f, "all_must_succeed"),
            ConcurrencyPolicy::BestEffort => write!(f, "best_effort"),
        }
    }
}

/// A named group of jobs executed concurrently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    pub jobs: Vec<JobSpec>,
    #[serde(default)]
    pub policy: ConcurrencyPolicy,
    /// Additional attempts granted to a job that reports failure
    #[serde(default)]
    pub retry_count: u32,
    /// A failed non-blocking stage is recorded but does not stop the run
    #[serde(default)]
    pub non_blocking: bool,
    /// Per-attempt deadline; falls back to the orchestrator default
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Linear backoff step between attempts; falls back to the orchestrator default
    #[serde(default)]
    pub retry_backoff_seconds: Option<u64>,
}

impl StageDefinition {
    /// Creates a blocking, all-must-succeed stage with no retries
    pub fn new(name: impl Into<String>, jobs: Vec<JobSpec>) -> Self {
        Self {
            name: name.into(),
            jobs,
            policy: ConcurrencyPolicy::default(),
            retry_count: 0,
            non_blocking: false,
            timeout_seconds: None,
            retry_backoff_seconds: None,
        }
    }
}

/// One build job pinned to one architecture/environment profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Optional display name; defaults to the profile
    #[serde(default)]
    pub name: Option<String>,
    pub profile: String,
    pub source: String,
    #[serde(default)]
    pub env: BTreeMap<String, EnvBinding>,
}

impl JobSpec {
    pub fn new(profile: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: None,
            profile: profile.into(),
            source: source.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, binding: EnvBinding) -> Self {
        self.env.insert(key.into(), binding);
        self
    }

    /// Name used to identify the job within its stage
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.profile)
    }
}

/// Value bound to an environment variable of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvBinding {
    /// Plain value passed through unchanged
    Literal(String),
    /// Contents of an inherited artifact, by logical name
    Artifact(String),
    /// Value looked up from the secret store, by name
    Secret(String),
}

/// Invalid pipeline definition or unresolvable job configuration
///
/// Always detected before any job of the affected stage starts and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("pipeline name cannot be empty")]
    EmptyPipelineName,

    #[error("pipeline '{0}' must have at least one stage")]
    NoStages(String),

    #[error("stage name cannot be empty")]
    EmptyStageName,

    #[error("stage name '{0}' is reserved")]
    ReservedStageName(String),

    #[error("duplicate stage name '{0}'")]
    DuplicateStage(String),

    #[error("stage '{0}' must have at least one job")]
    EmptyStage(String),

    #[error("job in stage '{stage}' has an empty profile")]
    EmptyProfile { stage: String },

    #[error("duplicate job '{job}' in stage '{stage}' (give each job a distinct name)")]
    DuplicateJob { stage: String, job: String },

    #[error("stage '{0}' has a zero timeout")]
    ZeroTimeout(String),

    #[error("invalid concurrency policy '{0}' (expected 'all' or 'best_effort')")]
    InvalidPolicy(String),

    #[error(
        "job '{job}' in stage '{stage}': variable {variable} references unknown artifact '{artifact}'"
    )]
    UnresolvedArtifact {
        stage: String,
        job: String,
        variable: String,
        artifact: String,
    },

    #[error("job '{job}' in stage '{stage}': variable {variable} references unknown secret '{secret}'")]
    UnresolvedSecret {
        stage: String,
        job: String,
        variable: String,
        secret: String,
    },
}

impl PipelineDefinition {
    /// Checks structural rules that must hold before any run is accepted
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::EmptyPipelineName);
        }

        if self.stages.is_empty() {
            return Err(ConfigurationError::NoStages(self.name.clone()));
        }

        let mut stage_names = HashSet::new();
        for stage in &self.stages {
            stage.validate()?;

            if !stage_names.insert(stage.name.as_str()) {
                return Err(ConfigurationError::DuplicateStage(stage.name.clone()));
            }
        }

        Ok(())
    }

    /// Looks up a stage by name
    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }
}

impl StageDefinition {
    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::EmptyStageName);
        }

        if self.name.starts_with('@') {
            return Err(ConfigurationError::ReservedStageName(self.name.clone()));
        }

        if self.jobs.is_empty() {
            return Err(ConfigurationError::EmptyStage(self.name.clone()));
        }

        if self.timeout_seconds == Some(0) {
            return Err(ConfigurationError::ZeroTimeout(self.name.clone()));
        }

        let mut job_names = HashSet::new();
        for job in &self.jobs {
            if job.profile.trim().is_empty() {
                return Err(ConfigurationError::EmptyProfile {
                    stage: self.name.clone(),
                });
            }

            if !job_names.insert(job.display_name()) {
                return Err(ConfigurationError::DuplicateJob {
                    stage: self.name.clone(),
                    job: job.display_name().to_string(),
                });
            }
        }

        Ok(())
    }
}
