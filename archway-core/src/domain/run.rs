//! Pipeline run domain types
//!
//! A run is one end-to-end execution of a pipeline definition. The orchestrator
//! owns every run and publishes complete snapshots of it to observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::artifact::ArtifactRef;
use crate::domain::job::JobResult;
use crate::domain::pipeline::PipelineDefinition;

/// Overall status of a pipeline run
///
/// `Pending -> Running -> {Succeeded | Failed | Aborted}`. A run may also be
/// aborted or failed straight from `Pending`. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Aborted
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (RunStatus::Pending, RunStatus::Running) => true,
            (RunStatus::Pending, RunStatus::Failed | RunStatus::Aborted) => true,
            (RunStatus::Running, RunStatus::Running) => true,
            (RunStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "Pending"),
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Succeeded => write!(f, "Succeeded"),
            RunStatus::Failed => write!(f, "Failed"),
            RunStatus::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Aggregate status of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Succeeded,
    Failed,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Succeeded => write!(f, "Succeeded"),
            StageStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Aggregate of the job results of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub status: StageStatus,
    pub non_blocking: bool,
    /// Last attempt of each job, in definition order
    pub jobs: Vec<JobResult>,
    /// Artifacts handed to later stages
    pub forwarded: Vec<ArtifactRef>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Succeeded
    }
}

/// One execution of a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline: String,
    pub status: RunStatus,
    /// Number of stages in the definition
    pub stage_count: usize,
    /// Completed stages, in execution order (append-only)
    pub stages: Vec<StageResult>,
    /// Stage currently executing, if any
    pub current_stage: Option<String>,
    /// Every job attempt, in completion order
    pub history: Vec<JobAttempt>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Creates a pending run for a definition with a fresh id
    pub fn new(definition: &PipelineDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline: definition.name.clone(),
            status: RunStatus::Pending,
            stage_count: definition.stages.len(),
            stages: Vec::new(),
            current_stage: None,
            history: Vec::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Result of a completed stage by name
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }

    /// All recorded attempts of one job, oldest first
    pub fn attempts<'a>(
        &'a self,
        stage: &'a str,
        job: &'a str,
    ) -> impl Iterator<Item = &'a JobResult> + 'a {
        self.history
            .iter()
            .filter(move |a| a.stage == stage && a.result.job == job)
            .map(|a| &a.result)
    }
}

/// A job attempt recorded in a run's execution history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAttempt {
    pub stage: String,
    pub result: JobResult,
}
