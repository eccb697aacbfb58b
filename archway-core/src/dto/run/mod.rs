//! Run DTOs for orchestrator API communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::pipeline::PipelineDefinition;
use crate::domain::run::{PipelineRun, RunStatus};

/// Request to start a new pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRun {
    pub pipeline: PipelineDefinition,
    /// Initial artifacts by logical name (e.g. `source=codecommit://repo@main`)
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
}

/// Response to an accepted run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStarted {
    pub run_id: Uuid,
}

/// Lightweight run summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub pipeline: String,
    pub status: RunStatus,
    pub stages_completed: usize,
    pub stage_count: usize,
    pub current_stage: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<PipelineRun> for RunSummary {
    fn from(run: PipelineRun) -> Self {
        Self {
            id: run.id,
            pipeline: run.pipeline,
            status: run.status,
            stages_completed: run.stages.len(),
            stage_count: run.stage_count,
            current_stage: run.current_stage,
            created_at: run.created_at,
            completed_at: run.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::{JobSpec, StageDefinition};

    #[test]
    fn test_run_summary_conversion() {
        let definition = PipelineDefinition {
            name: "multiarch".to_string(),
            description: None,
            stages: vec![StageDefinition::new(
                "build",
                vec![JobSpec::new("arm64", "repo")],
            )],
        };
        let run = PipelineRun::new(&definition);

        let summary: RunSummary = run.clone().into();
        assert_eq!(summary.id, run.id);
        assert_eq!(summary.status, RunStatus::Pending);
        assert_eq!(summary.stages_completed, 0);
        assert_eq!(summary.stage_count, 1);
    }

    #[test]
    fn test_start_run_artifacts_default() {
        let json = serde_json::json!({
            "pipeline": {
                "name": "multiarch",
                "stages": [{ "name": "build", "jobs": [{ "profile": "arm64", "source": "repo" }] }]
            }
        });

        let req: StartRun = serde_json::from_value(json).unwrap();
        assert!(req.artifacts.is_empty());
        assert_eq!(req.pipeline.stages[0].retry_count, 0);
    }
}
