//! Pipeline Coordinator
//!
//! Owns run lifecycles: accepts a definition, registers the run, then drives
//! its stages one after another in a background task, threading forwarded
//! artifacts from each stage into the next.

use archway_core::domain::artifact::ArtifactRef;
use archway_core::domain::pipeline::{ConfigurationError, INPUT_STAGE, PipelineDefinition};
use archway_core::domain::run::{PipelineRun, RunStatus};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::executor::CancelToken;
use crate::repository::{ArtifactStore, RegistryError, RunRegistry};
use crate::service::stage::{StageError, StageRunner};

/// Why a run could not be started
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub struct PipelineCoordinator {
    registry: Arc<RunRegistry>,
    artifacts: Arc<ArtifactStore>,
    runner: StageRunner,
    cancellations: Mutex<HashMap<Uuid, CancelToken>>,
    max_retained_runs: usize,
}

impl PipelineCoordinator {
    pub fn new(
        registry: Arc<RunRegistry>,
        artifacts: Arc<ArtifactStore>,
        runner: StageRunner,
        max_retained_runs: usize,
    ) -> Self {
        Self {
            registry,
            artifacts,
            runner,
            cancellations: Mutex::new(HashMap::new()),
            max_retained_runs,
        }
    }

    /// Validates `definition`, registers a pending run and starts driving it
    ///
    /// Returns as soon as the run is registered.
    pub fn start_run(
        self: &Arc<Self>,
        definition: PipelineDefinition,
        initial_artifacts: BTreeMap<String, String>,
    ) -> Result<Uuid, CoordinatorError> {
        definition.validate()?;

        let run = PipelineRun::new(&definition);
        let run_id = run.id;
        self.registry.register(run)?;

        let inputs: Vec<ArtifactRef> = initial_artifacts
            .iter()
            .map(|(name, value)| self.artifacts.put(run_id, INPUT_STAGE, name, value))
            .collect();

        let cancel = CancelToken::new();
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(run_id, cancel.clone());

        info!(
            "Run {} accepted for pipeline '{}' ({} stage(s), {} input artifact(s))",
            run_id,
            definition.name,
            definition.stages.len(),
            inputs.len()
        );

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.drive(run_id, definition, inputs, cancel).await;
            coordinator.cleanup(run_id);
        });

        Ok(run_id)
    }

    /// Point-in-time snapshot of a run
    pub fn get_status(&self, run_id: Uuid) -> Option<PipelineRun> {
        self.registry.get(run_id)
    }

    /// Snapshots of every known run, newest first
    pub fn list_runs(&self) -> Vec<PipelineRun> {
        self.registry.list()
    }

    pub fn active_runs(&self) -> usize {
        self.registry.active_count()
    }

    /// Aborts a run that has not finished yet
    ///
    /// The run becomes `Aborted` immediately; in-flight jobs are signalled and
    /// stop at their next checkpoint.
    pub fn abort(&self, run_id: Uuid) -> Result<PipelineRun, RegistryError> {
        self.registry.update(run_id, |run| {
            run.status = RunStatus::Aborted;
            run.error = Some("aborted on request".to_string());
            run.current_stage = None;
            run.completed_at = Some(Utc::now());
        })?;

        if let Some(cancel) = self
            .cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&run_id)
        {
            cancel.cancel();
        }

        info!("Run {} aborted on request", run_id);
        self.registry.get(run_id).ok_or(RegistryError::NotFound(run_id))
    }

    async fn drive(
        &self,
        run_id: Uuid,
        definition: PipelineDefinition,
        inputs: Vec<ArtifactRef>,
        cancel: CancelToken,
    ) {
        let started = self.registry.update(run_id, |run| {
            run.status = RunStatus::Running;
            run.started_at = Some(Utc::now());
        });
        if let Err(e) = started {
            debug!("Run {} not started: {}", run_id, e);
            return;
        }

        let mut inherited = inputs;

        for stage in &definition.stages {
            if cancel.is_cancelled() {
                return;
            }

            if self
                .registry
                .update(run_id, |run| run.current_stage = Some(stage.name.clone()))
                .is_err()
            {
                return;
            }

            let result = match self.runner.run(stage, run_id, &inherited, &cancel).await {
                Ok(result) => result,
                Err(e) => {
                    let message = match &e {
                        StageError::Configuration(_) | StageError::ConflictingArtifact { .. } => {
                            format!("configuration error: {}", e)
                        }
                        StageError::Execution { .. } => format!("execution error: {}", e),
                    };
                    error!("Run {} failed: {}", run_id, message);
                    self.finish(run_id, RunStatus::Failed, Some(message));
                    return;
                }
            };

            let failed = !result.is_success();
            let forwarded = result.forwarded.clone();
            let stage_name = result.stage.clone();

            let published = self.registry.update(run_id, |run| {
                run.stages.push(result);
                run.current_stage = None;
            });
            if let Err(e) = published {
                debug!("Run {}: stage '{}' result dropped: {}", run_id, stage_name, e);
                return;
            }

            if failed && !stage.non_blocking {
                warn!(
                    "Run {}: blocking stage '{}' failed, skipping remaining stages",
                    run_id, stage_name
                );
                self.finish(
                    run_id,
                    RunStatus::Aborted,
                    Some(format!("stage '{}' failed", stage_name)),
                );
                return;
            }

            if failed {
                warn!(
                    "Run {}: non-blocking stage '{}' failed, continuing",
                    run_id, stage_name
                );
            }

            for artifact in forwarded {
                inherited.retain(|a| a.name != artifact.name);
                inherited.push(artifact);
            }
        }

        self.finish(run_id, RunStatus::Succeeded, None);
    }

    fn finish(&self, run_id: Uuid, status: RunStatus, error: Option<String>) {
        let finished = self.registry.update(run_id, |run| {
            run.status = status;
            run.error = error;
            run.current_stage = None;
            run.completed_at = Some(Utc::now());
        });

        match finished {
            Ok(()) => info!("Run {} finished: {}", run_id, status),
            Err(e) => debug!("Run {} not finalized: {}", run_id, e),
        }
    }

    fn cleanup(&self, run_id: Uuid) {
        self.cancellations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&run_id);

        for evicted in self.registry.prune(self.max_retained_runs) {
            let removed = self.artifacts.remove_run(evicted);
            debug!("Evicted run {} ({} artifact(s))", evicted, removed);
        }
    }
}
