//! Stage Runner
//!
//! Executes one stage: resolves job environments, launches every job
//! concurrently on the shared worker pool, applies deadlines and retries, and
//! folds the outcomes into a `StageResult` according to the stage policy.

use archway_core::domain::artifact::ArtifactRef;
use archway_core::domain::job::{JobResult, JobStatus};
use archway_core::domain::pipeline::{
    ConcurrencyPolicy, ConfigurationError, EnvBinding, JobSpec, StageDefinition,
};
use archway_core::domain::run::{JobAttempt, StageResult, StageStatus};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::executor::{BuildExecutor, CancelToken, ExecutionError, JobContext};
use crate::repository::{ArtifactStore, RegistryError, RunRegistry};
use crate::service::secrets::SecretResolver;

/// Why a stage could not produce a result
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("stage '{stage}', job '{job}': {source}")]
    Execution {
        stage: String,
        job: String,
        #[source]
        source: ExecutionError,
    },

    #[error("stage '{stage}': artifact '{artifact}' published by both job '{first}' and job '{second}'")]
    ConflictingArtifact {
        stage: String,
        artifact: String,
        first: String,
        second: String,
    },
}

/// Fallbacks for stages that do not set their own deadline or backoff
#[derive(Debug, Clone, Copy)]
pub struct StageDefaults {
    pub job_timeout: Duration,
    pub retry_backoff: Duration,
}

impl Default for StageDefaults {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(3600),
            retry_backoff: Duration::from_secs(5),
        }
    }
}

/// Everything a job task needs, owned so it can move into `tokio::spawn`
struct JobTask {
    job: JobSpec,
    stage: String,
    run_id: Uuid,
    env: BTreeMap<String, String>,
    inherited: Vec<ArtifactRef>,
    retry_count: u32,
    timeout: Duration,
    backoff: Duration,
    executor: Arc<dyn BuildExecutor>,
    artifacts: Arc<ArtifactStore>,
    registry: Arc<RunRegistry>,
    workers: Arc<Semaphore>,
    cancel: CancelToken,
}

pub struct StageRunner {
    executor: Arc<dyn BuildExecutor>,
    artifacts: Arc<ArtifactStore>,
    registry: Arc<RunRegistry>,
    secrets: Arc<dyn SecretResolver>,
    workers: Arc<Semaphore>,
    defaults: StageDefaults,
}

impl StageRunner {
    pub fn new(
        executor: Arc<dyn BuildExecutor>,
        artifacts: Arc<ArtifactStore>,
        registry: Arc<RunRegistry>,
        secrets: Arc<dyn SecretResolver>,
        max_parallel_jobs: usize,
        defaults: StageDefaults,
    ) -> Self {
        Self {
            executor,
            artifacts,
            registry,
            secrets,
            workers: Arc::new(Semaphore::new(max_parallel_jobs.max(1))),
            defaults,
        }
    }

    /// Runs every job of `stage` and aggregates their final attempts
    ///
    /// Environment bindings of all jobs are resolved before any job starts. An
    /// `ExecutionError` from any job aborts the others and fails the stage.
    pub async fn run(
        &self,
        stage: &StageDefinition,
        run_id: Uuid,
        inherited: &[ArtifactRef],
        cancel: &CancelToken,
    ) -> Result<StageResult, StageError> {
        let started_at = Utc::now();

        let envs = stage
            .jobs
            .iter()
            .map(|job| self.resolve_env(stage, job, inherited))
            .collect::<Result<Vec<_>, _>>()?;

        let timeout = stage
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.defaults.job_timeout);
        let backoff = stage
            .retry_backoff_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.defaults.retry_backoff);

        info!(
            "Run {}: starting stage '{}' ({} job(s), policy {})",
            run_id,
            stage.name,
            stage.jobs.len(),
            stage.policy
        );

        let mut tasks = JoinSet::new();
        for (index, (job, env)) in stage.jobs.iter().zip(envs).enumerate() {
            let task = JobTask {
                job: job.clone(),
                stage: stage.name.clone(),
                run_id,
                env,
                inherited: inherited.to_vec(),
                retry_count: stage.retry_count,
                timeout,
                backoff,
                executor: Arc::clone(&self.executor),
                artifacts: Arc::clone(&self.artifacts),
                registry: Arc::clone(&self.registry),
                workers: Arc::clone(&self.workers),
                cancel: cancel.clone(),
            };
            tasks.spawn(async move { (index, task.run().await) });
        }

        let mut slots: Vec<Option<JobResult>> = vec![None; stage.jobs.len()];

        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined.map_err(|e| StageError::Execution {
                stage: stage.name.clone(),
                job: "<task>".to_string(),
                source: ExecutionError::Launch(format!("job task failed: {}", e)),
            })?;

            match outcome {
                Ok(result) => slots[index] = Some(result),
                Err(source) => {
                    warn!(
                        "Run {}: stage '{}' job '{}' could not be executed: {}",
                        run_id,
                        stage.name,
                        stage.jobs[index].display_name(),
                        source
                    );
                    // Dropping the set aborts the remaining jobs
                    return Err(StageError::Execution {
                        stage: stage.name.clone(),
                        job: stage.jobs[index].display_name().to_string(),
                        source,
                    });
                }
            }
        }

        let jobs: Vec<JobResult> = slots.into_iter().flatten().collect();
        let result = aggregate(stage, jobs, started_at)?;

        info!(
            "Run {}: stage '{}' {} ({} artifact(s) forwarded)",
            run_id,
            stage.name,
            result.status,
            result.forwarded.len()
        );

        Ok(result)
    }

    fn resolve_env(
        &self,
        stage: &StageDefinition,
        job: &JobSpec,
        inherited: &[ArtifactRef],
    ) -> Result<BTreeMap<String, String>, ConfigurationError> {
        let mut env = BTreeMap::new();

        for (variable, binding) in &job.env {
            let value = match binding {
                EnvBinding::Literal(value) => value.clone(),
                EnvBinding::Artifact(name) => inherited
                    .iter()
                    .rev()
                    .find(|a| &a.name == name)
                    .and_then(|a| self.artifacts.get_string(a))
                    .ok_or_else(|| ConfigurationError::UnresolvedArtifact {
                        stage: stage.name.clone(),
                        job: job.display_name().to_string(),
                        variable: variable.clone(),
                        artifact: name.clone(),
                    })?,
                EnvBinding::Secret(name) => {
                    self.secrets
                        .resolve(name)
                        .ok_or_else(|| ConfigurationError::UnresolvedSecret {
                            stage: stage.name.clone(),
                            job: job.display_name().to_string(),
                            variable: variable.clone(),
                            secret: name.clone(),
                        })?
                }
            };
            env.insert(variable.clone(), value);
        }

        Ok(env)
    }
}

impl JobTask {
    /// Attempts the job until it succeeds, times out or runs out of retries
    async fn run(self) -> Result<JobResult, ExecutionError> {
        let mut attempt = 1;

        loop {
            let ctx = JobContext {
                run_id: self.run_id,
                stage: self.stage.clone(),
                attempt,
                env: self.env.clone(),
                inherited: self.inherited.clone(),
                artifacts: Arc::clone(&self.artifacts),
                cancel: self.cancel.clone(),
                started_at: Utc::now(),
            };

            let result = self.attempt(&ctx).await?;
            self.record(&result);

            let retryable = result.status == JobStatus::Failed
                && attempt <= self.retry_count
                && !self.cancel.is_cancelled();
            if !retryable {
                return Ok(result);
            }

            let delay = self.backoff.saturating_mul(attempt);
            warn!(
                "Run {}: job '{}' in stage '{}' failed attempt {}, retrying in {:?}",
                self.run_id,
                self.job.display_name(),
                self.stage,
                attempt,
                delay
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => return Ok(result),
            }

            attempt += 1;
        }
    }

    async fn attempt(&self, ctx: &JobContext) -> Result<JobResult, ExecutionError> {
        let permit = tokio::select! {
            permit = Arc::clone(&self.workers).acquire_owned() => permit
                .map_err(|_| ExecutionError::Launch("worker pool closed".to_string()))?,
            _ = self.cancel.cancelled() => {
                return Ok(ctx.result(&self.job, JobStatus::Cancelled).with_error("cancelled"));
            }
        };

        debug!(
            "Run {}: job '{}' in stage '{}' attempt {}",
            self.run_id,
            self.job.display_name(),
            self.stage,
            ctx.attempt
        );

        let outcome = tokio::time::timeout(self.timeout, self.executor.execute(&self.job, ctx)).await;
        drop(permit);

        let result = match outcome {
            Ok(result) => result?,
            Err(_) => ctx
                .result(&self.job, JobStatus::TimedOut)
                .with_error(format!("deadline of {:?} exceeded", self.timeout)),
        };

        // Identity fields belong to the runner, not the executor
        let mut result = result;
        result.job = self.job.display_name().to_string();
        result.profile = self.job.profile.clone();
        result.attempt = ctx.attempt;
        Ok(result)
    }

    fn record(&self, result: &JobResult) {
        let attempt = JobAttempt {
            stage: self.stage.clone(),
            result: result.clone(),
        };

        match self
            .registry
            .update(self.run_id, |run| run.history.push(attempt))
        {
            Ok(()) => {}
            Err(RegistryError::Terminal { .. }) => {
                debug!(
                    "Run {} already finished, attempt of '{}' not recorded",
                    self.run_id,
                    self.job.display_name()
                );
            }
            Err(e) => warn!("Failed to record job attempt: {}", e),
        }
    }
}

/// Folds final job attempts into a stage result
///
/// Two jobs forwarding the same logical name is an error: the store keeps a
/// single `(run, stage, name)` slot, so only one of them could stay readable.
fn aggregate(
    stage: &StageDefinition,
    jobs: Vec<JobResult>,
    started_at: chrono::DateTime<Utc>,
) -> Result<StageResult, StageError> {
    let succeeded = jobs.iter().filter(|j| j.is_success()).count();

    let status = match stage.policy {
        ConcurrencyPolicy::AllMustSucceed if succeeded == jobs.len() => StageStatus::Succeeded,
        ConcurrencyPolicy::BestEffort if succeeded > 0 => StageStatus::Succeeded,
        _ => StageStatus::Failed,
    };

    let forwarded = if status == StageStatus::Succeeded {
        forwarded_artifacts(&stage.name, &jobs)?
    } else {
        Vec::new()
    };

    Ok(StageResult {
        stage: stage.name.clone(),
        status,
        non_blocking: stage.non_blocking,
        jobs,
        forwarded,
        started_at,
        completed_at: Utc::now(),
    })
}

/// Artifacts of successful jobs, one per logical name
///
/// A job publishing a name twice forwards its last write.
fn forwarded_artifacts(stage: &str, jobs: &[JobResult]) -> Result<Vec<ArtifactRef>, StageError> {
    let mut owners: HashMap<&str, &str> = HashMap::new();
    let mut forwarded: Vec<ArtifactRef> = Vec::new();

    for job in jobs.iter().filter(|j| j.is_success()) {
        for artifact in &job.artifacts {
            match owners.get(artifact.name.as_str()).copied() {
                Some(owner) if owner != job.job => {
                    return Err(StageError::ConflictingArtifact {
                        stage: stage.to_string(),
                        artifact: artifact.name.clone(),
                        first: owner.to_string(),
                        second: job.job.clone(),
                    });
                }
                Some(_) => forwarded.retain(|a| a.name != artifact.name),
                None => {
                    owners.insert(&artifact.name, &job.job);
                }
            }
            forwarded.push(artifact.clone());
        }
    }

    Ok(forwarded)
}
