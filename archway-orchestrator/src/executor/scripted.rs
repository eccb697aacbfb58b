//! Scripted executor
//!
//! In-memory `BuildExecutor` whose jobs behave as scripted per `(stage, job)`,
//! recording every invocation. Used to exercise stage and run semantics
//! without touching real build infrastructure.

use archway_core::domain::job::{JobResult, JobStatus};
use archway_core::domain::pipeline::JobSpec;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use super::{BuildExecutor, ExecutionError, JobContext};

/// Scripted behaviour of one job
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Succeed, publishing `name -> content` artifacts
    Succeed(Vec<(String, String)>),
    /// Fail every attempt
    Fail(String),
    /// Fail the first `failures` attempts, then succeed with the artifacts
    FailTimes {
        failures: u32,
        artifacts: Vec<(String, String)>,
    },
    /// Run for `duration`, then behave as `then`
    Sleep {
        duration: Duration,
        then: Box<Behavior>,
    },
    /// No runner can take the job
    Unschedulable,
}

impl Behavior {
    pub fn succeed() -> Self {
        Behavior::Succeed(Vec::new())
    }

    pub fn succeed_with(artifacts: &[(&str, &str)]) -> Self {
        Behavior::Succeed(owned_pairs(artifacts))
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Behavior::Fail(message.into())
    }

    pub fn fail_times(failures: u32, artifacts: &[(&str, &str)]) -> Self {
        Behavior::FailTimes {
            failures,
            artifacts: owned_pairs(artifacts),
        }
    }

    pub fn sleep(duration: Duration, then: Behavior) -> Self {
        Behavior::Sleep {
            duration,
            then: Box::new(then),
        }
    }
}

fn owned_pairs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(name, content)| (name.to_string(), content.to_string()))
        .collect()
}

/// One recorded call to `execute`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub run_id: Uuid,
    pub stage: String,
    pub job: String,
    pub attempt: u32,
    pub env: BTreeMap<String, String>,
    /// Logical names of the inherited artifacts
    pub inherited: Vec<String>,
}

/// Executor driven by per-job scripts
///
/// Jobs without a script succeed immediately with no artifacts.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<(String, String), Behavior>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the job named `job` in stage `stage`
    pub fn on(mut self, stage: &str, job: &str, behavior: Behavior) -> Self {
        self.scripts
            .insert((stage.to_string(), job.to_string()), behavior);
        self
    }

    /// Every invocation so far, in call order
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Invocations of one job, in call order
    pub fn invocations_of(&self, stage: &str, job: &str) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|i| i.stage == stage && i.job == job)
            .collect()
    }

    /// Stages that had at least one job invoked, in first-invocation order
    pub fn invoked_stages(&self) -> Vec<String> {
        let mut stages: Vec<String> = Vec::new();
        for invocation in self.invocations() {
            if !stages.contains(&invocation.stage) {
                stages.push(invocation.stage);
            }
        }
        stages
    }

    fn record(&self, job: &JobSpec, ctx: &JobContext) {
        let invocation = Invocation {
            run_id: ctx.run_id,
            stage: ctx.stage.clone(),
            job: job.display_name().to_string(),
            attempt: ctx.attempt,
            env: ctx.env.clone(),
            inherited: ctx.inherited.iter().map(|a| a.name.clone()).collect(),
        };
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation);
    }

    fn succeed(job: &JobSpec, ctx: &JobContext, artifacts: &[(String, String)]) -> JobResult {
        let published = artifacts
            .iter()
            .map(|(name, content)| ctx.publish(name, content))
            .collect();
        ctx.result(job, JobStatus::Succeeded)
            .with_artifacts(published)
    }
}

#[async_trait]
impl BuildExecutor for ScriptedExecutor {
    async fn execute(&self, job: &JobSpec, ctx: &JobContext) -> Result<JobResult, ExecutionError> {
        self.record(job, ctx);

        let mut behavior = self
            .scripts
            .get(&(ctx.stage.clone(), job.display_name().to_string()))
            .cloned()
            .unwrap_or_else(Behavior::succeed);

        loop {
            match behavior {
                Behavior::Sleep { duration, then } => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => behavior = *then,
                        _ = ctx.cancel.cancelled() => {
                            return Ok(ctx
                                .result(job, JobStatus::Cancelled)
                                .with_error("cancelled"));
                        }
                    }
                }
                Behavior::Succeed(artifacts) => return Ok(Self::succeed(job, ctx, &artifacts)),
                Behavior::Fail(message) => {
                    return Ok(ctx.result(job, JobStatus::Failed).with_error(message));
                }
                Behavior::FailTimes {
                    failures,
                    artifacts,
                } => {
                    if ctx.attempt <= failures {
                        return Ok(ctx
                            .result(job, JobStatus::Failed)
                            .with_error(format!("scripted failure {}/{}", ctx.attempt, failures)));
                    }
                    return Ok(Self::succeed(job, ctx, &artifacts));
                }
                Behavior::Unschedulable => {
                    return Err(ExecutionError::NoRunner(job.profile.clone()));
                }
            }
        }
    }
}
