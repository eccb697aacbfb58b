//! Executor Module
//!
//! The `BuildExecutor` seam between the orchestrator and whatever actually
//! performs a build: a shell command on this host, or a scripted double in tests.

pub mod command;
pub mod scripted;

pub use command::CommandExecutor;
pub use scripted::ScriptedExecutor;

use archway_core::domain::artifact::ArtifactRef;
use archway_core::domain::job::{JobResult, JobStatus};
use archway_core::domain::pipeline::JobSpec;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::repository::ArtifactStore;

/// The job could not be attempted at all
///
/// Distinct from a `Failed` job result: it is never retried and fails the stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("no runner available for profile '{0}'")]
    NoRunner(String),

    #[error("failed to launch job: {0}")]
    Launch(String),
}

/// Cooperative cancellation signal shared by every job of a run
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                // Sender lives as long as self
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything an executor needs to perform one job attempt
#[derive(Clone)]
pub struct JobContext {
    pub run_id: Uuid,
    pub stage: String,
    /// 1-based attempt number
    pub attempt: u32,
    /// Fully resolved environment of the job
    pub env: BTreeMap<String, String>,
    /// Artifacts available to this stage
    pub inherited: Vec<ArtifactRef>,
    pub artifacts: Arc<ArtifactStore>,
    pub cancel: CancelToken,
    pub started_at: DateTime<Utc>,
}

impl JobContext {
    /// Registers an output of this attempt under the current stage
    pub fn publish(&self, name: &str, content: impl AsRef<[u8]>) -> ArtifactRef {
        self.artifacts.put(self.run_id, &self.stage, name, content)
    }

    /// Result skeleton for this attempt
    pub fn result(&self, job: &JobSpec, status: JobStatus) -> JobResult {
        JobResult::new(
            job.display_name(),
            job.profile.clone(),
            self.attempt,
            status,
            self.started_at,
        )
    }
}

/// Performs one attempt of one job
#[async_trait]
pub trait BuildExecutor: Send + Sync {
    async fn execute(&self, job: &JobSpec, ctx: &JobContext) -> Result<JobResult, ExecutionError>;
}
