//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::artifact::ArtifactRef;

/// Terminal status of one job attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Succeeded,
    Failed,
    TimedOut,
    /// Stopped because the owning run was aborted
    Cancelled,
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Succeeded => write!(f, "Succeeded"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::TimedOut => write!(f, "TimedOut"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Outcome of one executed job attempt
///
/// Every attempt yields exactly one `JobResult`. A retry produces a new one with
/// a higher `attempt` number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job: String,
    pub profile: String,
    /// 1-based attempt number
    pub attempt: u32,
    pub status: JobStatus,
    pub artifacts: Vec<ArtifactRef>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl JobResult {
    /// Creates a result completed now, with no artifacts and no error
    pub fn new(
        job: impl Into<String>,
        profile: impl Into<String>,
        attempt: u32,
        status: JobStatus,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job: job.into(),
            profile: profile.into(),
            attempt,
            status,
            artifacts: Vec::new(),
            error: None,
            started_at,
            completed_at: Utc::now(),
        }
    }

    pub fn with_artifacts(mut self, artifacts: Vec<ArtifactRef>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
