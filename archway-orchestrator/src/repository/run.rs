//! Run Registry
//!
//! Process-wide table of in-flight and historical pipeline runs.
//!
//! Each run lives behind its own lock: updates to one run are serialized,
//! and every update is applied to a draft that replaces the stored run in a
//! single step, so readers only ever observe complete snapshots.

use archway_core::domain::run::{PipelineRun, RunStatus};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use uuid::Uuid;

/// Registry error type
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("run {0} not found")]
    NotFound(Uuid),

    #[error("run {0} is already registered")]
    AlreadyRegistered(Uuid),

    #[error("run {id} is {status} and can no longer change")]
    Terminal { id: Uuid, status: RunStatus },

    #[error("run {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("run {0}: completed stage results cannot be rewritten")]
    StageHistoryRewritten(Uuid),
}

type RunSlot = Arc<RwLock<PipelineRun>>;

/// Registry of pipeline runs keyed by run id
#[derive(Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<Uuid, RunSlot>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new run
    pub fn register(&self, run: PipelineRun) -> Result<(), RegistryError> {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);

        if runs.contains_key(&run.id) {
            return Err(RegistryError::AlreadyRegistered(run.id));
        }

        tracing::debug!("Registered run {} ({})", run.id, run.pipeline);
        runs.insert(run.id, Arc::new(RwLock::new(run)));
        Ok(())
    }

    /// Returns a snapshot of a run
    pub fn get(&self, id: Uuid) -> Option<PipelineRun> {
        let slot = self.slot(id)?;
        let run = slot.read().unwrap_or_else(PoisonError::into_inner);
        Some(run.clone())
    }

    /// Returns snapshots of every run, newest first
    pub fn list(&self) -> Vec<PipelineRun> {
        let slots: Vec<RunSlot> = {
            let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
            runs.values().cloned().collect()
        };

        let mut snapshots: Vec<PipelineRun> = slots
            .iter()
            .map(|slot| slot.read().unwrap_or_else(PoisonError::into_inner).clone())
            .collect();
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        snapshots
    }

    /// Applies `mutate` to a run atomically
    ///
    /// The mutation runs against a copy; it is published only if the run was
    /// not terminal, the status change is allowed by the state machine and
    /// completed stage results were only appended to. Otherwise the stored run
    /// is left untouched.
    pub fn update<T>(
        &self,
        id: Uuid,
        mutate: impl FnOnce(&mut PipelineRun) -> T,
    ) -> Result<T, RegistryError> {
        let slot = self.slot(id).ok_or(RegistryError::NotFound(id))?;
        let mut run = slot.write().unwrap_or_else(PoisonError::into_inner);

        if run.is_terminal() {
            return Err(RegistryError::Terminal {
                id,
                status: run.status,
            });
        }

        let mut draft = run.clone();
        let output = mutate(&mut draft);

        if draft.status != run.status && !run.status.can_transition_to(draft.status) {
            return Err(RegistryError::InvalidTransition {
                id,
                from: run.status,
                to: draft.status,
            });
        }

        if !draft.stages.starts_with(&run.stages) {
            return Err(RegistryError::StageHistoryRewritten(id));
        }

        if draft.status != run.status {
            tracing::debug!("Run {} {} -> {}", id, run.status, draft.status);
        }

        *run = draft;
        Ok(output)
    }

    /// Number of runs that have not reached a terminal status
    pub fn active_count(&self) -> usize {
        self.list().iter().filter(|run| !run.is_terminal()).count()
    }

    /// Forgets the oldest terminal runs beyond `keep`, returning their ids
    pub fn prune(&self, keep: usize) -> Vec<Uuid> {
        let mut finished: Vec<PipelineRun> = self
            .list()
            .into_iter()
            .filter(|run| run.is_terminal())
            .collect();

        if finished.len() <= keep {
            return Vec::new();
        }

        // list() is newest first
        let evicted: Vec<Uuid> = finished.drain(keep..).map(|run| run.id).collect();

        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        for id in &evicted {
            runs.remove(id);
        }

        tracing::debug!("Pruned {} finished run(s)", evicted.len());
        evicted
    }

    fn slot(&self, id: Uuid) -> Option<RunSlot> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        runs.get(&id).cloned()
    }
}
