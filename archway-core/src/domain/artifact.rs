//! Artifact domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque handle to a build output
///
/// Identifies an artifact by run, producing stage and logical name (for example
/// `image@arm`). The digest names the stored content; the handle itself is
/// resolved through the orchestrator's artifact store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub run_id: Uuid,
    pub stage: String,
    pub name: String,
    pub digest: String,
}

impl ArtifactRef {
    /// Lookup key of this artifact
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            run_id: self.run_id,
            stage: self.stage.clone(),
            name: self.name.clone(),
        }
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.run_id, self.stage, self.name)
    }
}

/// Storage key of an artifact: (run id, stage name, logical name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub run_id: Uuid,
    pub stage: String,
    pub name: String,
}

impl ArtifactKey {
    pub fn new(run_id: Uuid, stage: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            run_id,
            stage: stage.into(),
            name: name.into(),
        }
    }
}
