//! Repository Module
//!
//! In-memory state of the orchestrator: pipeline runs and their artifacts.
//! These are the only shared mutable structures.

pub mod artifact;
pub mod run;

pub use artifact::ArtifactStore;
pub use run::{RegistryError, RunRegistry};
