//! Service Module
//!
//! Run coordination logic: stage execution, run lifecycles and secret lookup.

pub mod coordinator;
pub mod secrets;
pub mod stage;

pub use coordinator::{CoordinatorError, PipelineCoordinator};
pub use secrets::{EnvSecretResolver, SecretResolver, StaticSecrets};
pub use stage::{StageDefaults, StageError, StageRunner};
