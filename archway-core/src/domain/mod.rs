//! Core domain types
//!
//! This module contains the core domain structures used across Archway crates.
//! Definitions are static configuration parsed once (by the CLI or the orchestrator);
//! runs, stage results and job results are produced by the orchestrator while a
//! pipeline executes and read back by observers.

pub mod artifact;
pub mod job;
pub mod pipeline;
pub mod run;
