//! Archway orchestrator
//!
//! Coordinates multi-architecture build pipelines: stages run in order, the
//! jobs of a stage run in parallel, and artifacts flow from each stage into
//! the next.

pub mod api;
pub mod config;
pub mod executor;
pub mod repository;
pub mod service;
