//! Archway Core
//!
//! Core types and abstractions for the Archway build orchestrator.
//!
//! This crate contains:
//! - Domain types: Core business entities (PipelineDefinition, PipelineRun, JobResult, etc.)
//! - DTOs: Data transfer objects for communication between the orchestrator and its clients

pub mod domain;
pub mod dto;
