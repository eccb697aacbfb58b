//! Data Transfer Objects
//!
//! This module contains DTOs used between the orchestrator API and its clients
//! (CLI, client crate). DTOs are lightweight representations of domain entities
//! optimized for network transfer.

pub mod run;
