//! Archway Lua Infrastructure
//!
//! Pipeline definitions and executor profiles are written as Lua tables.
//! This crate evaluates them in a restricted sandbox and converts them into
//! the core domain types:
//! - Sandbox creation with the `pipeline`, `secret()` and `artifact()` helpers
//! - Pipeline definition parsing and validation
//! - Executor profile parsing

pub mod parser;
pub mod profiles;
pub mod sandbox;

pub use parser::parse_pipeline_definition;
pub use profiles::{ExecutorProfile, parse_profiles};
pub use sandbox::create_sandbox;
