//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod run;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::PipelineCoordinator;

/// Create the main API router with all endpoints
pub fn create_router(coordinator: Arc<PipelineCoordinator>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Run endpoints
        .route("/run/start", post(run::start_run))
        .route("/run/list", get(run::list_runs))
        .route("/run/{id}", get(run::get_run))
        .route("/run/{id}/abort", post(run::abort_run))
        // Add state and middleware
        .with_state(coordinator)
        .layer(TraceLayer::new_for_http())
}
