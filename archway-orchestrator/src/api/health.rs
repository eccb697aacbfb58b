//! Health Check API Handler
//!
//! Health check endpoint for monitoring.

use axum::{Json, extract::State};
use std::sync::Arc;

use crate::service::PipelineCoordinator;

/// GET /health
/// Health check endpoint, with the number of unfinished runs
pub async fn health_check(
    State(coordinator): State<Arc<PipelineCoordinator>>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "active_runs": coordinator.active_runs(),
    }))
}
