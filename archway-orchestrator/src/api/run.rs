//! Run API Handlers
//!
//! HTTP endpoints for starting, inspecting and aborting pipeline runs.

use archway_core::domain::run::PipelineRun;
use archway_core::dto::run::{RunStarted, RunSummary, StartRun};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::service::PipelineCoordinator;

/// POST /run/start
/// Validate a pipeline definition and start a run of it
pub async fn start_run(
    State(coordinator): State<Arc<PipelineCoordinator>>,
    Json(req): Json<StartRun>,
) -> ApiResult<(StatusCode, Json<RunStarted>)> {
    tracing::info!("Starting run of pipeline: {}", req.pipeline.name);

    let run_id = coordinator.start_run(req.pipeline, req.artifacts)?;

    Ok((StatusCode::CREATED, Json(RunStarted { run_id })))
}

/// GET /run/list
/// List all runs, newest first
pub async fn list_runs(
    State(coordinator): State<Arc<PipelineCoordinator>>,
) -> Json<Vec<RunSummary>> {
    tracing::debug!("Listing runs");

    let runs = coordinator
        .list_runs()
        .into_iter()
        .map(RunSummary::from)
        .collect();

    Json(runs)
}

/// GET /run/{id}
/// Current snapshot of a run
pub async fn get_run(
    State(coordinator): State<Arc<PipelineCoordinator>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting run: {}", id);

    let run = coordinator
        .get_status(id)
        .ok_or_else(|| ApiError::NotFound(format!("Run {} not found", id)))?;

    Ok(Json(run))
}

/// POST /run/{id}/abort
/// Abort a run that has not finished
pub async fn abort_run(
    State(coordinator): State<Arc<PipelineCoordinator>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::info!("Aborting run: {}", id);

    let run = coordinator.abort(id)?;

    Ok(Json(run))
}

#[cfg(test)]
mod tests {
    use crate::api::create_router;
    use crate::executor::scripted::{Behavior, ScriptedExecutor};
    use crate::repository::{ArtifactStore, RunRegistry};
    use crate::service::{PipelineCoordinator, StageDefaults, StageRunner, StaticSecrets};
    use archway_core::domain::run::{PipelineRun, RunStatus};
    use archway_core::dto::run::{RunStarted, RunSummary};
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode},
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(executor: ScriptedExecutor) -> Router {
        let artifacts = Arc::new(ArtifactStore::new());
        let registry = Arc::new(RunRegistry::new());
        let runner = StageRunner::new(
            Arc::new(executor),
            Arc::clone(&artifacts),
            Arc::clone(&registry),
            Arc::new(StaticSecrets::new()),
            4,
            StageDefaults::default(),
        );
        create_router(Arc::new(PipelineCoordinator::new(
            registry, artifacts, runner, 100,
        )))
    }

    fn start_body(stage: &str) -> String {
        serde_json::json!({
            "pipeline": {
                "name": "springboot-multiarch",
                "stages": [
                    { "name": stage, "jobs": [ { "profile": "arm64", "source": "repo" } ] }
                ]
            },
            "artifacts": { "source": "repo@main" }
        })
        .to_string()
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder().method(method).uri(uri);
        if body.is_some() {
            request = request.header("content-type", "application/json");
        }
        let request = request
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(ScriptedExecutor::new());
        let (status, body) = send(&app, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["active_runs"], 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_get_run() {
        let app = app(ScriptedExecutor::new());

        let (status, body) = send(&app, "POST", "/run/start", Some(start_body("build"))).await;
        assert_eq!(status, StatusCode::CREATED);
        let started: RunStarted = serde_json::from_slice(&body).unwrap();

        let run = loop {
            let (status, body) = send(&app, "GET", &format!("/run/{}", started.run_id), None).await;
            assert_eq!(status, StatusCode::OK);
            let run: PipelineRun = serde_json::from_slice(&body).unwrap();
            if run.is_terminal() {
                break run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        assert_eq!(run.status, RunStatus::Succeeded);

        let (status, body) = send(&app, "GET", "/run/list", None).await;
        assert_eq!(status, StatusCode::OK);
        let runs: Vec<RunSummary> = serde_json::from_slice(&body).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, started.run_id);
        assert_eq!(runs[0].stages_completed, 1);
    }

    #[tokio::test]
    async fn test_start_invalid_definition() {
        let app = app(ScriptedExecutor::new());

        let (status, body) = send(&app, "POST", "/run/start", Some(start_body("@input"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("reserved"));
    }

    #[tokio::test]
    async fn test_get_unknown_run() {
        let app = app(ScriptedExecutor::new());
        let uri = format!("/run/{}", uuid::Uuid::new_v4());

        let (status, _) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "POST", &format!("{}/abort", uri), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_twice_conflicts() {
        let app = app(ScriptedExecutor::new().on(
            "build",
            "arm64",
            Behavior::sleep(Duration::from_secs(600), Behavior::succeed()),
        ));

        let (_, body) = send(&app, "POST", "/run/start", Some(start_body("build"))).await;
        let started: RunStarted = serde_json::from_slice(&body).unwrap();
        let uri = format!("/run/{}/abort", started.run_id);

        let (status, body) = send(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let run: PipelineRun = serde_json::from_slice(&body).unwrap();
        assert_eq!(run.status, RunStatus::Aborted);

        let (status, _) = send(&app, "POST", &uri, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
