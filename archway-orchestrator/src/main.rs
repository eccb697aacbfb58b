use anyhow::{Context, Result};
use archway_orchestrator::api;
use archway_orchestrator::config::Config;
use archway_orchestrator::executor::CommandExecutor;
use archway_orchestrator::repository::{ArtifactStore, RunRegistry};
use archway_orchestrator::service::{
    EnvSecretResolver, PipelineCoordinator, StageDefaults, StageRunner,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "archway_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Archway Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let profiles = match &config.executor_profiles {
        Some(path) => {
            let source = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read executor profiles {}", path.display()))?;
            archway_lua::parse_profiles(&source)
                .with_context(|| format!("Failed to parse executor profiles {}", path.display()))?
        }
        None => {
            tracing::warn!("EXECUTOR_PROFILES not set, no job can be scheduled");
            BTreeMap::new()
        }
    };

    let executor = CommandExecutor::new(profiles).with_shared_env(config.shared_env.clone());
    tracing::info!("Executor profiles: {:?}", executor.profile_names());

    let registry = Arc::new(RunRegistry::new());
    let artifacts = Arc::new(ArtifactStore::new());
    let runner = StageRunner::new(
        Arc::new(executor),
        Arc::clone(&artifacts),
        Arc::clone(&registry),
        Arc::new(EnvSecretResolver::new(config.secret_prefix.clone())),
        config.max_parallel_jobs,
        StageDefaults {
            job_timeout: config.default_job_timeout,
            retry_backoff: config.default_retry_backoff,
        },
    );
    let coordinator = Arc::new(PipelineCoordinator::new(
        registry,
        artifacts,
        runner,
        config.max_retained_runs,
    ));

    // Build router with all API endpoints
    let app = api::create_router(coordinator);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
