//! Run-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use archway_core::domain::run::PipelineRun;
use archway_core::dto::run::{RunStarted, RunSummary, StartRun};
use uuid::Uuid;

impl OrchestratorClient {
    // =============================================================================
    // Run Management
    // =============================================================================

    /// Start a run of a pipeline definition
    ///
    /// # Arguments
    /// * `req` - The definition and its initial artifacts
    ///
    /// # Returns
    /// The id of the accepted run
    ///
    /// # Example
    /// ```no_run
    /// # use archway_client::OrchestratorClient;
    /// # use archway_core::dto::run::StartRun;
    /// # async fn example(req: StartRun) -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let started = client.start_run(&req).await?;
    /// println!("Run {}", started.run_id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn start_run(&self, req: &StartRun) -> Result<RunStarted> {
        let url = format!("{}/run/start", self.base_url);
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// List all runs, newest first
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let url = format!("{}/run/list", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get the current snapshot of a run
    ///
    /// # Arguments
    /// * `run_id` - The run UUID
    pub async fn get_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let url = format!("{}/run/{}", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Abort a run that has not finished
    ///
    /// # Returns
    /// The aborted run
    pub async fn abort_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let url = format!("{}/run/{}/abort", self.base_url, run_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }
}
