// crates/enrun-runtime/src/lib.rs

//! The durable-task-facing entry point: `run(request) -> Response`,
//! modelled directly on the `fluent-lambda` crate. Whatever
//! hosts the durable task is expected to load `RuntimeConfig` once per
//! process and call [`run`] once per pipeline-run invocation, exactly
//! the way `fluent-lambda::run` is called once per Lambda invocation.

use enrun_core::config::RuntimeConfig;
use enrun_core::http::HttpApiClient;
use enrun_core::types::RunSummary;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Path, relative to `DATA_ENGINE_API_URL`, that the operations service
/// mounts its `execute` endpoint at.
const OPERATIONS_PATH: &str = "/api/v1/execute";

#[derive(Debug, Deserialize, Serialize)]
pub struct RunPipelineRequest {
    pub pipeline_run_id: String,
}

#[derive(Debug, Serialize)]
pub struct RunPipelineResponse {
    pub data: RunSummary,
}

/// Runs one pipeline run to completion. Reads `RuntimeConfig` from the
/// environment, builds a real `HttpApiClient`, and delegates to
/// `enrun_engine::run_pipeline` with a fresh, never-triggered
/// cancellation token — a host that wires in its own cancellation
/// signal should call `enrun_engine::run_pipeline` directly instead.
#[tracing::instrument(skip(request), fields(pipeline_run_id = %request.pipeline_run_id))]
pub async fn run(request: RunPipelineRequest) -> anyhow::Result<RunPipelineResponse> {
    let config = RuntimeConfig::from_env()?;
    let client = HttpApiClient::new(&config)?;
    let cancellation = CancellationToken::new();

    let summary = enrun_engine::run_pipeline(
        &client,
        &request.pipeline_run_id,
        OPERATIONS_PATH,
        config.parallel_api_key.as_ref().map(|s| s.expose()),
        &cancellation,
    )
    .await?;

    Ok(RunPipelineResponse { data: summary })
}

/// Initializes the process-wide `tracing` subscriber, the way
/// `fluent-lambda`'s `main.rs` does. Hosts embedding this crate as a
/// library (rather than running the `enrun-cli` binary) are expected to
/// call this once at process start instead.
pub fn init_tracing() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).with_target(false).init();
}
