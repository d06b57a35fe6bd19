// crates/enrun-engine/src/reporter.rs

//! Status and timeline writes, plus the auxiliary deep-research store
//! upserts. Split by criticality: step-result/run-status/submission-sync
//! writes are on the critical path and propagate their errors; timeline events and
//! aux-store upserts are a small local emitter that swallows and logs,
//! grounded on the stack's logging-adjacent modules, which
//! treat observability writes as fire-and-forget.

use enrun_core::http::ApiClient;
use enrun_core::types::{StepResult, TimelineEvent};
use serde_json::{json, Value};

/// Marks the pipeline run's status. Required for correctness — bubbles
/// any transport/decoding error up to the caller.
pub async fn update_run_status(
    client: &dyn ApiClient,
    pipeline_run_id: &str,
    status: &str,
    error_message: Option<&str>,
    error_details: Option<&Value>,
) -> anyhow::Result<()> {
    let body = json!({
        "pipeline_run_id": pipeline_run_id,
        "status": status,
        "error_message": error_message,
        "error_details": error_details,
    });
    client.post_internal("/api/internal/pipeline-runs/update-status", &body).await?;
    Ok(())
}

/// Synchronises submission status following a run-status write. Logged
/// on failure, never propagated — every call site is already on its
/// way to returning a `RunSummary`.
pub async fn sync_submission_status(client: &dyn ApiClient, submission_id: &str) {
    let body = json!({ "submission_id": submission_id });
    if let Err(err) = client.post_internal("/api/internal/submissions/sync-status", &body).await {
        tracing::warn!(submission_id, error = %err, "submission status sync failed");
    }
}

/// Updates one step result row. Required for correctness.
#[allow(clippy::too_many_arguments)]
pub async fn update_step_result(
    client: &dyn ApiClient,
    step_result_id: &str,
    status: &str,
    input_payload: Option<&Value>,
    output_payload: Option<&Value>,
    error_message: Option<&str>,
    error_details: Option<&Value>,
) -> anyhow::Result<StepResult> {
    let body = json!({
        "step_result_id": step_result_id,
        "status": status,
        "input_payload": input_payload,
        "output_payload": output_payload,
        "error_message": error_message,
        "error_details": error_details,
    });
    let data = client.post_internal("/api/internal/step-results/update", &body).await?;
    Ok(serde_json::from_value(data)?)
}

/// Marks every step result from `from_step_position` onward as
/// `skipped`, returning the rows the API actually touched. Idempotent
/// per §8: a second call with the same `from_step_position` returns an
/// empty list because those rows are already terminal.
pub async fn mark_remaining_skipped(
    client: &dyn ApiClient,
    pipeline_run_id: &str,
    from_step_position: u32,
) -> anyhow::Result<Vec<StepResult>> {
    let body = json!({
        "pipeline_run_id": pipeline_run_id,
        "from_step_position": from_step_position,
    });
    let data = client.post_internal("/api/internal/step-results/mark-remaining-skipped", &body).await?;
    Ok(serde_json::from_value(data)?)
}

/// Upserts the entity-state row. Required for correctness — the
/// engine promotes a failure here to a run failure (§4.8).
pub async fn upsert_entity_state(
    client: &dyn ApiClient,
    pipeline_run_id: &str,
    entity_type: &str,
    cumulative_context: &Value,
    last_operation_id: Option<&str>,
) -> anyhow::Result<()> {
    let body = json!({
        "pipeline_run_id": pipeline_run_id,
        "entity_type": entity_type,
        "cumulative_context": cumulative_context,
        "last_operation_id": last_operation_id,
    });
    client.post_internal("/api/internal/entity-state/upsert", &body).await?;
    Ok(())
}

/// Emits a timeline event. Best-effort: a failure is logged and
/// swallowed, never propagated to the engine's critical path.
pub async fn record_timeline_event(client: &dyn ApiClient, event: &TimelineEvent) {
    let body = serde_json::to_value(event).expect("TimelineEvent always serializes");
    if let Err(err) = client.post_internal("/api/internal/entity-timeline/record-step-event", &body).await {
        tracing::warn!(
            pipeline_run_id = %event.pipeline_run_id,
            step_position = event.step_position,
            error = %err,
            "timeline event emission failed"
        );
    }
}

/// Upserts to one of the three deep-research dedicated stores. Called
/// only after a `found` envelope with non-null output, per §4.7 point
/// 7. Best-effort.
pub async fn upsert_aux_store(client: &dyn ApiClient, path: &str, operation_output: &Value) {
    if let Err(err) = client.post_internal(path, operation_output).await {
        tracing::warn!(path, error = %err, "auxiliary deep-research store upsert failed");
    }
}

/// Keys of `output` whose values are non-null, sorted — the
/// `fields_updated` list a `TimelineEvent` carries.
pub fn fields_updated(output: Option<&Value>) -> Option<Vec<String>> {
    let map = output?.as_object()?;
    let mut keys: Vec<String> = map.iter().filter(|(_, v)| !v.is_null()).map(|(k, _)| k.clone()).collect();
    keys.sort();
    Some(keys)
}
