// crates/enrun-engine/src/engine.rs

//! The top-level pipeline-run state machine (§4.7): loads a run, walks
//! its planned steps, and reconciles status with the internal API at
//! every transition. Grounded on
//! `fluent_engines::modular_pipeline_executor::ModularPipelineExecutor::execute_steps`
//! for the overall "load → loop with early-return terminal branches →
//! finish" shape, generalized per-step retry/backoff into
//! per-step skip/freshness/fan-out (retries are delegated elsewhere).

use std::time::Instant;

use enrun_core::context::Context;
use enrun_core::http::ApiClient;
use enrun_core::types::{EntityType, OperationEnvelope, PipelineRun, RunSummary, StepSnapshot, StepStatus, TimelineEvent};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::dispatch;
use crate::fanout;
use crate::freshness::{self, Freshness};
use crate::planner::{self, Plan};
use crate::reporter;

/// The bundle of read-only state every step-handling helper needs.
/// Exists purely to keep helper signatures short — it owns nothing and
/// outlives a single `run_pipeline` call.
struct Ctx<'a> {
    client: &'a dyn ApiClient,
    run: &'a PipelineRun,
    plan: &'a Plan,
}

impl<'a> Ctx<'a> {
    fn entity_type_of(&self, snapshot: &StepSnapshot) -> EntityType {
        snapshot.operation_id.as_deref().map(EntityType::from_operation_id).unwrap_or_default()
    }

    fn entity_type_of_position(&self, position: u32) -> EntityType {
        self.plan.steps_by_position.get(&position).map(|s| self.entity_type_of(s)).unwrap_or_default()
    }

    #[allow(clippy::too_many_arguments)]
    fn timeline_event(
        &self,
        position: u32,
        status: StepStatus,
        skip_reason: Option<String>,
        duration_ms: Option<u64>,
        provider_attempts: Option<Vec<Value>>,
        operation_result: Option<Value>,
        fields_updated: Option<Vec<String>>,
        entity_type: EntityType,
    ) -> TimelineEvent {
        TimelineEvent {
            organization_id: self.run.organization_id.clone(),
            company_id: self.run.company_id.clone(),
            submission_id: self.run.submission_id.clone(),
            pipeline_run_id: self.run.id.clone(),
            entity_type,
            step_position: position,
            status,
            skip_reason,
            duration_ms,
            provider_attempts,
            operation_result,
            fields_updated,
        }
    }

    /// Downstream-skip path used by the invariant-violation,
    /// envelope-failure, and exception branches: a single bulk
    /// `mark-remaining-skipped` call, then one timeline event per row
    /// the API reports as actually touched (§4.7 point 2).
    async fn bulk_skip_remaining(&self, from_position: u32) {
        match reporter::mark_remaining_skipped(self.client, &self.run.id, from_position).await {
            Ok(rows) => {
                for row in rows {
                    let entity_type = self.entity_type_of_position(row.step_position);
                    let event = self.timeline_event(
                        row.step_position,
                        StepStatus::Skipped,
                        Some("upstream_step_failed".to_string()),
                        row.duration_ms,
                        None,
                        None,
                        None,
                        entity_type,
                    );
                    reporter::record_timeline_event(self.client, &event).await;
                }
            }
            Err(err) => {
                tracing::warn!(pipeline_run_id = %self.run.id, from_position, error = %err, "mark-remaining-skipped failed");
            }
        }
    }

    /// Downstream-skip path used by the condition-false fan-out branch
    /// (§4.7 point 3): individual per-step writes, each with its own
    /// timeline event, rather than the bulk endpoint.
    async fn skip_downstream_individually(&self, after_position: u32, reason: &str) {
        for planned in self.plan.steps.iter().filter(|p| p.snapshot.position > after_position) {
            let Some(step_result) = self.run.step_results.iter().find(|r| r.step_position == planned.snapshot.position) else {
                continue;
            };
            if let Err(err) = reporter::update_step_result(self.client, &step_result.id, "skipped", None, None, None, None).await {
                tracing::warn!(step_result_id = %step_result.id, error = %err, "downstream skip write failed");
                continue;
            }
            let entity_type = self.entity_type_of(&planned.snapshot);
            let event = self.timeline_event(
                planned.snapshot.position,
                StepStatus::Skipped,
                Some(reason.to_string()),
                None,
                None,
                None,
                None,
                entity_type,
            );
            reporter::record_timeline_event(self.client, &event).await;
        }
    }
}

/// Entity type used for the terminal entity-state upsert when every
/// step in the run was skipped: the run-level declaration, defaulting
/// to company (§3 Entity, §4.8).
fn run_level_entity_type(run: &PipelineRun) -> EntityType {
    run.blueprint_snapshot.entity.as_ref().map(|e| e.entity_type).unwrap_or_default()
}

fn seed_context(run: &PipelineRun) -> Context {
    if let Some(input) = run.blueprint_snapshot.entity.as_ref().and_then(|e| e.input.as_ref()) {
        return Context::from_entity_input(Some(input));
    }
    if let Some(submission_input) = run.submission_input.as_ref().filter(|v| v.is_object()) {
        return Context::from_entity_input(Some(submission_input));
    }
    Context::new()
}

/// Finishes a run that is ending in failure: marks the run `failed`,
/// synchronises submission status, and builds the returned summary.
/// Does not itself write the failing step's own result row or the
/// downstream-skip rows — callers do that first, since the shape of
/// that write differs by branch (bulk vs individual, with or without a
/// step-result row to update at all).
async fn finish_failed(ctx: &Ctx<'_>, failed_step_position: Option<u32>, error: impl Into<String>) -> anyhow::Result<RunSummary> {
    let error = error.into();
    reporter::update_run_status(ctx.client, &ctx.run.id, "failed", Some(&error), None).await?;
    reporter::sync_submission_status(ctx.client, &ctx.run.submission_id).await;
    Ok(RunSummary::failed(ctx.run.id.clone(), failed_step_position, error))
}

async fn load_run(client: &dyn ApiClient, pipeline_run_id: &str) -> anyhow::Result<PipelineRun> {
    let body = json!({ "pipeline_run_id": pipeline_run_id });
    let data = client.post_internal("/api/internal/pipeline-runs/get", &body).await?;
    Ok(serde_json::from_value(data)?)
}

/// Drives one pipeline run to a terminal `RunSummary`, per §4.7.
/// Never returns `Err` except when a cancellation was observed mid-poll
/// (propagated so the durable task runtime can distinguish it from an
/// ordinary envelope failure, per §5) — every other outcome, including
/// every invariant violation and executor exception, is folded into a
/// terminal `RunSummary`.
pub async fn run_pipeline(
    client: &dyn ApiClient,
    pipeline_run_id: &str,
    operations_path: &str,
    parallel_api_key: Option<&str>,
    cancellation: &CancellationToken,
) -> anyhow::Result<RunSummary> {
    let run = load_run(client, pipeline_run_id).await?;

    reporter::update_run_status(client, &run.id, "running", None, None).await?;
    reporter::sync_submission_status(client, &run.submission_id).await;

    let plan = planner::plan(&run);
    let ctx = Ctx { client, run: &run, plan: &plan };

    let mut context = seed_context(&run);
    let mut last_successful_operation_id: Option<String> = None;

    for planned in &plan.steps {
        let snapshot = &planned.snapshot;
        let position = snapshot.position;

        let Some(step_result) = run.step_results.iter().find(|r| r.step_position == position) else {
            ctx.bulk_skip_remaining(position).await;
            return finish_failed(&ctx, Some(position), format!("invariant violation: no pre-provisioned step result for position {position}")).await;
        };

        let Some(operation_id) = snapshot.operation_id.clone() else {
            let _ = reporter::update_step_result(
                client,
                &step_result.id,
                "failed",
                None,
                None,
                Some("invariant violation: enabled step has no operation_id"),
                None,
            )
            .await;
            ctx.bulk_skip_remaining(position + 1).await;
            return finish_failed(&ctx, Some(position), "invariant violation: enabled step has no operation_id").await;
        };

        let entity_type = EntityType::from_operation_id(&operation_id);

        // Condition branch (§4.7 point 3).
        if !planned.condition.evaluate(&context) {
            let _ = reporter::update_step_result(client, &step_result.id, "skipped", Some(&context.as_value()), None, None, None).await;
            let event = ctx.timeline_event(position, StepStatus::Skipped, Some("condition_not_met".to_string()), None, None, None, None, entity_type);
            reporter::record_timeline_event(client, &event).await;

            if snapshot.is_fan_out() {
                ctx.skip_downstream_individually(position, "parent_step_condition_not_met").await;
                break;
            }
            continue;
        }

        // Freshness branch (§4.3).
        match freshness::check(client, snapshot.skip_if_fresh(), entity_type, &context).await {
            Freshness::Fresh(record) => {
                if let Some(payload) = &record.canonical_payload {
                    context.merge_step_output(payload);
                }
                let _ = reporter::update_step_result(
                    client,
                    &step_result.id,
                    "skipped",
                    Some(&context.as_value()),
                    record.canonical_payload.as_ref(),
                    None,
                    None,
                )
                .await;
                let event = ctx.timeline_event(position, StepStatus::Skipped, Some("entity_state_fresh".to_string()), None, None, None, None, entity_type);
                reporter::record_timeline_event(client, &event).await;
                continue;
            }
            Freshness::NotConfigured | Freshness::NotFresh | Freshness::CheckFailed => {}
        }

        // Mark running (§4.7 point 5).
        let input_payload = context.as_value();
        let _ = reporter::update_step_result(client, &step_result.id, "running", Some(&input_payload), None, None, None).await;

        let started_at = Instant::now();
        let options = snapshot.step_config.as_ref();
        let execution = dispatch::execute(
            client,
            operations_path,
            &operation_id,
            &run.organization_id,
            &run.company_id,
            &input_payload,
            options,
            parallel_api_key,
            cancellation,
        )
        .await;

        let envelope = match execution {
            Ok(envelope) => envelope,
            Err(err) => {
                if dispatch::is_cancellation(&err) {
                    return Err(err);
                }
                let message = err.to_string();
                let _ = reporter::update_step_result(client, &step_result.id, "failed", Some(&input_payload), None, Some(&message), None).await;
                ctx.bulk_skip_remaining(position + 1).await;
                return finish_failed(&ctx, Some(position), message).await;
            }
        };

        let duration_ms = started_at.elapsed().as_millis() as u64;

        // Auxiliary persist (§4.7 point 7): best-effort, only for the
        // three deep-research operations, only on a non-null `found` output.
        if let Some(path) = dispatch::aux_store_path(&operation_id) {
            if !envelope.is_failed() {
                if let Some(output) = &envelope.output {
                    reporter::upsert_aux_store(client, path, output).await;
                }
            }
        }

        context.merge_step_output(envelope.output.as_ref().unwrap_or(&Value::Null));

        if envelope.is_failed() {
            let error_details = json!({ "missing_inputs": envelope.missing_inputs, "error": envelope.error });
            let _ = reporter::update_step_result(
                client,
                &step_result.id,
                "failed",
                Some(&input_payload),
                None,
                envelope.error.as_deref().or(Some("operation failed")),
                Some(&error_details),
            )
            .await;
            ctx.bulk_skip_remaining(position + 1).await;
            return finish_failed(&ctx, Some(position), envelope.error.clone().unwrap_or_else(|| "operation failed".to_string())).await;
        }

        // Success branch (§4.7 point 10).
        last_successful_operation_id = Some(operation_id.clone());
        let fields_updated = reporter::fields_updated(envelope.output.as_ref());
        let operation_result = serde_json::to_value(&envelope).unwrap_or(Value::Null);
        let success_output = json!({
            "operation_result": operation_result,
            "cumulative_context": context.as_value(),
        });
        let updated = reporter::update_step_result(
            client,
            &step_result.id,
            "succeeded",
            Some(&input_payload),
            Some(&success_output),
            None,
            None,
        )
        .await;
        let recorded_duration_ms = updated.as_ref().ok().and_then(|r| r.duration_ms).unwrap_or(duration_ms);
        let event = ctx.timeline_event(
            position,
            StepStatus::Succeeded,
            None,
            Some(recorded_duration_ms),
            envelope.provider_attempts.clone(),
            Some(operation_result.clone()),
            fields_updated,
            entity_type,
        );
        reporter::record_timeline_event(client, &event).await;

        if snapshot.is_fan_out() {
            return finish_fan_out(&ctx, &envelope, &operation_id, position, &context, &step_result.id).await;
        }
    }

    finish_succeeded(&ctx, last_successful_operation_id.as_deref(), &context).await
}

async fn finish_fan_out(
    ctx: &Ctx<'_>,
    envelope: &OperationEnvelope,
    operation_id: &str,
    position: u32,
    context: &Context,
    step_result_id: &str,
) -> anyhow::Result<RunSummary> {
    let entities = fanout::extract_entities(envelope.output.as_ref());
    let provider = fanout::pick_provider(envelope.provider_attempts.as_ref());
    let blueprint_snapshot = serde_json::to_value(&ctx.run.blueprint_snapshot).unwrap_or(Value::Null);
    let start_from_position = position + 1;

    let response = fanout::fan_out(
        ctx.client,
        &ctx.run.id,
        &ctx.run.submission_id,
        &ctx.run.organization_id,
        &ctx.run.company_id,
        &blueprint_snapshot,
        &entities,
        start_from_position,
        &context.as_value(),
        operation_id,
        provider.as_deref(),
        envelope.provider_attempts.as_ref(),
    )
    .await;

    let response = match response {
        Ok(response) => response,
        Err(err) => {
            let message = err.to_string();
            let _ = reporter::update_step_result(ctx.client, step_result_id, "failed", None, None, Some(&message), None).await;
            ctx.bulk_skip_remaining(start_from_position).await;
            return finish_failed(ctx, Some(position), message).await;
        }
    };

    let summary_payload = fanout::summary_payload(&response, start_from_position);
    let _ = reporter::update_step_result(ctx.client, step_result_id, "succeeded", None, Some(&summary_payload), None, None).await;

    reporter::update_run_status(ctx.client, &ctx.run.id, "succeeded", None, None).await?;

    let entity_type = EntityType::from_operation_id(operation_id).as_str();
    match reporter::upsert_entity_state(ctx.client, &ctx.run.id, entity_type, &context.as_value(), Some(operation_id)).await {
        Ok(()) => {
            reporter::sync_submission_status(ctx.client, &ctx.run.submission_id).await;
            Ok(RunSummary::fanned_out(ctx.run.id.clone(), response.child_run_ids))
        }
        Err(_) => finish_failed(ctx, None, "Entity state upsert failed").await,
    }
}

async fn finish_succeeded(ctx: &Ctx<'_>, last_successful_operation_id: Option<&str>, context: &Context) -> anyhow::Result<RunSummary> {
    reporter::update_run_status(ctx.client, &ctx.run.id, "succeeded", None, None).await?;

    let entity_type = match last_successful_operation_id {
        Some(op) => EntityType::from_operation_id(op),
        None => run_level_entity_type(ctx.run),
    };

    match reporter::upsert_entity_state(ctx.client, &ctx.run.id, entity_type.as_str(), &context.as_value(), last_successful_operation_id).await {
        Ok(()) => {
            reporter::sync_submission_status(ctx.client, &ctx.run.submission_id).await;
            Ok(RunSummary::succeeded(ctx.run.id.clone()))
        }
        Err(_) => finish_failed(ctx, None, "Entity state upsert failed").await,
    }
}
