// crates/enrun-engine/src/dispatch.rs

//! Resolves an operation id to one of the closed set of executors —
//! three deep-research poller variants, or the generic remote
//! operation — and runs it. Modelled on the per-provider
//! `Engine` implementations (`fluent-engines::replicate` et al.)
//! dispatched through a registry, but since our set of executors is
//! fixed and small we match on operation id directly rather than
//! standing up a trait-object registry.

use enrun_core::http::ApiClient;
use enrun_core::types::{EntityType, OperationEnvelope};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::poller::{self, PollerVariant, CANCELLED_KIND};

pub const ICP_JOB_TITLES: &str = "company.derive.icp_job_titles";
pub const COMPANY_INTEL_BRIEFING: &str = "company.derive.intel_briefing";
pub const PERSON_INTEL_BRIEFING: &str = "person.derive.intel_briefing";

/// The three dedicated-store upsert endpoints §4.7 point 7 fires
/// after a deep-research envelope succeeds. `None` for any operation
/// id that isn't one of the three deep-research operations.
pub fn aux_store_path(operation_id: &str) -> Option<&'static str> {
    match operation_id {
        ICP_JOB_TITLES => Some("/api/internal/icp-job-titles/upsert"),
        COMPANY_INTEL_BRIEFING => Some("/api/internal/company-intel-briefings/upsert"),
        PERSON_INTEL_BRIEFING => Some("/api/internal/person-intel-briefings/upsert"),
        _ => None,
    }
}

/// Executes one step's operation against the current context and
/// returns the normalised envelope. Never returns `Err` for a
/// deep-research poller's own failure modes (timeout, missing
/// inputs, missing API key, non-2xx create/fetch) — those surface as
/// a `status: "failed"` envelope, per §4.5. It does return `Err` for a
/// cancelled poll wait (propagated so the engine can distinguish
/// cancellation from an ordinary envelope failure) and for the
/// generic executor's own transport/decode failures, per §4.6.
#[allow(clippy::too_many_arguments)]
pub async fn execute(
    client: &dyn ApiClient,
    operations_path: &str,
    operation_id: &str,
    organization_id: &str,
    company_id: &str,
    context: &Value,
    options: Option<&Value>,
    parallel_api_key: Option<&str>,
    cancellation: &CancellationToken,
) -> anyhow::Result<OperationEnvelope> {
    match operation_id {
        ICP_JOB_TITLES => {
            poller::run_poller_with_cancellation(PollerVariant::icp_job_titles(), client, context, parallel_api_key, cancellation).await
        }
        COMPANY_INTEL_BRIEFING => {
            poller::run_poller_with_cancellation(PollerVariant::company_intel_briefing(), client, context, parallel_api_key, cancellation).await
        }
        PERSON_INTEL_BRIEFING => {
            poller::run_poller_with_cancellation(PollerVariant::person_intel_briefing(), client, context, parallel_api_key, cancellation).await
        }
        _ => execute_generic(client, operations_path, operation_id, organization_id, company_id, context, options).await,
    }
}

pub fn is_cancellation(err: &anyhow::Error) -> bool {
    err.to_string() == CANCELLED_KIND
}

/// The generic remote-operation executor: POST to the operations
/// service and return its `data` envelope unchanged. Per §4.6, a
/// non-2xx or a missing `data` field is an actual error (not folded
/// into a failed envelope) — the engine's exception branch handles it.
async fn execute_generic(
    client: &dyn ApiClient,
    operations_path: &str,
    operation_id: &str,
    organization_id: &str,
    company_id: &str,
    context: &Value,
    options: Option<&Value>,
) -> anyhow::Result<OperationEnvelope> {
    let entity_type = EntityType::from_operation_id(operation_id);
    let body = json!({
        "operation_id": operation_id,
        "entity_type": entity_type.as_str(),
        "input": context,
        "options": options,
    });

    let data = client.post_operation(operations_path, organization_id, company_id, &body).await?;
    let envelope: OperationEnvelope = serde_json::from_value(data)?;
    Ok(envelope)
}
