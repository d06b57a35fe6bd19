// crates/enrun-engine/src/fanout.rs

//! The fan-out coordinator: on success of a fan-out-marked step,
//! extract child entities from the step's output and delegate to the
//! parent-run fan-out endpoint, which creates the child pipeline runs.
//! Grounded on `fluent_agent::workflow::engine`'s branch/sub-task
//! dispatch, generalized from "spawn sub-tasks of the same workflow"
//! to "spawn sibling pipeline runs resuming past this step".

use enrun_core::http::ApiClient;
use enrun_core::types::ProviderAttempt;
use serde::Deserialize;
use serde_json::{json, Map, Value};

/// Extracts fan-out entities from a step's envelope output: the
/// `results` key, filtered to object-valued entries only — per §4.7
/// point 11, a scalar or array entry in `results` contributes nothing.
pub fn extract_entities(output: Option<&Value>) -> Vec<Value> {
    let Some(results) = output.and_then(|o| o.get("results")).and_then(Value::as_array) else {
        return Vec::new();
    };
    results.iter().filter(|v| v.is_object()).cloned().collect()
}

/// Picks the `provider` label for the fan-out request: the first
/// provider attempt whose status is `found` or `succeeded`.
pub fn pick_provider(provider_attempts: Option<&Vec<ProviderAttempt>>) -> Option<String> {
    let attempts = provider_attempts?;
    attempts
        .iter()
        .find(|a| matches!(a.get("status").and_then(Value::as_str), Some("found") | Some("succeeded")))
        .and_then(|a| a.get("provider").and_then(Value::as_str))
        .map(str::to_string)
}

/// Response from `POST /api/internal/pipeline-runs/fan-out`. Two
/// plausible schema shapes exist for this endpoint; this picks one
/// fixed shape — see `DESIGN.md`.
#[derive(Debug, Clone, Deserialize)]
pub struct FanOutResponse {
    pub child_run_ids: Vec<String>,
    #[serde(default)]
    pub skipped_duplicates_count: usize,
    #[serde(default)]
    pub skipped_duplicate_identifiers: Vec<Value>,
    #[serde(default)]
    pub child_runs: Vec<Value>,
}

#[allow(clippy::too_many_arguments)]
pub async fn fan_out(
    client: &dyn ApiClient,
    parent_pipeline_run_id: &str,
    submission_id: &str,
    organization_id: &str,
    company_id: &str,
    blueprint_snapshot: &Value,
    fan_out_entities: &[Value],
    start_from_position: u32,
    parent_cumulative_context: &Value,
    fan_out_operation_id: &str,
    provider: Option<&str>,
    provider_attempts: Option<&Vec<ProviderAttempt>>,
) -> anyhow::Result<FanOutResponse> {
    let body = json!({
        "parent_pipeline_run_id": parent_pipeline_run_id,
        "submission_id": submission_id,
        "organization_id": organization_id,
        "company_id": company_id,
        "blueprint_snapshot": blueprint_snapshot,
        "fan_out_entities": fan_out_entities,
        "start_from_position": start_from_position,
        "parent_cumulative_context": parent_cumulative_context,
        "fan_out_operation_id": fan_out_operation_id,
        "provider": provider,
        "provider_attempts": provider_attempts,
    });
    let data = client.post_internal("/api/internal/pipeline-runs/fan-out", &body).await?;
    Ok(serde_json::from_value(data)?)
}

/// Builds the fan-out summary `output_payload` the step result is
/// rewritten with once the parent step's normal success payload is
/// replaced — per §4.7 point 11, the fan-out branch rewrites rather
/// than appends to the step's output payload.
pub fn summary_payload(response: &FanOutResponse, start_from_position: u32) -> Value {
    let mut payload = Map::new();
    payload.insert("child_run_ids".to_string(), json!(response.child_run_ids));
    payload.insert("child_count_created".to_string(), json!(response.child_run_ids.len()));
    payload.insert("child_count_skipped_duplicates".to_string(), json!(response.skipped_duplicates_count));
    payload.insert("skipped_duplicate_identifiers".to_string(), json!(response.skipped_duplicate_identifiers));
    payload.insert("start_from_position".to_string(), json!(start_from_position));
    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_entities_keeps_only_objects() {
        let output = json!({"results": [{"x": 1}, "scalar", [1, 2], {"y": 2}]});
        let entities = extract_entities(Some(&output));
        assert_eq!(entities, vec![json!({"x": 1}), json!({"y": 2})]);
    }

    #[test]
    fn extract_entities_empty_when_no_results_key() {
        assert!(extract_entities(Some(&json!({"other": 1}))).is_empty());
        assert!(extract_entities(None).is_empty());
    }

    #[test]
    fn pick_provider_finds_first_found_or_succeeded() {
        let attempts = vec![
            json!({"status": "failed", "provider": "x"}),
            json!({"status": "found", "provider": "parallel"}),
            json!({"status": "succeeded", "provider": "y"}),
        ];
        assert_eq!(pick_provider(Some(&attempts)), Some("parallel".to_string()));
    }

    #[test]
    fn pick_provider_none_when_no_attempts() {
        assert_eq!(pick_provider(None), None);
        assert_eq!(pick_provider(Some(&vec![json!({"status": "failed"})])), None);
    }

    #[test]
    fn summary_payload_shape() {
        let response = FanOutResponse {
            child_run_ids: vec!["c1".into(), "c2".into()],
            skipped_duplicates_count: 1,
            skipped_duplicate_identifiers: vec![json!({"domain": "dup.com"})],
            child_runs: vec![],
        };
        let payload = summary_payload(&response, 4);
        assert_eq!(payload["child_count_created"], json!(2));
        assert_eq!(payload["child_count_skipped_duplicates"], json!(1));
        assert_eq!(payload["start_from_position"], json!(4));
    }
}
