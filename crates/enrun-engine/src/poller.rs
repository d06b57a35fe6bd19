// crates/enrun-engine/src/poller.rs

//! The shared deep-research poller: compose a prompt from context,
//! create a remote task, poll its status on a fixed interval, fetch
//! the result, and produce a normalised [`OperationEnvelope`].
//!
//! Grounded on `fluent_engines::replicate::ReplicateEngine`,
//! which has the same create-then-poll-then-fetch shape against a
//! different provider. Cancellation racing is grounded on the oddjobs
//! pack's disconnect-vs-handler `tokio::select!` pattern.

use std::time::Duration;

use enrun_core::http::ApiClient;
use enrun_core::types::OperationEnvelope;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

const PARALLEL_BASE_URL: &str = "https://api.parallel.ai";

/// Returned as the `Err` message when a poll wait is cancelled; the
/// engine checks for this exact string via [`crate::dispatch::is_cancellation`]
/// to distinguish cancellation from an ordinary envelope failure —
/// per §5, a cancelled wait produces no envelope at all.
pub const CANCELLED_KIND: &str = "poller_cancelled";

/// One context field a prompt template references, with its fallback
/// alias chain and, for optional fields, a default string. Modelling
/// these as data (rather than hard-coded fallback chains per field)
/// is the explicit re-architecture note in the source spec.
pub struct FieldSpec {
    pub placeholder: &'static str,
    pub aliases: &'static [&'static str],
    pub default: Option<&'static str>,
    pub required: bool,
}

/// An extra key to copy into the envelope output alongside the field
/// it was resolved from — encodes a blueprint-author alias the
/// provider response is expected to echo back (e.g. `domain` as an
/// alias of `target_company_domain`).
pub struct EchoAlias {
    pub output_key: &'static str,
    pub source_placeholder: &'static str,
}

pub struct PollerVariant {
    pub operation_id: &'static str,
    pub processor: &'static str,
    pub max_poll_attempts: u32,
    pub poll_interval_seconds: u64,
    pub prompt_template: &'static str,
    pub fields: &'static [FieldSpec],
    pub echo_aliases: &'static [EchoAlias],
}

impl PollerVariant {
    pub fn icp_job_titles() -> PollerVariant {
        PollerVariant {
            operation_id: crate::dispatch::ICP_JOB_TITLES,
            processor: "core",
            max_poll_attempts: 30,
            poll_interval_seconds: 20,
            prompt_template: "Identify the most likely job titles an ideal customer profile would hold \
                at {company_name} (domain: {domain}). Company description: {company_description}",
            fields: &[
                FieldSpec { placeholder: "company_name", aliases: &["company_name", "companyName"], default: None, required: true },
                FieldSpec { placeholder: "domain", aliases: &["domain", "company_domain"], default: None, required: true },
                FieldSpec {
                    placeholder: "company_description",
                    aliases: &["company_description", "description"],
                    default: Some("No description provided."),
                    required: false,
                },
            ],
            echo_aliases: &[],
        }
    }

    pub fn company_intel_briefing() -> PollerVariant {
        PollerVariant {
            operation_id: crate::dispatch::COMPANY_INTEL_BRIEFING,
            processor: "core",
            max_poll_attempts: 30,
            poll_interval_seconds: 20,
            prompt_template: "On behalf of {client_company_name} ({client_company_description}), research \
                {target_company_name} (domain: {target_company_domain}). Industry: {industry}. Size: {size}. \
                Funding: {funding}. Competitors: {competitors}.",
            fields: &[
                FieldSpec { placeholder: "client_company_name", aliases: &["client_company_name"], default: None, required: true },
                FieldSpec {
                    placeholder: "client_company_description",
                    aliases: &["client_company_description"],
                    default: None,
                    required: true,
                },
                FieldSpec {
                    placeholder: "target_company_name",
                    aliases: &["target_company_name", "company_name"],
                    default: None,
                    required: true,
                },
                FieldSpec {
                    placeholder: "target_company_domain",
                    aliases: &["target_company_domain", "domain"],
                    default: None,
                    required: true,
                },
                FieldSpec { placeholder: "industry", aliases: &["industry"], default: Some("Unknown industry."), required: false },
                FieldSpec { placeholder: "size", aliases: &["size", "company_size"], default: Some("Unknown size."), required: false },
                FieldSpec { placeholder: "funding", aliases: &["funding"], default: Some("No funding information available."), required: false },
                FieldSpec {
                    placeholder: "competitors",
                    aliases: &["competitors"],
                    default: Some("No known competitors."),
                    required: false,
                },
            ],
            echo_aliases: &[EchoAlias { output_key: "domain", source_placeholder: "target_company_domain" }],
        }
    }

    pub fn person_intel_briefing() -> PollerVariant {
        PollerVariant {
            operation_id: crate::dispatch::PERSON_INTEL_BRIEFING,
            processor: "core",
            max_poll_attempts: 30,
            poll_interval_seconds: 20,
            prompt_template: "On behalf of {client_company_name} ({client_company_description}), research \
                {person_full_name}, {person_current_job_title} at {person_current_company_name} \
                ({person_current_company_description}). LinkedIn: {person_linkedin_url}. \
                Prepared for: {customer_company_name}.",
            fields: &[
                FieldSpec { placeholder: "client_company_name", aliases: &["client_company_name"], default: None, required: true },
                FieldSpec {
                    placeholder: "client_company_description",
                    aliases: &["client_company_description"],
                    default: None,
                    required: true,
                },
                FieldSpec {
                    placeholder: "person_full_name",
                    aliases: &["person_full_name", "full_name"],
                    default: None,
                    required: true,
                },
                FieldSpec {
                    placeholder: "person_current_company_name",
                    aliases: &["person_current_company_name", "current_company_name"],
                    default: None,
                    required: true,
                },
                FieldSpec {
                    placeholder: "person_current_job_title",
                    aliases: &["person_current_job_title", "title", "current_title"],
                    default: Some("an unspecified role"),
                    required: false,
                },
                FieldSpec {
                    placeholder: "person_linkedin_url",
                    aliases: &["person_linkedin_url", "linkedin_url"],
                    default: Some("No LinkedIn profile available."),
                    required: false,
                },
                FieldSpec {
                    placeholder: "person_current_company_description",
                    aliases: &["person_current_company_description"],
                    default: Some("No description provided."),
                    required: false,
                },
                FieldSpec {
                    placeholder: "customer_company_name",
                    aliases: &["customer_company_name", "client_company_name"],
                    default: Some("our customer"),
                    required: false,
                },
            ],
            echo_aliases: &[
                EchoAlias { output_key: "title", source_placeholder: "person_current_job_title" },
                EchoAlias { output_key: "current_title", source_placeholder: "person_current_job_title" },
            ],
        }
    }
}

fn resolve_field(context: &Value, field: &FieldSpec) -> Option<String> {
    for alias in field.aliases {
        if let Some(value) = context.get(alias) {
            match value {
                Value::Null => continue,
                Value::String(s) if s.is_empty() => continue,
                Value::String(s) => return Some(s.clone()),
                other => return Some(other.to_string()),
            }
        }
    }
    field.default.map(str::to_string)
}

fn build_prompt(variant: &PollerVariant, context: &Value) -> Result<(String, Map<String, Value>), Vec<String>> {
    let mut missing = Vec::new();
    let mut resolved = Map::new();
    let mut prompt = variant.prompt_template.to_string();

    for field in variant.fields {
        match resolve_field(context, field) {
            Some(value) => {
                prompt = prompt.replace(&format!("{{{}}}", field.placeholder), &value);
                resolved.insert(field.placeholder.to_string(), Value::String(value));
            }
            None if field.required => missing.push(field.placeholder.to_string()),
            None => {}
        }
    }

    if !missing.is_empty() {
        return Err(missing);
    }

    Ok((prompt, resolved))
}

fn failed_envelope(error: &str, provider_attempts: Vec<Value>) -> OperationEnvelope {
    OperationEnvelope {
        run_id: None,
        operation_id: None,
        status: "failed".to_string(),
        output: None,
        provider_attempts: Some(provider_attempts),
        missing_inputs: None,
        error: Some(error.to_string()),
    }
}

pub async fn run_poller(
    variant: PollerVariant,
    client: &dyn ApiClient,
    context: &Value,
    parallel_api_key: Option<&str>,
) -> anyhow::Result<OperationEnvelope> {
    run_poller_with_cancellation(variant, client, context, parallel_api_key, &CancellationToken::new()).await
}

pub async fn run_poller_with_cancellation(
    variant: PollerVariant,
    client: &dyn ApiClient,
    context: &Value,
    parallel_api_key: Option<&str>,
    cancellation: &CancellationToken,
) -> anyhow::Result<OperationEnvelope> {
    let api_key = match parallel_api_key {
        Some(key) => key,
        None => {
            return Ok(OperationEnvelope {
                run_id: None,
                operation_id: None,
                status: "failed".to_string(),
                output: None,
                provider_attempts: Some(vec![json!({"status": "skipped", "skip_reason": "missing_parallel_api_key"})]),
                missing_inputs: None,
                error: None,
            })
        }
    };

    let (prompt, resolved_fields) = match build_prompt(&variant, context) {
        Ok(pair) => pair,
        Err(missing_inputs) => {
            return Ok(OperationEnvelope {
                run_id: None,
                operation_id: None,
                status: "failed".to_string(),
                output: None,
                provider_attempts: None,
                missing_inputs: Some(missing_inputs),
                error: None,
            })
        }
    };

    let create_body = json!({ "input": prompt, "processor": variant.processor });
    let (status, create_response) = client
        .post_raw(&format!("{PARALLEL_BASE_URL}/v1/tasks/runs"), ("x-api-key", api_key), &create_body)
        .await?;

    if !status.is_success() {
        return Ok(failed_envelope(
            "create_task_failed",
            vec![json!({"status": "failed", "error": "create_task_failed", "raw_response": create_response})],
        ));
    }

    let run_id = create_response.get("run_id").and_then(Value::as_str).map(str::to_string);
    let run_id = match run_id {
        Some(id) => id,
        None => {
            return Ok(failed_envelope(
                "create_task_failed",
                vec![json!({"status": "failed", "error": "create_task_failed", "raw_response": create_response})],
            ))
        }
    };

    let mut poll_count: u32 = 0;
    let mut task_status = create_response.get("status").and_then(Value::as_str).unwrap_or("queued").to_string();

    while task_status != "completed" && task_status != "failed" && poll_count < variant.max_poll_attempts {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(variant.poll_interval_seconds)) => {}
            _ = cancellation.cancelled() => {
                return Err(anyhow::anyhow!(CANCELLED_KIND));
            }
        }

        let status_url = format!("{PARALLEL_BASE_URL}/v1/tasks/runs/{run_id}");
        let (status_code, status_body) = client.get_raw(&status_url, ("x-api-key", api_key)).await?;
        poll_count += 1;

        if !status_code.is_success() {
            tracing::warn!(run_id = %run_id, status = %status_code, "deep-research status check returned non-2xx, continuing");
            continue;
        }

        task_status = status_body.get("status").and_then(Value::as_str).unwrap_or(&task_status).to_string();
    }

    if task_status == "failed" {
        return Ok(failed_envelope(
            "parallel_task_failed",
            vec![json!({"status": "failed", "error": "parallel_task_failed", "poll_count": poll_count})],
        ));
    }

    if task_status != "completed" {
        return Ok(failed_envelope(
            "poll_timeout",
            vec![json!({
                "status": "failed",
                "error": "poll_timeout",
                "poll_count": poll_count,
                "max_poll_attempts": variant.max_poll_attempts,
            })],
        ));
    }

    let result_url = format!("{PARALLEL_BASE_URL}/v1/tasks/runs/{run_id}/result");
    let (result_status, result_body) = client.get_raw(&result_url, ("x-api-key", api_key)).await?;

    if !result_status.is_success() {
        return Ok(failed_envelope(&format!("result_fetch_failed: {result_status}"), vec![]));
    }

    let mut output = Map::new();
    output.insert("parallel_raw_response".to_string(), result_body);
    for (placeholder, value) in &resolved_fields {
        output.insert(placeholder.clone(), value.clone());
    }
    for echo in variant.echo_aliases {
        if let Some(value) = resolved_fields.get(echo.source_placeholder) {
            output.insert(echo.output_key.to_string(), value.clone());
        }
    }

    Ok(OperationEnvelope {
        run_id: Some(run_id),
        operation_id: Some(variant.operation_id.to_string()),
        status: "found".to_string(),
        output: Some(Value::Object(output)),
        provider_attempts: Some(vec![json!({"status": "found", "provider": "parallel", "poll_count": poll_count})]),
        missing_inputs: None,
        error: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use enrun_core::http::ApiClient;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::Mutex;

    struct FakeClient {
        responses: Mutex<Vec<(StatusCode, Value)>>,
    }

    #[async_trait]
    impl ApiClient for FakeClient {
        async fn post_internal(&self, _path: &str, _body: &Value) -> anyhow::Result<Value> {
            unreachable!("poller does not use internal api")
        }
        async fn post_operation(&self, _path: &str, _o: &str, _c: &str, _body: &Value) -> anyhow::Result<Value> {
            unreachable!("poller does not use operations api")
        }
        async fn post_raw(&self, _url: &str, _header: (&str, &str), _body: &Value) -> anyhow::Result<(StatusCode, Value)> {
            Ok(self.responses.lock().unwrap().remove(0))
        }
        async fn get_raw(&self, _url: &str, _header: (&str, &str)) -> anyhow::Result<(StatusCode, Value)> {
            Ok(self.responses.lock().unwrap().remove(0))
        }
    }

    #[tokio::test]
    async fn missing_required_fields_returns_failed_envelope() {
        let client = FakeClient { responses: Mutex::new(vec![]) };
        let envelope = run_poller(PollerVariant::icp_job_titles(), &client, &json!({}), Some("key")).await.unwrap();
        assert_eq!(envelope.status, "failed");
        let missing = envelope.missing_inputs.unwrap();
        assert!(missing.contains(&"company_name".to_string()));
        assert!(missing.contains(&"domain".to_string()));
    }

    #[tokio::test]
    async fn missing_api_key_returns_skipped_attempt() {
        let client = FakeClient { responses: Mutex::new(vec![]) };
        let envelope = run_poller(PollerVariant::icp_job_titles(), &client, &json!({"company_name": "Acme", "domain": "acme.com"}), None)
            .await
            .unwrap();
        assert_eq!(envelope.status, "failed");
        let attempts = envelope.provider_attempts.unwrap();
        assert_eq!(attempts[0]["skip_reason"], json!("missing_parallel_api_key"));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_timeout_after_max_attempts() {
        let mut variant = PollerVariant::icp_job_titles();
        variant.max_poll_attempts = 3;
        variant.poll_interval_seconds = 0;

        let client = FakeClient {
            responses: Mutex::new(vec![
                (StatusCode::OK, json!({"run_id": "r1", "status": "queued"})),
                (StatusCode::OK, json!({"status": "running"})),
                (StatusCode::OK, json!({"status": "running"})),
                (StatusCode::OK, json!({"status": "running"})),
            ]),
        };

        let envelope = run_poller(variant, &client, &json!({"company_name": "Acme", "domain": "acme.com"}), Some("key"))
            .await
            .unwrap();

        assert_eq!(envelope.status, "failed");
        let attempts = envelope.provider_attempts.unwrap();
        assert_eq!(attempts[0]["error"], json!("poll_timeout"));
        assert_eq!(attempts[0]["poll_count"], json!(3));
        assert_eq!(attempts[0]["max_poll_attempts"], json!(3));
    }

    #[tokio::test(start_paused = true)]
    async fn completed_task_fetches_result_and_echoes_aliases() {
        let mut variant = PollerVariant::company_intel_briefing();
        variant.poll_interval_seconds = 0;

        let client = FakeClient {
            responses: Mutex::new(vec![
                (StatusCode::OK, json!({"run_id": "r1", "status": "queued"})),
                (StatusCode::OK, json!({"status": "completed"})),
                (StatusCode::OK, json!({"summary": "Acme is a widget maker."})),
            ]),
        };

        let context = json!({
            "client_company_name": "OurCo",
            "client_company_description": "We sell CRMs.",
            "target_company_name": "Acme",
            "target_company_domain": "acme.com",
        });

        let envelope = run_poller(variant, &client, &context, Some("key")).await.unwrap();
        assert_eq!(envelope.status, "found");
        let output = envelope.output.unwrap();
        assert_eq!(output["target_company_domain"], json!("acme.com"));
        assert_eq!(output["domain"], json!("acme.com"));
        assert_eq!(output["parallel_raw_response"]["summary"], json!("Acme is a widget maker."));
    }

    #[tokio::test]
    async fn cancellation_during_wait_short_circuits() {
        let variant = PollerVariant::icp_job_titles();
        let client = FakeClient {
            responses: Mutex::new(vec![(StatusCode::OK, json!({"run_id": "r1", "status": "queued"}))]),
        };
        let token = CancellationToken::new();
        token.cancel();

        let context = json!({"company_name": "Acme", "domain": "acme.com"});
        let result = run_poller_with_cancellation(variant, &client, &context, Some("key"), &token).await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().to_string(), CANCELLED_KIND);
    }
}
