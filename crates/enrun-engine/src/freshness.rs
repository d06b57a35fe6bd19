// crates/enrun-engine/src/freshness.rs

//! Per-step freshness gate: consult the freshness store before running
//! a step live, and skip execution when the canonical record is recent
//! enough. Grounded on `fluent_engines::cache_manager`'s
//! read-through pattern — check a
//! store first, fall through to live work on a miss or an error.

use enrun_core::context::Context;
use enrun_core::http::ApiClient;
use enrun_core::types::{EntityType, FreshnessRecord};
use serde_json::{json, Map, Value};

/// What the gate decided for a step. `None` of the three non-`Fresh`
/// variants all mean the same thing to the engine ("proceed to live
/// execution"), but are kept distinct for logging.
pub enum Freshness {
    /// `skip_if_fresh` absent, or present but malformed (missing/zero
    /// `max_age_hours`, empty `identity_fields`).
    NotConfigured,
    /// Configured, checked, and the store reported `fresh: false`.
    NotFresh,
    /// The freshness call itself failed; per §4.3 point 4 this is
    /// logged and treated exactly like `NotFresh` — never skip on an
    /// inconclusive check.
    CheckFailed,
    /// Configured and fresh: the caller should merge `record`'s
    /// canonical payload into context and skip the step.
    Fresh(FreshnessRecord),
}

/// Reads `identity_fields` off context, skipping any field that is
/// absent, `null`, or an empty string — per §4.3 point 1.
fn build_identifiers(context: &Context, identity_fields: &[Value]) -> Map<String, Value> {
    let mut identifiers = Map::new();
    for field in identity_fields {
        let Some(field) = field.as_str() else { continue };
        match context.get_dotted(field) {
            Some(Value::Null) | None => {}
            Some(Value::String(s)) if s.is_empty() => {}
            Some(value) => {
                identifiers.insert(field.to_string(), value.clone());
            }
        }
    }
    identifiers
}

/// Validates and unpacks a step's `skip_if_fresh` config. Returns
/// `None` when it isn't a well-formed `{max_age_hours: positive finite
/// number, identity_fields: non-empty list of strings}` mapping.
fn parse_skip_if_fresh(config: &Value) -> Option<(f64, &Vec<Value>)> {
    let map = config.as_object()?;
    let max_age_hours = map.get("max_age_hours")?.as_f64()?;
    if !(max_age_hours.is_finite() && max_age_hours > 0.0) {
        return None;
    }
    let identity_fields = map.get("identity_fields")?.as_array()?;
    if identity_fields.is_empty() {
        return None;
    }
    Some((max_age_hours, identity_fields))
}

/// Runs the freshness gate for one step. `skip_if_fresh_config` is the
/// raw `step_config.skip_if_fresh` value, if any.
pub async fn check(
    client: &dyn ApiClient,
    skip_if_fresh_config: Option<&Value>,
    entity_type: EntityType,
    context: &Context,
) -> Freshness {
    let Some(config) = skip_if_fresh_config else {
        return Freshness::NotConfigured;
    };
    let Some((max_age_hours, identity_fields)) = parse_skip_if_fresh(config) else {
        return Freshness::NotConfigured;
    };

    let identifiers = build_identifiers(context, identity_fields);

    let body = json!({
        "entity_type": entity_type.as_str(),
        "identifiers": identifiers,
        "max_age_hours": max_age_hours,
    });

    let response = client.post_internal("/api/internal/entity-state/check-freshness", &body).await;

    match response {
        Ok(data) => match serde_json::from_value::<FreshnessRecord>(data) {
            Ok(record) if record.fresh => Freshness::Fresh(record),
            Ok(_) => Freshness::NotFresh,
            Err(err) => {
                tracing::warn!(error = %err, "freshness response did not decode, proceeding to live execution");
                Freshness::CheckFailed
            }
        },
        Err(err) => {
            tracing::warn!(error = %err, "freshness check failed, proceeding to live execution");
            Freshness::CheckFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use enrun_core::http::ApiClient;
    use serde_json::json;
    use std::sync::Mutex;

    struct FakeClient {
        response: Mutex<Option<anyhow::Result<Value>>>,
        last_body: Mutex<Option<Value>>,
    }

    #[async_trait]
    impl ApiClient for FakeClient {
        async fn post_internal(&self, _path: &str, body: &Value) -> anyhow::Result<Value> {
            *self.last_body.lock().unwrap() = Some(body.clone());
            self.response.lock().unwrap().take().unwrap()
        }
        async fn post_operation(&self, _path: &str, _o: &str, _c: &str, _body: &Value) -> anyhow::Result<Value> {
            unreachable!()
        }
        async fn post_raw(&self, _url: &str, _h: (&str, &str), _body: &Value) -> anyhow::Result<(reqwest::StatusCode, Value)> {
            unreachable!()
        }
        async fn get_raw(&self, _url: &str, _h: (&str, &str)) -> anyhow::Result<(reqwest::StatusCode, Value)> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn not_configured_when_absent() {
        let client = FakeClient { response: Mutex::new(None), last_body: Mutex::new(None) };
        let ctx = Context::from_entity_input(Some(&json!({})));
        let result = check(&client, None, EntityType::Company, &ctx).await;
        assert!(matches!(result, Freshness::NotConfigured));
    }

    #[tokio::test]
    async fn not_configured_when_zero_max_age() {
        let client = FakeClient { response: Mutex::new(None), last_body: Mutex::new(None) };
        let ctx = Context::from_entity_input(Some(&json!({})));
        let config = json!({"max_age_hours": 0, "identity_fields": ["domain"]});
        let result = check(&client, Some(&config), EntityType::Company, &ctx).await;
        assert!(matches!(result, Freshness::NotConfigured));
    }

    #[tokio::test]
    async fn fresh_hit_returns_canonical_payload() {
        let client = FakeClient {
            response: Mutex::new(Some(Ok(json!({
                "fresh": true,
                "canonical_payload": {"company_name": "Acme"}
            })))),
            last_body: Mutex::new(None),
        };
        let ctx = Context::from_entity_input(Some(&json!({"domain": "acme.com"})));
        let config = json!({"max_age_hours": 24, "identity_fields": ["domain"]});
        let result = check(&client, Some(&config), EntityType::Company, &ctx).await;
        match result {
            Freshness::Fresh(record) => {
                assert_eq!(record.canonical_payload, Some(json!({"company_name": "Acme"})));
            }
            _ => panic!("expected fresh"),
        }
        let body = client.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(body["identifiers"]["domain"], json!("acme.com"));
    }

    #[tokio::test]
    async fn identifiers_omit_blank_fields() {
        let client = FakeClient {
            response: Mutex::new(Some(Ok(json!({"fresh": false})))),
            last_body: Mutex::new(None),
        };
        let ctx = Context::from_entity_input(Some(&json!({"domain": "", "name": null})));
        let config = json!({"max_age_hours": 24, "identity_fields": ["domain", "name", "missing"]});
        let result = check(&client, Some(&config), EntityType::Company, &ctx).await;
        assert!(matches!(result, Freshness::NotFresh));
        let body = client.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(body["identifiers"], json!({}));
    }

    #[tokio::test]
    async fn error_is_treated_as_not_fresh() {
        let client = FakeClient {
            response: Mutex::new(Some(Err(anyhow::anyhow!("boom")))),
            last_body: Mutex::new(None),
        };
        let ctx = Context::from_entity_input(Some(&json!({"domain": "acme.com"})));
        let config = json!({"max_age_hours": 24, "identity_fields": ["domain"]});
        let result = check(&client, Some(&config), EntityType::Company, &ctx).await;
        assert!(matches!(result, Freshness::CheckFailed));
    }
}
