// crates/enrun-engine/src/cond.rs

//! The condition DSL: a pure function from a JSON-shaped condition
//! tree plus a [`Context`] to a boolean. Parsed once into
//! [`Condition`] (a tagged variant, per the re-architecture note —
//! the wire shape is "a mapping with key `all`/`any`/`field`", which
//! we resolve into an explicit enum at planner time instead of
//! re-dispatching on raw JSON on every evaluation).

use enrun_core::Context;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Exists,
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Contains,
    IContains,
    In,
}

impl Op {
    fn parse(raw: &str) -> Option<Op> {
        Some(match raw {
            "exists" => Op::Exists,
            "eq" => Op::Eq,
            "ne" => Op::Ne,
            "lt" => Op::Lt,
            "gt" => Op::Gt,
            "lte" => Op::Lte,
            "gte" => Op::Gte,
            "contains" => Op::Contains,
            "icontains" => Op::IContains,
            "in" => Op::In,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub enum Condition {
    /// The always-true empty condition, and any non-mapping JSON value
    /// other than a well-formed group/leaf — both collapse to the
    /// same evaluation outcome (true for null/absent, false for a
    /// malformed non-mapping), so we don't need to distinguish them
    /// once parsed.
    Always(bool),
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Leaf { field: String, op: Op, value: Option<Value> },
}

impl Condition {
    /// Parses a raw condition value as stored on a `StepSnapshot`.
    /// Never fails: anything unrecognised degrades to a condition that
    /// evaluates false, matching the "non-mapping condition ⇒ false"
    /// contract (and, separately, a leaf with an unrecognised `op`
    /// also evaluates false at evaluation time).
    pub fn parse(raw: Option<&Value>) -> Condition {
        match raw {
            None => Condition::Always(true),
            Some(Value::Null) => Condition::Always(true),
            Some(Value::Object(map)) if map.is_empty() => Condition::Always(true),
            Some(Value::Object(map)) => {
                if let Some(Value::Array(items)) = map.get("all") {
                    Condition::All(items.iter().map(|v| Condition::parse(Some(v))).collect())
                } else if let Some(Value::Array(items)) = map.get("any") {
                    Condition::Any(items.iter().map(|v| Condition::parse(Some(v))).collect())
                } else {
                    match (map.get("field").and_then(Value::as_str), map.get("op").and_then(Value::as_str)) {
                        (Some(field), Some(op_str)) => match Op::parse(op_str) {
                            Some(op) => Condition::Leaf {
                                field: field.to_string(),
                                op,
                                value: map.get("value").cloned(),
                            },
                            // Unrecognised op: no leaf can ever evaluate
                            // true for it, so fold straight to false.
                            None => Condition::Always(false),
                        },
                        _ => Condition::Always(false),
                    }
                }
            }
            Some(_) => Condition::Always(false),
        }
    }

    /// Evaluates the condition against a context. Pure: no I/O, no
    /// mutation, and safe to call repeatedly with the same inputs.
    pub fn evaluate(&self, ctx: &Context) -> bool {
        match self {
            Condition::Always(b) => *b,
            Condition::All(children) => children.iter().all(|c| c.evaluate(ctx)),
            Condition::Any(children) => children.iter().any(|c| c.evaluate(ctx)),
            Condition::Leaf { field, op, value } => evaluate_leaf(ctx, field, op, value.as_ref()),
        }
    }
}

fn evaluate_leaf(ctx: &Context, field: &str, op: &Op, value: Option<&Value>) -> bool {
    let found = ctx.get_dotted(field);

    if *op == Op::Exists {
        return match found {
            None => false,
            Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        };
    }

    let found = match found {
        Some(v) => v,
        None => return false,
    };

    match op {
        Op::Exists => unreachable!("handled above"),
        Op::Eq => Some(found) == value,
        Op::Ne => Some(found) != value,
        Op::Lt | Op::Gt | Op::Lte | Op::Gte => match (as_finite_number(found), value.and_then(as_finite_number)) {
            (Some(lhs), Some(rhs)) => match op {
                Op::Lt => lhs < rhs,
                Op::Gt => lhs > rhs,
                Op::Lte => lhs <= rhs,
                Op::Gte => lhs >= rhs,
                _ => unreachable!(),
            },
            _ => false,
        },
        Op::Contains | Op::IContains => {
            let haystack = as_compare_string(found);
            let needle = value.map(as_compare_string).unwrap_or_default();
            if *op == Op::IContains {
                haystack.to_lowercase().contains(&needle.to_lowercase())
            } else {
                haystack.contains(&needle)
            }
        }
        Op::In => match value {
            Some(Value::Array(items)) => items.contains(found),
            _ => false,
        },
    }
}

/// Coerces a JSON value to a finite `f64`: numbers pass through (if
/// finite), non-empty strings are parsed, everything else fails.
fn as_finite_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) if !s.is_empty() => s.parse::<f64>().ok()?,
        _ => return None,
    };
    if n.is_finite() {
        Some(n)
    } else {
        None
    }
}

fn as_compare_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Context {
        Context::from_entity_input(Some(&value))
    }

    #[test]
    fn null_condition_is_true() {
        let c = Condition::parse(None);
        assert!(c.evaluate(&ctx(json!({}))));
        let c = Condition::parse(Some(&Value::Null));
        assert!(c.evaluate(&ctx(json!({}))));
    }

    #[test]
    fn non_mapping_condition_is_false() {
        let c = Condition::parse(Some(&json!("nonsense")));
        assert!(!c.evaluate(&ctx(json!({}))));
    }

    #[test]
    fn all_requires_every_child() {
        let c = Condition::parse(Some(&json!({"all": [
            {"field": "tier", "op": "eq", "value": "pro"},
            {"field": "active", "op": "eq", "value": true}
        ]})));
        assert!(c.evaluate(&ctx(json!({"tier": "pro", "active": true}))));
        assert!(!c.evaluate(&ctx(json!({"tier": "pro", "active": false}))));
    }

    #[test]
    fn any_requires_one_child() {
        let c = Condition::parse(Some(&json!({"any": [
            {"field": "tier", "op": "eq", "value": "pro"},
            {"field": "tier", "op": "eq", "value": "enterprise"}
        ]})));
        assert!(c.evaluate(&ctx(json!({"tier": "enterprise"}))));
        assert!(!c.evaluate(&ctx(json!({"tier": "free"}))));
    }

    #[test]
    fn single_wraps_equivalent_to_all_and_any() {
        let leaf = json!({"field": "tier", "op": "eq", "value": "pro"});
        let context = ctx(json!({"tier": "pro"}));
        let c = Condition::parse(Some(&leaf));
        let all = Condition::parse(Some(&json!({"all": [leaf.clone()]})));
        let any = Condition::parse(Some(&json!({"any": [leaf]})));
        assert_eq!(c.evaluate(&context), all.evaluate(&context));
        assert_eq!(c.evaluate(&context), any.evaluate(&context));
    }

    #[test]
    fn exists_boundary_cases() {
        let context = ctx(json!({
            "empty_str": "",
            "empty_list": [],
            "present_str": "hi",
            "present_num": 0,
            "nullish": null
        }));
        let exists = |field: &str| Condition::parse(Some(&json!({"field": field, "op": "exists"}))).evaluate(&context);
        assert!(!exists("empty_str"));
        assert!(!exists("empty_list"));
        assert!(!exists("nullish"));
        assert!(!exists("missing"));
        assert!(exists("present_str"));
        assert!(exists("present_num"));
    }

    #[test]
    fn numeric_ops_coerce_strings_and_reject_garbage() {
        let context = ctx(json!({"count": "42", "garbage": "not-a-number", "inf": "Infinity"}));
        assert!(Condition::parse(Some(&json!({"field": "count", "op": "gt", "value": 40}))).evaluate(&context));
        assert!(!Condition::parse(Some(&json!({"field": "garbage", "op": "gt", "value": 1}))).evaluate(&context));
        assert!(!Condition::parse(Some(&json!({"field": "inf", "op": "gt", "value": 1}))).evaluate(&context));
    }

    #[test]
    fn contains_and_icontains() {
        let context = ctx(json!({"name": "Acme Corp"}));
        assert!(Condition::parse(Some(&json!({"field": "name", "op": "contains", "value": "Acme"}))).evaluate(&context));
        assert!(!Condition::parse(Some(&json!({"field": "name", "op": "contains", "value": "acme"}))).evaluate(&context));
        assert!(Condition::parse(Some(&json!({"field": "name", "op": "icontains", "value": "acme"}))).evaluate(&context));
    }

    #[test]
    fn in_rejects_non_list_compare_value() {
        let context = ctx(json!({"tier": "pro"}));
        assert!(Condition::parse(Some(&json!({"field": "tier", "op": "in", "value": ["pro", "enterprise"]}))).evaluate(&context));
        assert!(!Condition::parse(Some(&json!({"field": "tier", "op": "in", "value": "pro"}))).evaluate(&context));
    }

    #[test]
    fn missing_intermediate_path_is_not_found() {
        let context = ctx(json!({"company": {"name": "Acme"}}));
        assert!(!Condition::parse(Some(&json!({"field": "company.hq.city", "op": "exists"}))).evaluate(&context));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let c = Condition::parse(Some(&json!({"field": "tier", "op": "eq", "value": "pro"})));
        let context = ctx(json!({"tier": "pro"}));
        assert_eq!(c.evaluate(&context), c.evaluate(&context));
    }
}
