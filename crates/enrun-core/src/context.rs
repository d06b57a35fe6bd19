// crates/enrun-core/src/context.rs

//! The accumulating JSON context a pipeline run threads through its
//! steps: seeded from the entity's input, then merged with each step's
//! output as it succeeds. Condition evaluation and variable expansion
//! both read from it.

use serde_json::{Map, Value};

/// A flat-ish JSON object, merged into as the run progresses.
///
/// Only object values are ever merged in — a
/// step whose `output` is a JSON array or scalar contributes nothing
/// to the context (it still lands in the step's own `output_payload`
/// row, just not in the shared map downstream steps see).
#[derive(Debug, Clone, Default)]
pub struct Context(Map<String, Value>);

impl Context {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Seeds a context from the entity's input. Non-object input (or
    /// no input at all) starts from an empty map.
    pub fn from_entity_input(input: Option<&Value>) -> Self {
        match input.and_then(Value::as_object) {
            Some(map) => Self(map.clone()),
            None => Self::new(),
        }
    }

    /// Merges a step's output into the context. Right-biased,
    /// shallow: top-level keys in `output` overwrite existing keys of
    /// the same name. A non-object `output` is a no-op.
    pub fn merge_step_output(&mut self, output: &Value) {
        if let Some(map) = output.as_object() {
            for (key, value) in map {
                self.0.insert(key.clone(), value.clone());
            }
        }
    }

    /// Looks up a dotted path (`a.b.c`) by walking only mapping
    /// nodes. Any intermediate node that isn't an object (including
    /// arrays) makes the lookup "not found", matching the condition
    /// DSL's field resolution rule.
    pub fn get_dotted(&self, path: &str) -> Option<&Value> {
        let mut current = self.0.get(path.split('.').next()?)?;
        let mut segments = path.split('.');
        segments.next();
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seeds_from_object_input() {
        let input = json!({"domain": "acme.com"});
        let ctx = Context::from_entity_input(Some(&input));
        assert_eq!(ctx.get_dotted("domain"), Some(&json!("acme.com")));
    }

    #[test]
    fn non_object_input_starts_empty() {
        let input = json!(["a", "b"]);
        let ctx = Context::from_entity_input(Some(&input));
        assert_eq!(ctx.as_map().len(), 0);
    }

    #[test]
    fn merge_overwrites_top_level_keys() {
        let mut ctx = Context::from_entity_input(Some(&json!({"domain": "old.com", "size": 10})));
        ctx.merge_step_output(&json!({"domain": "new.com"}));
        assert_eq!(ctx.get_dotted("domain"), Some(&json!("new.com")));
        assert_eq!(ctx.get_dotted("size"), Some(&json!(10)));
    }

    #[test]
    fn merge_ignores_non_object_output() {
        let mut ctx = Context::from_entity_input(Some(&json!({"domain": "acme.com"})));
        ctx.merge_step_output(&json!([1, 2, 3]));
        assert_eq!(ctx.as_map().len(), 1);
    }

    #[test]
    fn dotted_path_walks_nested_objects() {
        let ctx = Context::from_entity_input(Some(&json!({"company": {"hq": {"city": "SF"}}})));
        assert_eq!(ctx.get_dotted("company.hq.city"), Some(&json!("SF")));
    }

    #[test]
    fn dotted_path_through_array_is_not_found() {
        let ctx = Context::from_entity_input(Some(&json!({"tags": ["a", "b"]})));
        assert_eq!(ctx.get_dotted("tags.0"), None);
    }

    #[test]
    fn dotted_path_missing_intermediate_is_not_found() {
        let ctx = Context::from_entity_input(Some(&json!({"company": {"name": "Acme"}})));
        assert_eq!(ctx.get_dotted("company.hq.city"), None);
    }
}
