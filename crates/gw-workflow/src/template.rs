//! Argument template resolution (§3, §4.7): `$step.result.path` references
//! into prior step outputs, and `$parent.*` references into a parent
//! execution's output table for sub-workflow steps.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

/// Finds every `$<step>...` / `$parent...` reference appearing anywhere in
/// an arguments template, so [`crate::definition::WorkflowDefinition::validate`]
/// can check each one resolves to a declared step.
pub fn step_references(value: &Value) -> HashSet<String> {
    let mut found = HashSet::new();
    collect(value, &mut found);
    found
}

fn collect(value: &Value, found: &mut HashSet<String>) {
    match value {
        Value::String(s) => {
            if let Some(rest) = s.strip_prefix('$') {
                if let Some(first) = rest.split('.').next() {
                    if !first.is_empty() {
                        found.insert(first.to_string());
                    }
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect(v, found)),
        _ => {}
    }
}

/// Resolves an arguments template against the outputs recorded so far
/// (keyed by step id) plus, for sub-workflow steps, the parent execution's
/// output table. Only whole-string references (`"$step.result.path"`) are
/// substituted — a reference embedded inside a larger string is left
/// untouched, matching the dotted-path shorthand used elsewhere in this
/// codebase rather than doing general string interpolation.
pub fn resolve(
    value: &Value,
    outputs: &HashMap<String, Value>,
    parent: Option<&HashMap<String, Value>>,
) -> Value {
    match value {
        Value::String(s) => resolve_reference(s, outputs, parent).unwrap_or_else(|| value.clone()),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, outputs, parent)).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), resolve(v, outputs, parent))).collect())
        }
        other => other.clone(),
    }
}

fn resolve_reference(
    s: &str,
    outputs: &HashMap<String, Value>,
    parent: Option<&HashMap<String, Value>>,
) -> Option<Value> {
    let rest = s.strip_prefix('$')?;
    let mut parts = rest.split('.');
    let scope = parts.next()?;
    let path: Vec<&str> = parts.collect();

    if scope == "parent" {
        return navigate_map(parent?, &path);
    }

    let root = outputs.get(scope)?;
    if path.first() != Some(&"result") {
        return None;
    }
    navigate(root, &path[1..])
}

fn navigate(value: &Value, path: &[&str]) -> Option<Value> {
    let mut current = value.clone();
    for part in path {
        current = match current {
            Value::Object(ref map) => map.get(*part)?.clone(),
            Value::Array(ref arr) => arr.get(part.parse::<usize>().ok()?)?.clone(),
            _ => return None,
        };
    }
    Some(current)
}

fn navigate_map(map: &HashMap<String, Value>, path: &[&str]) -> Option<Value> {
    let (first, rest) = path.split_first()?;
    navigate(map.get(*first)?, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_nested_step_result_path() {
        let mut outputs = HashMap::new();
        outputs.insert("fetch".to_string(), json!({"result": {"body": {"id": 42}}}));
        let resolved = resolve(&json!("$fetch.result.body.id"), &outputs, None);
        assert_eq!(resolved, json!(42));
    }

    #[test]
    fn resolves_inside_nested_object_templates() {
        let mut outputs = HashMap::new();
        outputs.insert("fetch".to_string(), json!({"result": "hello"}));
        let resolved = resolve(&json!({"message": "$fetch.result", "n": 1}), &outputs, None);
        assert_eq!(resolved, json!({"message": "hello", "n": 1}));
    }

    #[test]
    fn parent_reference_resolves_into_parent_table() {
        let mut parent = HashMap::new();
        parent.insert("config".to_string(), json!({"threshold": 5}));
        let resolved = resolve(&json!("$parent.config.threshold"), &HashMap::new(), Some(&parent));
        assert_eq!(resolved, json!(5));
    }

    #[test]
    fn unresolvable_reference_is_left_as_is() {
        let resolved = resolve(&json!("$missing.result"), &HashMap::new(), None);
        assert_eq!(resolved, json!("$missing.result"));
    }

    #[test]
    fn step_references_collects_distinct_ids() {
        let refs = step_references(&json!({"a": "$fetch.result", "b": ["$transform.result.x"]}));
        assert!(refs.contains("fetch"));
        assert!(refs.contains("transform"));
    }
}
