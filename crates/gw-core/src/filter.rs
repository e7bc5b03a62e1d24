//! The boolean filter expression language (§4.5), shared verbatim by the
//! Event Bus's subscription filters and the Workflow Engine's step
//! conditions (§4.7: "Conditions use the same expression language as event
//! filters, extended with references to step results").
//!
//! A filter is compiled once (at subscribe time, or at workflow parse time)
//! into a [`CompiledFilter`] tree and evaluated against a
//! [`crate::wire::Value`] document per event/step-result.

use regex::Regex;

use crate::wire::Value;

#[derive(Debug, thiserror::Error)]
#[error("invalid filter: {0}")]
pub struct FilterCompileError(pub String);

/// Entry point: compiles a raw JSON filter expression (as received on the
/// wire in a `subscribe` call, or parsed out of a workflow step's
/// `condition`) into an evaluable [`CompiledFilter`].
pub fn compile(raw: &serde_json::Value) -> Result<CompiledFilter, FilterCompileError> {
    let value: Value = raw.clone().into();
    CompiledFilter::build(&value)
}

/// A filter compiled from its raw JSON form into evaluable leaves;
/// `$regex` patterns are pre-compiled so a hot matching path never pays
/// regex-compile cost (mirrors the router's one-time pattern compilation
/// pattern used elsewhere in this codebase).
#[derive(Debug, Clone)]
pub enum CompiledFilter {
    Wildcard,
    Eq { field: String, value: Value },
    Op { field: String, op: CompiledOp },
    And(Vec<CompiledFilter>),
    Or(Vec<CompiledFilter>),
    Not(Box<CompiledFilter>),
}

#[derive(Debug, Clone)]
pub enum CompiledOp {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Gt(f64),
    Gte(f64),
    Lt(f64),
    Lte(f64),
    Contains(Value),
    Regex(Regex),
    Exists(bool),
}

impl CompiledFilter {
    fn build(v: &Value) -> Result<CompiledFilter, FilterCompileError> {
        let map = v
            .as_map()
            .ok_or_else(|| FilterCompileError("filter must be a JSON object".into()))?;

        if let Some(list) = map.get("$and") {
            return Ok(CompiledFilter::And(Self::build_list(list)?));
        }
        if let Some(list) = map.get("$or") {
            return Ok(CompiledFilter::Or(Self::build_list(list)?));
        }
        if let Some(inner) = map.get("$not") {
            return Ok(CompiledFilter::Not(Box::new(Self::build(inner)?)));
        }

        if map.is_empty() {
            return Ok(CompiledFilter::Wildcard);
        }

        // Single-field leaf: `{"field": value}` or `{"field": {"$op": value}}`.
        let (field, value) = map
            .iter()
            .next()
            .ok_or_else(|| FilterCompileError("empty filter leaf".into()))?;

        if let Value::String(s) = value {
            if s == "*" {
                return Ok(CompiledFilter::Wildcard);
            }
        }

        if let Some(op_map) = value.as_map() {
            if let Some((op, operand)) = op_map.iter().next() {
                if op.starts_with('$') {
                    let op = Self::build_op(op, operand)?;
                    return Ok(CompiledFilter::Op {
                        field: field.clone(),
                        op,
                    });
                }
            }
        }

        Ok(CompiledFilter::Eq {
            field: field.clone(),
            value: value.clone(),
        })
    }

    fn build_list(v: &Value) -> Result<Vec<CompiledFilter>, FilterCompileError> {
        let items = v
            .as_list()
            .ok_or_else(|| FilterCompileError("$and/$or expects a list".into()))?;
        items.iter().map(Self::build).collect()
    }

    fn build_op(op: &str, operand: &Value) -> Result<CompiledOp, FilterCompileError> {
        let as_num = |v: &Value| {
            v.as_f64()
                .ok_or_else(|| FilterCompileError(format!("{op} requires a numeric operand")))
        };
        Ok(match op {
            "$eq" => CompiledOp::Eq(operand.clone()),
            "$ne" => CompiledOp::Ne(operand.clone()),
            "$in" => CompiledOp::In(
                operand
                    .as_list()
                    .ok_or_else(|| FilterCompileError("$in expects a list".into()))?
                    .to_vec(),
            ),
            "$nin" => CompiledOp::NotIn(
                operand
                    .as_list()
                    .ok_or_else(|| FilterCompileError("$nin expects a list".into()))?
                    .to_vec(),
            ),
            "$gt" => CompiledOp::Gt(as_num(operand)?),
            "$gte" => CompiledOp::Gte(as_num(operand)?),
            "$lt" => CompiledOp::Lt(as_num(operand)?),
            "$lte" => CompiledOp::Lte(as_num(operand)?),
            "$contains" => CompiledOp::Contains(operand.clone()),
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| FilterCompileError("$regex expects a string".into()))?;
                CompiledOp::Regex(
                    Regex::new(pattern).map_err(|e| FilterCompileError(format!("bad $regex: {e}")))?,
                )
            }
            "$exists" => CompiledOp::Exists(
                operand
                    .as_bool()
                    .ok_or_else(|| FilterCompileError("$exists expects a bool".into()))?,
            ),
            other => return Err(FilterCompileError(format!("unknown operator {other}"))),
        })
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            CompiledFilter::Wildcard => true,
            CompiledFilter::Eq { field, value } => doc.get(field) == Some(value),
            CompiledFilter::And(list) => list.iter().all(|f| f.matches(doc)),
            CompiledFilter::Or(list) => list.iter().any(|f| f.matches(doc)),
            CompiledFilter::Not(inner) => !inner.matches(doc),
            CompiledFilter::Op { field, op } => {
                let field_value = doc.get(field);
                match op {
                    CompiledOp::Eq(v) => field_value == Some(v),
                    CompiledOp::Ne(v) => field_value != Some(v),
                    CompiledOp::In(list) => field_value.map(|fv| list.contains(fv)).unwrap_or(false),
                    CompiledOp::NotIn(list) => field_value.map(|fv| !list.contains(fv)).unwrap_or(true),
                    CompiledOp::Gt(n) => field_value.and_then(Value::as_f64).map(|v| v > *n).unwrap_or(false),
                    CompiledOp::Gte(n) => field_value.and_then(Value::as_f64).map(|v| v >= *n).unwrap_or(false),
                    CompiledOp::Lt(n) => field_value.and_then(Value::as_f64).map(|v| v < *n).unwrap_or(false),
                    CompiledOp::Lte(n) => field_value.and_then(Value::as_f64).map(|v| v <= *n).unwrap_or(false),
                    CompiledOp::Contains(needle) => match field_value {
                        Some(Value::List(items)) => items.contains(needle),
                        Some(Value::String(s)) => {
                            needle.as_str().map(|n| s.contains(n)).unwrap_or(false)
                        }
                        _ => false,
                    },
                    CompiledOp::Regex(re) => field_value
                        .and_then(Value::as_str)
                        .map(|s| re.is_match(s))
                        .unwrap_or(false),
                    CompiledOp::Exists(want) => field_value.is_some() == *want,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compiled(raw: serde_json::Value) -> CompiledFilter {
        compile(&raw).unwrap()
    }

    fn doc(raw: serde_json::Value) -> Value {
        raw.into()
    }

    #[test]
    fn leaf_equality() {
        let f = compiled(json!({"kind": "task.assigned"}));
        assert!(f.matches(&doc(json!({"kind": "task.assigned"}))));
        assert!(!f.matches(&doc(json!({"kind": "task.failed"}))));
    }

    #[test]
    fn wildcard_matches_anything() {
        let f = compiled(json!({"kind": "*"}));
        assert!(f.matches(&doc(json!({"kind": "anything"}))));
        assert!(f.matches(&doc(json!({"other": "field"}))));
    }

    #[test]
    fn comparison_operators() {
        let f = compiled(json!({"score": {"$gte": 10}}));
        assert!(f.matches(&doc(json!({"score": 10}))));
        assert!(f.matches(&doc(json!({"score": 15}))));
        assert!(!f.matches(&doc(json!({"score": 5}))));
    }

    #[test]
    fn in_and_nin() {
        let f = compiled(json!({"status": {"$in": ["active", "busy"]}}));
        assert!(f.matches(&doc(json!({"status": "busy"}))));
        assert!(!f.matches(&doc(json!({"status": "offline"}))));
    }

    #[test]
    fn regex_operator() {
        let f = compiled(json!({"text": {"$regex": "^kubectl"}}));
        assert!(f.matches(&doc(json!({"text": "kubectl get pods"}))));
        assert!(!f.matches(&doc(json!({"text": "hello"}))));
    }

    #[test]
    fn exists_operator() {
        let f = compiled(json!({"field": {"$exists": true}}));
        assert!(f.matches(&doc(json!({"field": 1}))));
        assert!(!f.matches(&doc(json!({"other": 1}))));
    }

    #[test]
    fn composite_and_or_not() {
        let f = compiled(json!({"$and": [{"a": 1}, {"b": 2}]}));
        assert!(f.matches(&doc(json!({"a": 1, "b": 2}))));
        assert!(!f.matches(&doc(json!({"a": 1, "b": 3}))));

        let f = compiled(json!({"$or": [{"a": 1}, {"b": 2}]}));
        assert!(f.matches(&doc(json!({"a": 1, "b": 9}))));

        let f = compiled(json!({"$not": {"a": 1}}));
        assert!(f.matches(&doc(json!({"a": 2}))));
        assert!(!f.matches(&doc(json!({"a": 1}))));
    }

    #[test]
    fn contains_on_list_and_string() {
        let f = compiled(json!({"tags": {"$contains": "react"}}));
        assert!(f.matches(&doc(json!({"tags": ["react", "js"]}))));
        assert!(!f.matches(&doc(json!({"tags": ["go"]}))));

        let f = compiled(json!({"text": {"$contains": "pods"}}));
        assert!(f.matches(&doc(json!({"text": "get pods now"}))));
    }

    #[test]
    fn unknown_operator_fails_to_compile() {
        let err = compile(&json!({"field": {"$bogus": 1}})).unwrap_err();
        assert!(err.0.contains("unknown operator"));
    }
}
