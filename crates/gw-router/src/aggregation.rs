//! Parent/child task aggregation (§4.6 "Aggregation").
//!
//! Reuses [`gw_core::task::Task::aggregation_satisfied`] for the
//! wait-for-all/quorum decision; this module only adds the result
//! function applied once the decision says the parent is done.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunction {
    Sum,
    #[default]
    Merge,
    Custom,
}

/// Combine child results per the parent's configured function. `Custom`
/// is a passthrough here: a composition root wiring a real custom
/// aggregator would intercept before this point via its own tool
/// invocation; this crate has no opinion on what "custom" means beyond
/// preserving the raw child results for that caller to post-process.
pub fn aggregate_results(function: AggregateFunction, results: &[Value]) -> Value {
    match function {
        AggregateFunction::Sum => {
            let total: f64 = results.iter().filter_map(Value::as_f64).sum();
            serde_json::json!(total)
        }
        AggregateFunction::Merge | AggregateFunction::Custom => {
            serde_json::json!(results.to_vec())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_adds_numeric_child_results() {
        let results = vec![serde_json::json!(1.0), serde_json::json!(2.5), serde_json::json!(3.5)];
        assert_eq!(aggregate_results(AggregateFunction::Sum, &results), serde_json::json!(7.0));
    }

    #[test]
    fn merge_collects_results_into_a_list() {
        let results = vec![serde_json::json!({"a": 1}), serde_json::json!({"b": 2})];
        let merged = aggregate_results(AggregateFunction::Merge, &results);
        assert!(merged.is_array());
        assert_eq!(merged.as_array().unwrap().len(), 2);
    }
}
