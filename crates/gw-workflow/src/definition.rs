//! Workflow definition data model (§3, §4.7): a validated DAG of steps,
//! Kubernetes-resource-shaped like every other config type in this
//! codebase, with per-step retry, circuit breaker, checkpoint, and
//! compensation metadata.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gw_core::error::{GatewayError, GatewayResult};
use gw_core::tenant::TenantId;

use crate::template;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_type: BackoffType,
    #[serde(default)]
    pub initial_delay_ms: u64,
    #[serde(default)]
    pub max_delay_ms: u64,
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 1,
            backoff_type: BackoffType::Fixed,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter: false,
        }
    }
}

impl Default for BackoffType {
    fn default() -> Self {
        BackoffType::Fixed
    }
}

/// Per-step circuit breaker config (§4.7): `timeout_ms` bounds a single
/// attempt (enforced by the engine around the tool invocation);
/// `failure_threshold`/`reset_timeout_ms` feed `gw_core::circuit`'s shared
/// breaker, which also guards every key-value store call in `gw-cache`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StepCircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout_ms: u64,
    pub reset_timeout_ms: u64,
}

impl From<StepCircuitBreakerConfig> for gw_core::circuit::CircuitBreakerConfig {
    fn from(c: StepCircuitBreakerConfig) -> Self {
        gw_core::circuit::CircuitBreakerConfig {
            failure_threshold: c.failure_threshold,
            reset_timeout_ms: c.reset_timeout_ms,
        }
    }
}

/// What a step actually does: invoke a tool through the `ToolInvoker`
/// collaborator, instantiate a child workflow execution, or suspend and
/// wait for an external caller to supply its result via `workflow.
/// complete_task` — a one-shot external completion rather than a held-open
/// approval channel, since this crate has no UI layer of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StepKind {
    Tool { tool: String },
    SubWorkflow { workflow_id: Uuid },
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    #[serde(flatten)]
    pub kind: StepKind,
    #[serde(default = "default_arguments")]
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub depends_on: HashSet<String>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub condition: Option<serde_json::Value>,
    #[serde(default)]
    pub checkpoint: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub circuit_breaker: Option<StepCircuitBreakerConfig>,
    /// Compensating action name, declared explicitly or left to the
    /// `create -> delete` / `lock -> unlock` / `write -> restore` convention
    /// (`crate::transaction::derive_compensation`) when `None`.
    #[serde(default)]
    pub compensate: Option<String>,
}

fn default_arguments() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub tenant: TenantId,
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub transactional: bool,
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default)]
    pub generator: Option<String>,
}

impl WorkflowDefinition {
    pub fn new(tenant: TenantId, name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        WorkflowDefinition {
            id: Uuid::new_v4(),
            tenant,
            name: name.into(),
            steps,
            transactional: false,
            dynamic: false,
            generator: None,
        }
    }

    /// Parsing & validation (§4.7): rejects cycles, verifies every
    /// `$step.*`/`$parent.*` reference targets a declared step, and that
    /// every `depends_on` name exists. A `dynamic: true` definition with an
    /// empty, not-yet-materialized step list is trivially valid.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.dynamic && self.steps.is_empty() {
            return Ok(());
        }
        let ids: HashSet<&str> = self.steps.iter().map(|s| s.id.as_str()).collect();
        if ids.len() != self.steps.len() {
            return Err(GatewayError::validation("duplicate step id in workflow definition"));
        }
        for step in &self.steps {
            for dep in &step.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(GatewayError::validation(format!(
                        "step {} depends_on unknown step {dep}",
                        step.id
                    )));
                }
            }
            for reference in template::step_references(&step.arguments) {
                if reference != "parent" && !ids.contains(reference.as_str()) {
                    return Err(GatewayError::validation(format!(
                        "step {} references unknown step {reference}",
                        step.id
                    )));
                }
            }
        }
        self.topological_order()?;
        Ok(())
    }

    /// Kahn's algorithm; an `Err` return means the graph has a cycle.
    /// Deterministic (lexicographic tie-break) so two calls on the same
    /// definition always agree on ordering.
    pub fn topological_order(&self) -> GatewayResult<Vec<String>> {
        let mut indegree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for step in &self.steps {
            indegree.entry(step.id.as_str()).or_insert(0);
        }
        for step in &self.steps {
            for dep in &step.depends_on {
                *indegree.entry(step.id.as_str()).or_insert(0) += 1;
                dependents.entry(dep.as_str()).or_default().push(step.id.as_str());
            }
        }
        let mut ready: Vec<&str> = indegree.iter().filter(|(_, &d)| d == 0).map(|(k, _)| *k).collect();
        ready.sort_unstable();
        let mut order = Vec::new();
        while let Some(id) = ready.pop() {
            order.push(id.to_string());
            if let Some(deps) = dependents.get(id) {
                let mut newly_ready = Vec::new();
                for d in deps {
                    let entry = indegree.get_mut(d).expect("dependent tracked in indegree");
                    *entry -= 1;
                    if *entry == 0 {
                        newly_ready.push(*d);
                    }
                }
                newly_ready.sort_unstable();
                ready.extend(newly_ready);
            }
        }
        if order.len() != self.steps.len() {
            return Err(GatewayError::validation("workflow graph has a cycle"));
        }
        Ok(order)
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_step(id: &str, depends_on: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            kind: StepKind::Tool { tool: id.to_string() },
            arguments: json!({}),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            parallel: false,
            condition: None,
            checkpoint: false,
            retry: RetryPolicy::default(),
            circuit_breaker: None,
            compensate: None,
        }
    }

    #[test]
    fn linear_chain_validates_and_orders() {
        let def = WorkflowDefinition::new(
            TenantId::new(),
            "pipeline",
            vec![tool_step("fetch", &[]), tool_step("transform", &["fetch"]), tool_step("analyze", &["transform"])],
        );
        def.validate().unwrap();
        assert_eq!(def.topological_order().unwrap(), vec!["fetch", "transform", "analyze"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut a = tool_step("a", &["b"]);
        let b = tool_step("b", &["a"]);
        a.depends_on.insert("b".to_string());
        let def = WorkflowDefinition::new(TenantId::new(), "cyclic", vec![a, b]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn depends_on_unknown_step_is_rejected() {
        let def = WorkflowDefinition::new(TenantId::new(), "bad", vec![tool_step("a", &["ghost"])]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn argument_reference_to_unknown_step_is_rejected() {
        let mut step = tool_step("transform", &[]);
        step.arguments = json!({"input": "$fetch.result.body"});
        let def = WorkflowDefinition::new(TenantId::new(), "bad", vec![step]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn duplicate_step_ids_are_rejected() {
        let def = WorkflowDefinition::new(TenantId::new(), "dup", vec![tool_step("a", &[]), tool_step("a", &[])]);
        assert!(def.validate().is_err());
    }

    #[test]
    fn dynamic_workflow_with_no_materialized_steps_is_valid() {
        let def = WorkflowDefinition {
            id: Uuid::new_v4(),
            tenant: TenantId::new(),
            name: "dyn".into(),
            steps: vec![],
            transactional: false,
            dynamic: true,
            generator: Some("plan_steps".into()),
        };
        def.validate().unwrap();
    }
}
