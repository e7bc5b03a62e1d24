//! Gateway Workflow Engine - DAG-based orchestration of tool invocations and
//! sub-workflows (§4.7).
//!
//! Steps form a `depends_on` DAG rather than a linear chain: a step becomes
//! runnable once every dependency is `completed` or `skipped`, and a whole
//! layer of `parallel: true` steps sharing a satisfied dependency set runs
//! concurrently (bounded by `gw_core::DEFAULT_WORKFLOW_CONCURRENCY`).
//! Conditions and circuit breakers reuse `gw-core`'s shared primitives
//! instead of a bespoke string-condition parser or a second breaker
//! implementation.

pub mod checkpoint;
pub mod condition;
pub mod definition;
pub mod retry;
pub mod template;
pub mod transaction;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use gw_core::circuit::CircuitBreaker;
use gw_core::error::{GatewayError, GatewayResult};
use gw_core::tenant::TenantId;
use gw_core::ToolInvoker;
use gw_core::KeyValueStore;
use gw_core::DEFAULT_WORKFLOW_CONCURRENCY;

use definition::{StepKind, WorkflowDefinition, WorkflowStep};
use transaction::{JournalEntry, TransactionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Skipped,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub tenant: TenantId,
    pub state: ExecutionState,
    pub step_states: HashMap<String, StepState>,
    pub outputs: HashMap<String, serde_json::Value>,
    pub error: Option<String>,
}

/// Progress notifications (§6's `workflow.*` methods). Emitted narrowly
/// through this trait rather than held as an owning reference back into
/// whatever publishes them, the same composition idiom `gw-router`'s
/// `TaskEventSink` and `gw-bus`'s `DeliverySink` use.
pub trait WorkflowEventSink: Send + Sync {
    fn emit(&self, tenant: TenantId, event: WorkflowEvent);
}

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    StepStarted { execution: Uuid, step: String },
    StepCompleted { execution: Uuid, step: String },
    StepSkipped { execution: Uuid, step: String },
    StepFailed { execution: Uuid, step: String, error: String },
    SubWorkflowStarted { execution: Uuid, step: String, child: Uuid },
    SubWorkflowCompleted { execution: Uuid, step: String, child: Uuid },
    Transaction { execution: Uuid, event: TransactionEvent },
    ExecutionCompleted { execution: Uuid, state: ExecutionState },
}

pub struct NullSink;
impl WorkflowEventSink for NullSink {
    fn emit(&self, _tenant: TenantId, _event: WorkflowEvent) {}
}

/// `WorkflowEngine` owns no network transport: it is invoked directly by
/// the dispatcher (§4.2) and talks to its two external collaborators —
/// tool invocation and persistent checkpoint storage — only through the
/// narrow `ToolInvoker`/`KeyValueStore` traits defined in `gw-core`.
pub struct WorkflowEngine {
    definitions: DashMap<Uuid, WorkflowDefinition>,
    executions: DashMap<Uuid, WorkflowExecution>,
    cancel_flags: DashMap<Uuid, Arc<AtomicBool>>,
    pending_external: DashMap<(Uuid, String), oneshot::Sender<serde_json::Value>>,
    breakers: DashMap<(Uuid, String), Arc<CircuitBreaker>>,
    invoker: Arc<dyn ToolInvoker>,
    store: Arc<dyn KeyValueStore>,
    sink: Arc<dyn WorkflowEventSink>,
    checkpoint_prefix: String,
    concurrency_cap: usize,
}

impl WorkflowEngine {
    pub fn new(invoker: Arc<dyn ToolInvoker>, store: Arc<dyn KeyValueStore>, sink: Arc<dyn WorkflowEventSink>) -> Self {
        WorkflowEngine {
            definitions: DashMap::new(),
            executions: DashMap::new(),
            cancel_flags: DashMap::new(),
            pending_external: DashMap::new(),
            breakers: DashMap::new(),
            invoker,
            store,
            sink,
            checkpoint_prefix: "workflow".to_string(),
            concurrency_cap: DEFAULT_WORKFLOW_CONCURRENCY,
        }
    }

    pub fn with_concurrency_cap(mut self, cap: usize) -> Self {
        self.concurrency_cap = cap;
        self
    }

    /// `workflow.create` (§6): validates and registers a definition.
    pub fn create(&self, tenant: TenantId, name: impl Into<String>, steps: Vec<WorkflowStep>, transactional: bool) -> GatewayResult<WorkflowDefinition> {
        let mut def = WorkflowDefinition::new(tenant, name, steps);
        def.transactional = transactional;
        def.validate()?;
        self.definitions.insert(def.id, def.clone());
        Ok(def)
    }

    /// `workflow.create` with `dynamic: true` (§4.7): step list is
    /// materialized lazily on first execution by invoking `generator`.
    pub fn create_dynamic(&self, tenant: TenantId, name: impl Into<String>, generator: impl Into<String>) -> WorkflowDefinition {
        let def = WorkflowDefinition {
            id: Uuid::new_v4(),
            tenant,
            name: name.into(),
            steps: Vec::new(),
            transactional: false,
            dynamic: true,
            generator: Some(generator.into()),
        };
        self.definitions.insert(def.id, def.clone());
        def
    }

    pub fn get(&self, tenant: TenantId, id: Uuid) -> GatewayResult<WorkflowDefinition> {
        let def = self.definitions.get(&id).ok_or_else(|| GatewayError::not_found(format!("workflow {id}")))?;
        if def.tenant != tenant {
            return Err(GatewayError::not_found(format!("workflow {id}")));
        }
        Ok(def.clone())
    }

    pub fn status(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
        self.executions.get(&execution_id).map(|e| e.clone())
    }

    /// `workflow.cancel`: cooperative — the in-flight `execute` call checks
    /// this flag between dependency layers and before suspending on an
    /// `External` step, not mid-tool-invocation.
    pub fn cancel(&self, execution_id: Uuid) -> GatewayResult<()> {
        let flag = self
            .cancel_flags
            .get(&execution_id)
            .ok_or_else(|| GatewayError::not_found(format!("execution {execution_id}")))?;
        flag.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// `workflow.complete_task`: supplies the result for a running
    /// execution's `External` step, unblocking it.
    pub fn complete_task(&self, execution_id: Uuid, step_id: &str, result: serde_json::Value) -> GatewayResult<()> {
        let (_, sender) = self
            .pending_external
            .remove(&(execution_id, step_id.to_string()))
            .ok_or_else(|| GatewayError::not_found(format!("no pending external step {step_id} on execution {execution_id}")))?;
        sender.send(result).map_err(|_| GatewayError::internal("external step receiver dropped"))
    }

    /// `workflow.execute` (§4.7): materializes a dynamic definition's steps
    /// on first use, then drives the DAG to completion, returning the final
    /// execution snapshot.
    #[instrument(skip(self, initial_args), fields(tenant = %tenant, workflow = %workflow_id))]
    pub async fn execute(&self, tenant: TenantId, workflow_id: Uuid, initial_args: serde_json::Value) -> GatewayResult<WorkflowExecution> {
        let definition = self.materialize(tenant, workflow_id, &initial_args).await?;
        let execution_id = Uuid::new_v4();
        let mut outputs = HashMap::new();
        if let serde_json::Value::Object(_) = &initial_args {
            outputs.insert("input".to_string(), serde_json::json!({"result": initial_args}));
        }
        self.run(tenant, definition, execution_id, outputs, HashSet::new(), HashSet::new(), None).await
    }

    /// `workflow.resume` (§4.7): rehydrates a checkpointed execution and
    /// continues from its `pending_steps`; already-completed outputs are
    /// reused rather than re-executed.
    pub async fn resume(&self, tenant: TenantId, execution_id: Uuid) -> GatewayResult<WorkflowExecution> {
        let record = checkpoint::load(self.store.as_ref(), &self.checkpoint_prefix, tenant, execution_id)
            .await?
            .ok_or_else(|| GatewayError::not_found(format!("checkpoint {execution_id}")))?;
        let definition = self.get(tenant, record.workflow_id)?;
        self.run(tenant, definition, execution_id, record.outputs, record.completed_steps, HashSet::new(), None).await
    }

    async fn materialize(&self, tenant: TenantId, workflow_id: Uuid, initial_args: &serde_json::Value) -> GatewayResult<WorkflowDefinition> {
        let definition = self.get(tenant, workflow_id)?;
        if !definition.dynamic || !definition.steps.is_empty() {
            return Ok(definition);
        }
        let generator = definition
            .generator
            .clone()
            .ok_or_else(|| GatewayError::validation("dynamic workflow missing generator"))?;
        let generated = self.invoker.invoke(&generator, initial_args.clone()).await?;
        let steps: Vec<WorkflowStep> = serde_json::from_value(generated)
            .map_err(|e| GatewayError::validation(format!("generator produced invalid steps: {e}")))?;
        let mut materialized = definition.clone();
        materialized.steps = steps;
        materialized.validate()?;
        self.definitions.insert(materialized.id, materialized.clone());
        Ok(materialized)
    }

    fn run<'a>(
        &'a self,
        tenant: TenantId,
        definition: WorkflowDefinition,
        execution_id: Uuid,
        outputs: HashMap<String, serde_json::Value>,
        completed: HashSet<String>,
        skipped: HashSet<String>,
        parent_outputs: Option<HashMap<String, serde_json::Value>>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = GatewayResult<WorkflowExecution>> + Send + 'a>> {
        Box::pin(self.run_inner(tenant, definition, execution_id, outputs, completed, skipped, parent_outputs))
    }

    async fn run_inner(
        &self,
        tenant: TenantId,
        definition: WorkflowDefinition,
        execution_id: Uuid,
        mut outputs: HashMap<String, serde_json::Value>,
        mut completed: HashSet<String>,
        mut skipped: HashSet<String>,
        parent_outputs: Option<HashMap<String, serde_json::Value>>,
    ) -> GatewayResult<WorkflowExecution> {
        definition.validate()?;
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.cancel_flags.insert(execution_id, Arc::clone(&cancel_flag));

        let mut step_states: HashMap<String, StepState> = definition
            .steps
            .iter()
            .map(|s| {
                let state = if completed.contains(&s.id) {
                    StepState::Completed
                } else if skipped.contains(&s.id) {
                    StepState::Skipped
                } else {
                    StepState::Pending
                };
                (s.id.clone(), state)
            })
            .collect();

        self.executions.insert(
            execution_id,
            WorkflowExecution {
                id: execution_id,
                workflow_id: definition.id,
                tenant,
                state: ExecutionState::Running,
                step_states: step_states.clone(),
                outputs: outputs.clone(),
                error: None,
            },
        );

        let mut journal: Vec<JournalEntry> = Vec::new();

        let result = loop {
            if cancel_flag.load(Ordering::SeqCst) {
                for (id, state) in step_states.iter_mut() {
                    if *state == StepState::Running || *state == StepState::Pending {
                        *state = StepState::Cancelled;
                        let _ = id;
                    }
                }
                if definition.transactional {
                    self.compensate(tenant, &journal).await;
                    self.sink.emit(tenant, WorkflowEvent::Transaction { execution: execution_id, event: TransactionEvent::Rollback });
                }
                break (ExecutionState::Cancelled, None);
            }

            if completed.len() + skipped.len() == definition.steps.len() {
                if definition.transactional {
                    self.sink.emit(tenant, WorkflowEvent::Transaction { execution: execution_id, event: TransactionEvent::Commit });
                }
                break (ExecutionState::Completed, None);
            }

            let runnable: Vec<WorkflowStep> = definition
                .steps
                .iter()
                .filter(|s| !completed.contains(&s.id) && !skipped.contains(&s.id))
                .filter(|s| s.depends_on.iter().all(|d| completed.contains(d) || skipped.contains(d)))
                .cloned()
                .collect();

            if runnable.is_empty() {
                break (ExecutionState::Failed, Some("workflow stalled: no runnable steps but graph incomplete".to_string()));
            }

            let flat_doc = condition::flatten_outputs(&outputs);
            let mut to_run = Vec::new();
            for step in runnable {
                if let Some(cond) = &step.condition {
                    let compiled = gw_core::filter::compile(cond).map_err(|e| GatewayError::validation(e.to_string()))?;
                    if !compiled.matches(&flat_doc) {
                        skipped.insert(step.id.clone());
                        step_states.insert(step.id.clone(), StepState::Skipped);
                        self.sink.emit(tenant, WorkflowEvent::StepSkipped { execution: execution_id, step: step.id.clone() });
                        continue;
                    }
                }
                to_run.push(step);
            }
            if to_run.is_empty() {
                continue;
            }

            let (parallel_steps, sequential_steps): (Vec<_>, Vec<_>) = to_run.into_iter().partition(|s| s.parallel);

            let mut batch_results: Vec<(WorkflowStep, GatewayResult<serde_json::Value>)> = Vec::new();

            if !parallel_steps.is_empty() {
                for step in &parallel_steps {
                    step_states.insert(step.id.clone(), StepState::Running);
                    self.sink.emit(tenant, WorkflowEvent::StepStarted { execution: execution_id, step: step.id.clone() });
                }
                let results: Vec<(WorkflowStep, GatewayResult<serde_json::Value>)> = stream::iter(parallel_steps.into_iter().map(|step| {
                    let outputs_ref = &outputs;
                    let parent_ref = parent_outputs.as_ref();
                    let cancel_ref = &cancel_flag;
                    async move {
                        let result = self.execute_step(tenant, execution_id, &definition, &step, outputs_ref, parent_ref, cancel_ref).await;
                        (step, result)
                    }
                }))
                .buffer_unordered(self.concurrency_cap)
                .collect()
                .await;
                batch_results.extend(results);
            }

            let mut sequential_sorted = sequential_steps;
            sequential_sorted.sort_by(|a, b| a.id.cmp(&b.id));
            for step in sequential_sorted {
                step_states.insert(step.id.clone(), StepState::Running);
                self.sink.emit(tenant, WorkflowEvent::StepStarted { execution: execution_id, step: step.id.clone() });
                let result = self.execute_step(tenant, execution_id, &definition, &step, &outputs, parent_outputs.as_ref(), &cancel_flag).await;
                batch_results.push((step, result));
            }

            let mut batch_failed: Option<String> = None;
            for (step, result) in batch_results {
                match result {
                    Ok(value) => {
                        outputs.insert(step.id.clone(), serde_json::json!({"result": value}));
                        completed.insert(step.id.clone());
                        step_states.insert(step.id.clone(), StepState::Completed);
                        self.sink.emit(tenant, WorkflowEvent::StepCompleted { execution: execution_id, step: step.id.clone() });
                        if definition.transactional {
                            let compensate = step.compensate.clone().or_else(|| match &step.kind {
                                StepKind::Tool { tool } => transaction::derive_compensation(tool),
                                _ => None,
                            });
                            journal.push(JournalEntry { step_id: step.id.clone(), compensate, output: value });
                        }
                        if step.checkpoint {
                            let pending: HashSet<String> = definition
                                .steps
                                .iter()
                                .map(|s| s.id.clone())
                                .filter(|id| !completed.contains(id) && !skipped.contains(id))
                                .collect();
                            let record = checkpoint::CheckpointRecord {
                                execution_id,
                                workflow_id: definition.id,
                                tenant,
                                completed_steps: completed.clone(),
                                outputs: outputs.clone(),
                                pending_steps: pending,
                            };
                            if let Err(e) = checkpoint::save(self.store.as_ref(), &self.checkpoint_prefix, &record).await {
                                warn!(tenant = %tenant, execution = %execution_id, error = %e, "failed to persist checkpoint");
                            }
                        }
                    }
                    Err(e) => {
                        step_states.insert(step.id.clone(), StepState::Failed);
                        self.sink.emit(tenant, WorkflowEvent::StepFailed { execution: execution_id, step: step.id.clone(), error: e.to_string() });
                        batch_failed = Some(e.to_string());
                        break;
                    }
                }
            }

            if let Some(error) = batch_failed {
                if definition.transactional {
                    self.compensate(tenant, &journal).await;
                    self.sink.emit(tenant, WorkflowEvent::Transaction { execution: execution_id, event: TransactionEvent::Rollback });
                }
                break (ExecutionState::Failed, Some(error));
            }
        };

        self.cancel_flags.remove(&execution_id);
        let (state, error) = result;
        self.sink.emit(tenant, WorkflowEvent::ExecutionCompleted { execution: execution_id, state });
        let execution = WorkflowExecution {
            id: execution_id,
            workflow_id: definition.id,
            tenant,
            state,
            step_states,
            outputs,
            error,
        };
        self.executions.insert(execution_id, execution.clone());
        info!(tenant = %tenant, execution = %execution_id, ?state, "workflow execution finished");
        Ok(execution)
    }

    async fn execute_step<'a>(
        &'a self,
        tenant: TenantId,
        execution_id: Uuid,
        definition: &'a WorkflowDefinition,
        step: &'a WorkflowStep,
        outputs: &'a HashMap<String, serde_json::Value>,
        parent_outputs: Option<&'a HashMap<String, serde_json::Value>>,
        cancel_flag: &'a Arc<AtomicBool>,
    ) -> GatewayResult<serde_json::Value> {
        let args = template::resolve(&step.arguments, outputs, parent_outputs);
        match &step.kind {
            StepKind::Tool { .. } => self.invoke_with_policy(definition.id, step, args).await,
            StepKind::External => self.wait_external(execution_id, &step.id, cancel_flag).await,
            StepKind::SubWorkflow { workflow_id } => {
                let child_def = self.get(tenant, *workflow_id)?;
                let child_id = Uuid::new_v4();
                self.sink.emit(tenant, WorkflowEvent::SubWorkflowStarted { execution: execution_id, step: step.id.clone(), child: child_id });
                let child_exec = self.run(tenant, child_def, child_id, HashMap::new(), HashSet::new(), HashSet::new(), Some(outputs.clone())).await?;
                self.sink.emit(tenant, WorkflowEvent::SubWorkflowCompleted { execution: execution_id, step: step.id.clone(), child: child_id });
                if child_exec.state != ExecutionState::Completed {
                    return Err(GatewayError::upstream_failed(format!(
                        "sub-workflow {child_id} ended in state {:?}",
                        child_exec.state
                    )));
                }
                Ok(serde_json::json!({"execution_id": child_id, "outputs": child_exec.outputs}))
            }
        }
    }

    async fn wait_external(&self, execution_id: Uuid, step_id: &str, cancel_flag: &Arc<AtomicBool>) -> GatewayResult<serde_json::Value> {
        let (tx, mut rx) = oneshot::channel();
        self.pending_external.insert((execution_id, step_id.to_string()), tx);
        loop {
            tokio::select! {
                res = &mut rx => {
                    return res.map_err(|_| GatewayError::OperationCancelled);
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {
                    if cancel_flag.load(Ordering::SeqCst) {
                        self.pending_external.remove(&(execution_id, step_id.to_string()));
                        return Err(GatewayError::OperationCancelled);
                    }
                }
            }
        }
    }

    fn breaker_for(&self, workflow_id: Uuid, step: &WorkflowStep) -> Option<Arc<CircuitBreaker>> {
        let cfg = step.circuit_breaker?;
        let key = (workflow_id, step.id.clone());
        Some(Arc::clone(
            self.breakers.entry(key).or_insert_with(|| Arc::new(CircuitBreaker::new(cfg.into()))).value(),
        ))
    }

    /// Invokes a tool step with circuit-breaking and retry-with-backoff
    /// applied around it. Only `GatewayError::is_transient()` failures are
    /// retried (§7 propagation policy); everything else surfaces
    /// immediately regardless of remaining attempts.
    async fn invoke_with_policy(&self, workflow_id: Uuid, step: &WorkflowStep, args: serde_json::Value) -> GatewayResult<serde_json::Value> {
        let StepKind::Tool { tool } = &step.kind else {
            return Err(GatewayError::internal("invoke_with_policy called on a non-tool step"));
        };
        let breaker = self.breaker_for(workflow_id, step);
        let mut attempt = 0u32;
        loop {
            if let Some(breaker) = &breaker {
                if !breaker.allow() {
                    return Err(GatewayError::circuit_open(format!("step {}", step.id)));
                }
            }

            let call = self.invoker.invoke(tool, args.clone());
            let result = if let Some(cfg) = step.circuit_breaker {
                match tokio::time::timeout(std::time::Duration::from_millis(cfg.timeout_ms), call).await {
                    Ok(r) => r,
                    Err(_) => Err(GatewayError::timeout(format!("step {} exceeded {}ms", step.id, cfg.timeout_ms))),
                }
            } else {
                call.await
            };

            match result {
                Ok(v) => {
                    if let Some(breaker) = &breaker {
                        breaker.on_success();
                    }
                    return Ok(v);
                }
                Err(e) => {
                    if let Some(breaker) = &breaker {
                        breaker.on_failure();
                    }
                    attempt += 1;
                    if !e.is_transient() || attempt >= step.retry.max_attempts {
                        return Err(e);
                    }
                    let delay = retry::delay_for_attempt(&step.retry, attempt - 1);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn compensate(&self, tenant: TenantId, journal: &[JournalEntry]) {
        for entry in journal.iter().rev() {
            let Some(tool) = &entry.compensate else { continue };
            let args = serde_json::json!({"step": entry.step_id, "original_output": entry.output});
            if let Err(e) = self.invoker.invoke(tool, args).await {
                warn!(tenant = %tenant, step = %entry.step_id, tool = %tool, error = %e, "compensation action failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use definition::{RetryPolicy, StepCircuitBreakerConfig};
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<WorkflowEvent>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            RecordingSink { events: Mutex::new(Vec::new()) }
        }
    }

    impl WorkflowEventSink for RecordingSink {
        fn emit(&self, _tenant: TenantId, event: WorkflowEvent) {
            self.events.try_lock().unwrap().push(event);
        }
    }

    struct EchoInvoker;
    #[async_trait]
    impl ToolInvoker for EchoInvoker {
        async fn invoke(&self, _tool: &str, args: serde_json::Value) -> GatewayResult<serde_json::Value> {
            Ok(args)
        }
    }

    /// Fails its first `fail_times` invocations with a transient error,
    /// then succeeds, so tests can exercise the retry path deterministically.
    struct FlakyInvoker {
        fail_times: u32,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl ToolInvoker for FlakyInvoker {
        async fn invoke(&self, _tool: &str, args: serde_json::Value) -> GatewayResult<serde_json::Value> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(GatewayError::upstream_failed("flaky upstream"))
            } else {
                Ok(args)
            }
        }
    }

    struct AlwaysFailsInvoker;
    #[async_trait]
    impl ToolInvoker for AlwaysFailsInvoker {
        async fn invoke(&self, tool: &str, _args: serde_json::Value) -> GatewayResult<serde_json::Value> {
            Err(GatewayError::upstream_failed(format!("{tool} always fails")))
        }
    }

    fn tool_step(id: &str, depends_on: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            kind: StepKind::Tool { tool: id.to_string() },
            arguments: serde_json::json!({}),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            parallel: false,
            condition: None,
            checkpoint: false,
            retry: RetryPolicy::default(),
            circuit_breaker: None,
            compensate: None,
        }
    }

    fn engine(invoker: Arc<dyn ToolInvoker>) -> WorkflowEngine {
        WorkflowEngine::new(invoker, Arc::new(gw_core::InMemoryStore::new()), Arc::new(NullSink))
    }

    #[tokio::test]
    async fn executes_linear_chain_in_dependency_order() {
        let engine = engine(Arc::new(EchoInvoker));
        let tenant = TenantId::new();
        let mut step_b = tool_step("b", &["a"]);
        step_b.arguments = serde_json::json!({"seen": "$a.result.value"});
        let def = engine.create(tenant, "pipeline", vec![
            { let mut a = tool_step("a", &[]); a.arguments = serde_json::json!({"value": 1}); a },
            step_b,
        ], false).unwrap();

        let exec = engine.execute(tenant, def.id, serde_json::json!({})).await.unwrap();
        assert_eq!(exec.state, ExecutionState::Completed);
        assert_eq!(exec.outputs["b"]["result"]["seen"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn parallel_steps_both_complete() {
        let engine = engine(Arc::new(EchoInvoker));
        let tenant = TenantId::new();
        let mut left = tool_step("left", &[]);
        left.parallel = true;
        let mut right = tool_step("right", &[]);
        right.parallel = true;
        let def = engine.create(tenant, "fanout", vec![left, right], false).unwrap();
        let exec = engine.execute(tenant, def.id, serde_json::json!({})).await.unwrap();
        assert_eq!(exec.state, ExecutionState::Completed);
        assert_eq!(exec.step_states["left"], StepState::Completed);
        assert_eq!(exec.step_states["right"], StepState::Completed);
    }

    #[tokio::test]
    async fn false_condition_skips_step() {
        let engine = engine(Arc::new(EchoInvoker));
        let tenant = TenantId::new();
        let mut a = tool_step("a", &[]);
        a.arguments = serde_json::json!({"ok": false});
        let mut b = tool_step("b", &["a"]);
        b.condition = Some(serde_json::json!({"a.result.ok": true}));
        let def = engine.create(tenant, "conditional", vec![a, b], false).unwrap();
        let exec = engine.execute(tenant, def.id, serde_json::json!({})).await.unwrap();
        assert_eq!(exec.state, ExecutionState::Completed);
        assert_eq!(exec.step_states["b"], StepState::Skipped);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_until_success() {
        let invoker = Arc::new(FlakyInvoker { fail_times: 2, attempts: AtomicU32::new(0) });
        let engine = engine(invoker);
        let tenant = TenantId::new();
        let mut a = tool_step("a", &[]);
        a.retry = RetryPolicy { max_attempts: 5, backoff_type: definition::BackoffType::Fixed, initial_delay_ms: 1, max_delay_ms: 0, jitter: false };
        let def = engine.create(tenant, "retrying", vec![a], false).unwrap();
        let exec = engine.execute(tenant, def.id, serde_json::json!({})).await.unwrap();
        assert_eq!(exec.state, ExecutionState::Completed);
    }

    #[tokio::test]
    async fn non_transient_failure_is_not_retried() {
        struct ValidationFailingInvoker;
        #[async_trait]
        impl ToolInvoker for ValidationFailingInvoker {
            async fn invoke(&self, _tool: &str, _args: serde_json::Value) -> GatewayResult<serde_json::Value> {
                Err(GatewayError::validation("bad input"))
            }
        }
        let engine = engine(Arc::new(ValidationFailingInvoker));
        let tenant = TenantId::new();
        let mut a = tool_step("a", &[]);
        a.retry = RetryPolicy { max_attempts: 5, backoff_type: definition::BackoffType::Fixed, initial_delay_ms: 1, max_delay_ms: 0, jitter: false };
        let def = engine.create(tenant, "novalid", vec![a], false).unwrap();
        let exec = engine.execute(tenant, def.id, serde_json::json!({})).await.unwrap();
        assert_eq!(exec.state, ExecutionState::Failed);
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_and_blocks_call() {
        let engine = engine(Arc::new(AlwaysFailsInvoker));
        let tenant = TenantId::new();
        let mut a = tool_step("a", &[]);
        a.circuit_breaker = Some(StepCircuitBreakerConfig { failure_threshold: 1, timeout_ms: 1000, reset_timeout_ms: 60_000 });

        let def1 = engine.create(tenant, "wf1", vec![a.clone()], false).unwrap();
        let exec1 = engine.execute(tenant, def1.id, serde_json::json!({})).await.unwrap();
        assert_eq!(exec1.state, ExecutionState::Failed);

        // Same (workflow_id, step_id) breaker key should now be open for a
        // second execution of the same definition.
        let exec2 = engine.execute(tenant, def1.id, serde_json::json!({})).await.unwrap();
        assert_eq!(exec2.state, ExecutionState::Failed);
        assert!(exec2.error.unwrap().contains("circuit open"));
    }

    #[tokio::test]
    async fn transactional_failure_runs_compensation_in_reverse_order() {
        struct CompensationTrackingInvoker {
            calls: Mutex<Vec<String>>,
        }
        #[async_trait]
        impl ToolInvoker for CompensationTrackingInvoker {
            async fn invoke(&self, tool: &str, _args: serde_json::Value) -> GatewayResult<serde_json::Value> {
                self.calls.lock().await.push(tool.to_string());
                if tool == "fail_me" {
                    return Err(GatewayError::validation("boom"));
                }
                Ok(serde_json::json!({"ok": true}))
            }
        }
        let invoker = Arc::new(CompensationTrackingInvoker { calls: Mutex::new(Vec::new()) });
        let engine = engine(invoker.clone());
        let tenant = TenantId::new();

        let step_a = WorkflowStep { id: "a".into(), kind: StepKind::Tool { tool: "create_resource".into() }, arguments: serde_json::json!({}), depends_on: HashSet::new(), parallel: false, condition: None, checkpoint: false, retry: RetryPolicy::default(), circuit_breaker: None, compensate: None };
        let step_b = WorkflowStep { id: "b".into(), kind: StepKind::Tool { tool: "fail_me".into() }, arguments: serde_json::json!({}), depends_on: ["a".to_string()].into_iter().collect(), parallel: false, condition: None, checkpoint: false, retry: RetryPolicy::default(), circuit_breaker: None, compensate: None };

        let def = engine.create(tenant, "transactional", vec![step_a, step_b], true).unwrap();
        let exec = engine.execute(tenant, def.id, serde_json::json!({})).await.unwrap();
        assert_eq!(exec.state, ExecutionState::Failed);

        let calls = invoker.calls.lock().await.clone();
        assert_eq!(calls, vec!["create_resource", "fail_me", "delete_resource"]);
    }

    #[tokio::test]
    async fn sub_workflow_runs_child_and_exposes_parent_outputs() {
        let engine = engine(Arc::new(EchoInvoker));
        let tenant = TenantId::new();

        let mut parent_step = tool_step("fetch", &[]);
        parent_step.arguments = serde_json::json!({"threshold": 10});

        let child_step = WorkflowStep {
            id: "inner".into(),
            kind: StepKind::Tool { tool: "inner".into() },
            arguments: serde_json::json!({"seen": "$parent.fetch.result.threshold"}),
            depends_on: HashSet::new(),
            parallel: false,
            condition: None,
            checkpoint: false,
            retry: RetryPolicy::default(),
            circuit_breaker: None,
            compensate: None,
        };
        let child = engine.create(tenant, "child", vec![child_step], false).unwrap();

        let sub_step = WorkflowStep {
            id: "call_child".into(),
            kind: StepKind::SubWorkflow { workflow_id: child.id },
            arguments: serde_json::json!({}),
            depends_on: ["fetch".to_string()].into_iter().collect(),
            parallel: false,
            condition: None,
            checkpoint: false,
            retry: RetryPolicy::default(),
            circuit_breaker: None,
            compensate: None,
        };
        let parent = engine.create(tenant, "parent", vec![parent_step, sub_step], false).unwrap();

        let exec = engine.execute(tenant, parent.id, serde_json::json!({})).await.unwrap();
        assert_eq!(exec.state, ExecutionState::Completed);
        let child_outputs = &exec.outputs["call_child"]["result"]["outputs"];
        assert_eq!(child_outputs["inner"]["result"]["seen"], serde_json::json!(10));
    }

    #[tokio::test]
    async fn checkpoint_then_resume_reuses_completed_outputs() {
        let engine = engine(Arc::new(EchoInvoker));
        let tenant = TenantId::new();
        let mut a = tool_step("a", &[]);
        a.checkpoint = true;
        a.arguments = serde_json::json!({"value": 7});
        let b = tool_step("b", &["a"]);
        let def = engine.create(tenant, "checkpointed", vec![a, b], false).unwrap();

        let exec = engine.execute(tenant, def.id, serde_json::json!({})).await.unwrap();
        assert_eq!(exec.state, ExecutionState::Completed);

        let resumed = engine.resume(tenant, exec.id).await.unwrap();
        assert_eq!(resumed.state, ExecutionState::Completed);
        assert_eq!(resumed.outputs["a"]["result"]["value"], serde_json::json!(7));
    }

    #[tokio::test]
    async fn complete_task_unblocks_an_external_step() {
        let engine = Arc::new(engine(Arc::new(EchoInvoker)));
        let tenant = TenantId::new();
        let external = WorkflowStep {
            id: "approve".into(),
            kind: StepKind::External,
            arguments: serde_json::json!({}),
            depends_on: HashSet::new(),
            parallel: false,
            condition: None,
            checkpoint: false,
            retry: RetryPolicy::default(),
            circuit_breaker: None,
            compensate: None,
        };
        let def = engine.create(tenant, "human_in_loop", vec![external], false).unwrap();

        let engine_clone = Arc::clone(&engine);
        let workflow_id = def.id;
        let completer = tokio::spawn(async move {
            loop {
                if engine_clone.complete_task_if_pending(workflow_id, "approve").await {
                    break;
                }
            }
        });

        let exec = engine.execute(tenant, def.id, serde_json::json!({})).await.unwrap();
        completer.abort();
        assert_eq!(exec.state, ExecutionState::Completed);
        assert_eq!(exec.outputs["approve"]["result"], serde_json::json!({"approved": true}));
    }

    impl WorkflowEngine {
        /// Test helper: polls for a pending external step across the
        /// workflow's (as-yet-unknown) execution id and completes it once
        /// found, since the test has no other way to learn the execution
        /// id before `execute` returns.
        async fn complete_task_if_pending(&self, _workflow_id: Uuid, step_id: &str) -> bool {
            let key = self.pending_external.iter().find(|e| e.key().1 == step_id).map(|e| e.key().0);
            if let Some(execution_id) = key {
                let _ = self.complete_task(execution_id, step_id, serde_json::json!({"approved": true}));
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            false
        }
    }
}
