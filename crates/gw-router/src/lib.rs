// Gateway Router - the Task Router (§4.6).
//
// Owns the task table and drives capability-match assignment, manual
// delegation, failover of running tasks whose agent disappears, and
// parent/child aggregation. Talks to the Agent Registry (`gw-core`)
// read-only through its public API and never holds a reference back
// into the Event Bus or session layer: progress notifications go out
// through the narrow `TaskEventSink` trait a composition root wires to
// whatever actually publishes them (§9 message-passing composition).

pub mod aggregation;
pub mod assignment;
pub mod failover;

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use gw_core::agent::AgentRegistry;
use gw_core::error::{GatewayError, GatewayResult};
use gw_core::task::{AggregationPolicy, Task, TaskRequirements, TaskState};
use gw_core::tenant::TenantId;
use tracing::{info, warn};
use uuid::Uuid;

pub use aggregation::AggregateFunction;
pub use failover::FailoverPolicy;

/// Progress/lifecycle events the router reports outward. A composition
/// root maps these onto `gw-bus` publishes and/or direct session sends.
#[derive(Debug, Clone)]
pub enum RouterEvent {
    Assigned { task: Uuid, agent: Uuid },
    StateChanged { task: Uuid, state: TaskState },
    Progress { parent: Uuid, completed: usize, total: usize },
}

pub trait TaskEventSink: Send + Sync {
    fn emit(&self, tenant: TenantId, event: RouterEvent);
}

pub struct NullSink;
impl TaskEventSink for NullSink {
    fn emit(&self, _tenant: TenantId, _event: RouterEvent) {}
}

pub struct TaskRouter {
    tasks: DashMap<Uuid, Task>,
    aggregate_fns: DashMap<Uuid, AggregateFunction>,
    registry: Arc<AgentRegistry>,
    sink: Arc<dyn TaskEventSink>,
    failover_policy: FailoverPolicy,
}

impl TaskRouter {
    pub fn new(registry: Arc<AgentRegistry>, sink: Arc<dyn TaskEventSink>) -> Self {
        TaskRouter {
            tasks: DashMap::new(),
            aggregate_fns: DashMap::new(),
            registry,
            sink,
            failover_policy: FailoverPolicy::default(),
        }
    }

    pub fn with_failover_policy(mut self, policy: FailoverPolicy) -> Self {
        self.failover_policy = policy;
        self
    }

    pub fn get(&self, id: Uuid) -> GatewayResult<Task> {
        self.tasks.get(&id).map(|t| t.clone()).ok_or_else(|| GatewayError::not_found(format!("task {id}")))
    }

    /// `task.create`: enqueues a task without attempting assignment.
    pub fn create(
        &self,
        tenant: TenantId,
        task_type: impl Into<String>,
        requirements: TaskRequirements,
        payload: serde_json::Value,
        parent_task: Option<Uuid>,
    ) -> Task {
        let mut task = Task::new(tenant, task_type, requirements, payload);
        task.parent_task = parent_task;
        let id = task.id;
        if let Some(parent_id) = parent_task {
            if let Some(mut parent) = self.tasks.get_mut(&parent_id) {
                parent.children.push(id);
            }
        }
        self.tasks.insert(id, task.clone());
        task
    }

    /// `task.create_auto_assign`: create then immediately attempt
    /// capability-match assignment (§4.6).
    pub fn create_auto_assign(
        &self,
        tenant: TenantId,
        task_type: impl Into<String>,
        requirements: TaskRequirements,
        payload: serde_json::Value,
    ) -> Task {
        let task = self.create(tenant, task_type, requirements, payload, None);
        self.try_assign(task.id);
        self.get(task.id).unwrap_or(task)
    }

    /// `task.create_distributed`: a parent task carrying an aggregation
    /// policy and result function; children are attached afterward via
    /// ordinary `create` calls with `parent_task` set.
    pub fn create_distributed(
        &self,
        tenant: TenantId,
        task_type: impl Into<String>,
        payload: serde_json::Value,
        aggregation: AggregationPolicy,
        function: AggregateFunction,
    ) -> Task {
        let mut task = Task::new(tenant, task_type, TaskRequirements::default(), payload);
        task.aggregation = Some(aggregation);
        let id = task.id;
        self.aggregate_fns.insert(id, function);
        self.tasks.insert(id, task.clone());
        task
    }

    /// Attempts capability-match assignment for a `created` task. No-op
    /// (and no error) if no candidate currently qualifies; the task stays
    /// queued and is retried by [`TaskRouter::retry_queued`].
    fn try_assign(&self, task_id: Uuid) {
        let Some(task) = self.tasks.get(&task_id).map(|t| t.clone()) else { return };
        if task.state != TaskState::Created {
            return;
        }
        let Some(candidate) = assignment::pick_candidate(&self.registry, &task) else {
            return;
        };
        if let Some(mut entry) = self.tasks.get_mut(&task_id) {
            if entry.transition(TaskState::Assigned).is_ok() {
                entry.assigned_agent = Some(candidate.id);
                entry.last_assigned_at = Some(Utc::now());
                info!(task = %task_id, agent = %candidate.id, "task assigned");
                self.sink.emit(task.tenant, RouterEvent::Assigned { task: task_id, agent: candidate.id });
            }
        }
    }

    /// Re-attempts assignment for every `created` task of a tenant;
    /// called after an agent status change introduces a new candidate.
    pub fn retry_queued(&self, tenant: TenantId) {
        let queued: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|e| e.tenant == tenant && e.state == TaskState::Created)
            .map(|e| e.id)
            .collect();
        for id in queued {
            self.try_assign(id);
        }
    }

    /// `task.delegate`: explicit reassignment by a caller in the same
    /// tenant as the task.
    pub fn delegate(&self, task_id: Uuid, caller_tenant: TenantId, target_agent: Uuid) -> GatewayResult<()> {
        let mut entry = self.tasks.get_mut(&task_id).ok_or_else(|| GatewayError::not_found(format!("task {task_id}")))?;
        if entry.tenant != caller_tenant {
            return Err(GatewayError::unauthorized("delegate across tenants"));
        }
        match entry.state {
            TaskState::Created => entry.transition(TaskState::Assigned)?,
            TaskState::Running => entry.transition(TaskState::Assigned)?,
            TaskState::Assigned => {}
            other => return Err(GatewayError::conflict(format!("task in state {other:?} cannot be delegated"))),
        }
        entry.assigned_agent = Some(target_agent);
        entry.last_assigned_at = Some(Utc::now());
        let tenant = entry.tenant;
        drop(entry);
        self.sink.emit(tenant, RouterEvent::Assigned { task: task_id, agent: target_agent });
        Ok(())
    }

    /// `task.accept`: the assigned agent accepts and begins running the
    /// task (the state machine has no separate "start" op, so accept
    /// carries the task through `accepted` into `running` in one call).
    pub fn accept(&self, task_id: Uuid, agent_id: Uuid) -> GatewayResult<()> {
        let mut entry = self.tasks.get_mut(&task_id).ok_or_else(|| GatewayError::not_found(format!("task {task_id}")))?;
        if entry.assigned_agent != Some(agent_id) {
            return Err(GatewayError::unauthorized("agent not assigned to this task"));
        }
        entry.transition(TaskState::Accepted)?;
        entry.transition(TaskState::Running)?;
        let tenant = entry.tenant;
        drop(entry);
        self.sink.emit(tenant, RouterEvent::StateChanged { task: task_id, state: TaskState::Running });
        Ok(())
    }

    /// `task.complete`: the assigned agent reports success. Propagates
    /// aggregation to the parent, if any.
    pub fn complete(&self, task_id: Uuid, agent_id: Uuid, result: serde_json::Value) -> GatewayResult<()> {
        let (tenant, parent) = {
            let mut entry = self.tasks.get_mut(&task_id).ok_or_else(|| GatewayError::not_found(format!("task {task_id}")))?;
            if entry.assigned_agent != Some(agent_id) {
                return Err(GatewayError::unauthorized("agent not assigned to this task"));
            }
            entry.transition(TaskState::Completed)?;
            entry.result = Some(result);
            (entry.tenant, entry.parent_task)
        };
        self.sink.emit(tenant, RouterEvent::StateChanged { task: task_id, state: TaskState::Completed });
        if let Some(parent_id) = parent {
            self.check_aggregation(parent_id);
        }
        Ok(())
    }

    /// `task.fail`: the assigned agent reports a terminal failure (not
    /// retried — distinct from the router-driven failover path below,
    /// which is reserved for agent loss/deadline elapse).
    pub fn fail(&self, task_id: Uuid, agent_id: Uuid, reason: impl Into<String>) -> GatewayResult<()> {
        let (tenant, parent) = {
            let mut entry = self.tasks.get_mut(&task_id).ok_or_else(|| GatewayError::not_found(format!("task {task_id}")))?;
            if entry.assigned_agent != Some(agent_id) {
                return Err(GatewayError::unauthorized("agent not assigned to this task"));
            }
            entry.transition(TaskState::Failed)?;
            entry.result = Some(serde_json::json!({"error": reason.into()}));
            (entry.tenant, entry.parent_task)
        };
        warn!(task = %task_id, "task reported failure");
        self.sink.emit(tenant, RouterEvent::StateChanged { task: task_id, state: TaskState::Failed });
        if let Some(parent_id) = parent {
            self.check_aggregation(parent_id);
        }
        Ok(())
    }

    /// `task.cancel`.
    pub fn cancel(&self, task_id: Uuid, caller_tenant: TenantId) -> GatewayResult<()> {
        let mut entry = self.tasks.get_mut(&task_id).ok_or_else(|| GatewayError::not_found(format!("task {task_id}")))?;
        if entry.tenant != caller_tenant {
            return Err(GatewayError::unauthorized("cancel across tenants"));
        }
        entry.transition(TaskState::Cancelled)?;
        let tenant = entry.tenant;
        drop(entry);
        self.sink.emit(tenant, RouterEvent::StateChanged { task: task_id, state: TaskState::Cancelled });
        Ok(())
    }

    /// `task.submit_result` for a distributed subtask: records the
    /// child's completion (already transitioned via [`TaskRouter::complete`])
    /// and checks whether the parent's aggregation policy is now satisfied.
    pub fn submit_sub_result(&self, parent_id: Uuid, child_id: Uuid) -> GatewayResult<()> {
        let child_state = self.tasks.get(&child_id).ok_or_else(|| GatewayError::not_found(format!("task {child_id}")))?.state;
        if !child_state.is_terminal() {
            return Err(GatewayError::validation("child task has not reached a terminal state"));
        }
        self.check_aggregation(parent_id);
        Ok(())
    }

    fn check_aggregation(&self, parent_id: Uuid) {
        let Some(parent) = self.tasks.get(&parent_id).map(|t| t.clone()) else { return };
        if parent.children.is_empty() {
            return;
        }
        let child_states: Vec<TaskState> = parent
            .children
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|t| t.state))
            .collect();

        let completed = child_states.iter().filter(|s| **s == TaskState::Completed).count();
        self.sink.emit(
            parent.tenant,
            RouterEvent::Progress { parent: parent_id, completed, total: parent.children.len() },
        );

        if !parent.aggregation_satisfied(&child_states) {
            return;
        }

        let results: Vec<serde_json::Value> = parent
            .children
            .iter()
            .filter_map(|id| self.tasks.get(id).and_then(|t| t.result.clone()))
            .collect();
        let function = self.aggregate_fns.get(&parent_id).map(|f| *f).unwrap_or_default();
        let aggregated = aggregation::aggregate_results(function, &results);

        if let Some(mut entry) = self.tasks.get_mut(&parent_id) {
            if entry.state == TaskState::Running && entry.transition(TaskState::Completed).is_ok() {
                entry.result = Some(aggregated);
                self.sink.emit(parent.tenant, RouterEvent::StateChanged { task: parent_id, state: TaskState::Completed });
            }
        }
    }

    /// Failover entry point: called by the composition root when the
    /// agent registry reports an agent gone offline. Reassigns every
    /// `running` task bound to that agent, per `failover_policy`.
    pub fn handle_agent_offline(&self, agent_id: Uuid) {
        let affected: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|e| e.state == TaskState::Running && e.assigned_agent == Some(agent_id))
            .map(|e| e.id)
            .collect();
        for id in affected {
            self.reassign_or_fail(id);
        }
    }

    /// Deadline sweep: called periodically by the composition root for
    /// tasks whose `requirements.deadline` has elapsed while `running`.
    pub fn sweep_deadlines(&self) {
        let now = Utc::now();
        let expired: Vec<Uuid> = self
            .tasks
            .iter()
            .filter(|e| e.state == TaskState::Running && e.requirements.deadline.map(|d| now >= d).unwrap_or(false))
            .map(|e| e.id)
            .collect();
        for id in expired {
            self.reassign_or_fail(id);
        }
    }

    fn reassign_or_fail(&self, task_id: Uuid) {
        let Some(task) = self.tasks.get(&task_id).map(|t| t.clone()) else { return };
        match failover::decide(self.failover_policy, task.attempts) {
            failover::FailoverOutcome::Reassign => {
                if let Some(mut entry) = self.tasks.get_mut(&task_id) {
                    if entry.transition(TaskState::Assigned).is_ok() {
                        entry.attempts += 1;
                        entry.assigned_agent = None;
                    }
                }
                if let Some(candidate) = assignment::pick_candidate(&self.registry, &task) {
                    if let Some(mut entry) = self.tasks.get_mut(&task_id) {
                        entry.assigned_agent = Some(candidate.id);
                        entry.last_assigned_at = Some(Utc::now());
                    }
                    self.sink.emit(task.tenant, RouterEvent::Assigned { task: task_id, agent: candidate.id });
                } else if let Some(mut entry) = self.tasks.get_mut(&task_id) {
                    let _ = entry.transition(TaskState::Created);
                }
            }
            failover::FailoverOutcome::Exhausted => {
                if let Some(mut entry) = self.tasks.get_mut(&task_id) {
                    if entry.transition(TaskState::Failed).is_ok() {
                        warn!(task = %task_id, "failover attempts exhausted, task failed");
                    }
                }
                if let Some(parent_id) = task.parent_task {
                    self.check_aggregation(parent_id);
                }
                self.sink.emit(task.tenant, RouterEvent::StateChanged { task: task_id, state: TaskState::Failed });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_core::session::SessionId;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<RouterEvent>>,
    }
    impl TaskEventSink for CollectingSink {
        fn emit(&self, _tenant: TenantId, event: RouterEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    fn caps(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn router() -> (TaskRouter, Arc<AgentRegistry>, Arc<CollectingSink>) {
        let registry = Arc::new(AgentRegistry::new());
        let sink = Arc::new(CollectingSink::default());
        (TaskRouter::new(registry.clone(), sink.clone()), registry, sink)
    }

    #[test]
    fn auto_assign_picks_a_capable_agent() {
        let (router, registry, _sink) = router();
        let tenant = TenantId::new();
        registry.register(tenant, "frontend-dev".into(), caps(&["react", "js"]), "dev".into(), SessionId::new());

        let task = router.create_auto_assign(
            tenant,
            "build",
            TaskRequirements { capabilities: caps(&["react"]), ..Default::default() },
            serde_json::Value::Null,
        );
        assert_eq!(task.state, TaskState::Assigned);
        assert!(task.assigned_agent.is_some());
    }

    #[test]
    fn auto_assign_with_no_candidate_stays_queued_then_retries() {
        let (router, registry, _sink) = router();
        let tenant = TenantId::new();

        let task = router.create_auto_assign(
            tenant,
            "build",
            TaskRequirements { capabilities: caps(&["rust"]), ..Default::default() },
            serde_json::Value::Null,
        );
        assert_eq!(task.state, TaskState::Created);

        registry.register(tenant, "rustacean".into(), caps(&["rust"]), "dev".into(), SessionId::new());
        router.retry_queued(tenant);
        assert_eq!(router.get(task.id).unwrap().state, TaskState::Assigned);
    }

    #[test]
    fn accept_complete_lifecycle() {
        let (router, registry, _sink) = router();
        let tenant = TenantId::new();
        let change = registry.register(tenant, "w".into(), caps(&["x"]), "r".into(), SessionId::new());

        let task = router.create_auto_assign(tenant, "t", TaskRequirements { capabilities: caps(&["x"]), ..Default::default() }, serde_json::Value::Null);
        router.accept(task.id, change.agent_id).unwrap();
        assert_eq!(router.get(task.id).unwrap().state, TaskState::Running);

        router.complete(task.id, change.agent_id, serde_json::json!({"ok": true})).unwrap();
        assert_eq!(router.get(task.id).unwrap().state, TaskState::Completed);
    }

    #[test]
    fn distributed_task_completes_on_quorum() {
        let (router, registry, _sink) = router();
        let tenant = TenantId::new();
        let a = registry.register(tenant, "a".into(), caps(&["x"]), "r".into(), SessionId::new());
        let b = registry.register(tenant, "b".into(), caps(&["x"]), "r".into(), SessionId::new());

        let parent = router.create_distributed(
            tenant,
            "fanout",
            serde_json::Value::Null,
            AggregationPolicy::Quorum { required: 1 },
            AggregateFunction::Sum,
        );
        let c1 = router.create(tenant, "child", TaskRequirements { capabilities: caps(&["x"]), ..Default::default() }, serde_json::Value::Null, Some(parent.id));
        let c2 = router.create(tenant, "child", TaskRequirements { capabilities: caps(&["x"]), ..Default::default() }, serde_json::Value::Null, Some(parent.id));

        router.delegate(c1.id, tenant, a.agent_id).unwrap();
        router.accept(c1.id, a.agent_id).unwrap();
        router.complete(c1.id, a.agent_id, serde_json::json!(4.0)).unwrap();

        assert_eq!(router.get(parent.id).unwrap().state, TaskState::Completed);
        let _ = (b, c2);
    }

    #[test]
    fn delegate_requires_same_tenant() {
        let (router, registry, _sink) = router();
        let tenant = TenantId::new();
        let other = TenantId::new();
        let change = registry.register(tenant, "w".into(), caps(&["x"]), "r".into(), SessionId::new());
        let task = router.create(tenant, "t", TaskRequirements::default(), serde_json::Value::Null, None);

        assert!(router.delegate(task.id, other, change.agent_id).is_err());
        assert!(router.delegate(task.id, tenant, change.agent_id).is_ok());
        assert_eq!(router.get(task.id).unwrap().assigned_agent, Some(change.agent_id));
    }

    #[test]
    fn failover_reassigns_then_exhausts() {
        let (router, registry, _sink) = router();
        let router = router.with_failover_policy(FailoverPolicy { max_attempts: 2, timeout_ms: 10 });
        let tenant = TenantId::new();
        let a = registry.register(tenant, "a".into(), caps(&["x"]), "r".into(), SessionId::new());
        let b = registry.register(tenant, "b".into(), caps(&["x"]), "r".into(), SessionId::new());
        let task = router.create_auto_assign(tenant, "t", TaskRequirements { capabilities: caps(&["x"]), ..Default::default() }, serde_json::Value::Null);
        let first_agent = router.get(task.id).unwrap().assigned_agent.unwrap();
        router.accept(task.id, first_agent).unwrap();

        // First offline event (attempts 0 -> 1 of 2): reassigns to the
        // other never-assigned agent rather than failing outright.
        router.handle_agent_offline(first_agent);
        let reassigned = router.get(task.id).unwrap();
        assert_eq!(reassigned.state, TaskState::Assigned);
        let second_agent = reassigned.assigned_agent.unwrap();
        assert_ne!(second_agent, first_agent);
        let _ = (a, b);

        router.accept(task.id, second_agent).unwrap();

        // Second offline event exhausts max_attempts=2 and fails the task.
        router.handle_agent_offline(second_agent);
        assert_eq!(router.get(task.id).unwrap().state, TaskState::Failed);
    }
}
