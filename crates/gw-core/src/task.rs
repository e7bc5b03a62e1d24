//! Task data model (§3, §4.6). The assignment/failover/aggregation engine
//! that operates on these types lives in `gw-router`; this crate only owns
//! the shape and the forward-only state machine invariant so every
//! consumer enforces it the same way.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Assigned,
    Accepted,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// A task may transition only forward through its state machine (§3
    /// invariant). `Cancelled` is reachable from every non-terminal state.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        if next == Cancelled {
            return !matches!(self, Completed | Failed | Cancelled);
        }
        matches!(
            (self, next),
            (Created, Assigned)
                | (Assigned, Accepted)
                | (Assigned, Created) // requeued: no candidate took it, or it was reassigned
                | (Accepted, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Assigned) // failover reassignment
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequirements {
    pub capabilities: HashSet<String>,
    pub min_success_rate: Option<f64>,
    pub cost_cap: Option<f64>,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    WaitForAll,
    Quorum { required: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub tenant: TenantId,
    pub task_type: String,
    pub requirements: TaskRequirements,
    pub payload: serde_json::Value,
    pub state: TaskState,
    pub assigned_agent: Option<Uuid>,
    pub parent_task: Option<Uuid>,
    pub children: Vec<Uuid>,
    pub aggregation: Option<AggregationPolicy>,
    pub result: Option<serde_json::Value>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(tenant: TenantId, task_type: impl Into<String>, requirements: TaskRequirements, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4(),
            tenant,
            task_type: task_type.into(),
            requirements,
            payload,
            state: TaskState::Created,
            assigned_agent: None,
            parent_task: None,
            children: Vec::new(),
            aggregation: None,
            result: None,
            attempts: 0,
            created_at: now,
            updated_at: now,
            last_assigned_at: None,
        }
    }

    pub fn transition(&mut self, next: TaskState) -> GatewayResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(GatewayError::validation(format!(
                "task {} cannot move {:?} -> {:?}",
                self.id, self.state, next
            )));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// All children complete or the configured quorum is satisfied (§4.6 Aggregation).
    pub fn aggregation_satisfied(&self, child_states: &[TaskState]) -> bool {
        match self.aggregation {
            None | Some(AggregationPolicy::WaitForAll) => {
                !child_states.is_empty() && child_states.iter().all(|s| s.is_terminal())
            }
            Some(AggregationPolicy::Quorum { required }) => {
                child_states.iter().filter(|s| **s == TaskState::Completed).count() >= required
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_only_transitions() {
        let mut task = Task::new(TenantId::new(), "build", TaskRequirements::default(), serde_json::Value::Null);
        assert!(task.transition(TaskState::Assigned).is_ok());
        assert!(task.transition(TaskState::Accepted).is_ok());
        assert!(task.transition(TaskState::Running).is_ok());
        assert!(task.transition(TaskState::Created).is_err());
        assert!(task.transition(TaskState::Completed).is_ok());
        assert!(task.transition(TaskState::Running).is_err());
    }

    #[test]
    fn cancellation_allowed_from_any_nonterminal_state() {
        let mut task = Task::new(TenantId::new(), "build", TaskRequirements::default(), serde_json::Value::Null);
        assert!(task.transition(TaskState::Cancelled).is_ok());
        let mut task2 = Task::new(TenantId::new(), "build", TaskRequirements::default(), serde_json::Value::Null);
        task2.transition(TaskState::Completed).unwrap();
        assert!(task2.transition(TaskState::Cancelled).is_err());
    }

    #[test]
    fn quorum_aggregation() {
        let mut task = Task::new(TenantId::new(), "fanout", TaskRequirements::default(), serde_json::Value::Null);
        task.aggregation = Some(AggregationPolicy::Quorum { required: 2 });
        let states = vec![TaskState::Completed, TaskState::Completed, TaskState::Failed];
        assert!(task.aggregation_satisfied(&states));
        let states = vec![TaskState::Completed, TaskState::Running];
        assert!(!task.aggregation_satisfied(&states));
    }

    #[test]
    fn wait_for_all_requires_every_child_terminal() {
        let mut task = Task::new(TenantId::new(), "fanout", TaskRequirements::default(), serde_json::Value::Null);
        task.aggregation = Some(AggregationPolicy::WaitForAll);
        assert!(!task.aggregation_satisfied(&[TaskState::Completed, TaskState::Running]));
        assert!(task.aggregation_satisfied(&[TaskState::Completed, TaskState::Failed]));
    }
}
