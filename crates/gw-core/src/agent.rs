//! Agent identity and the Agent Registry (§4.4).
//!
//! An [`Agent`] is a logical identity distinct from the [`crate::session::SessionId`]
//! that currently speaks for it — sessions may reconnect and rebind to the
//! same agent without losing its registration.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::session::SessionId;
use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Busy,
    Draining,
    Offline,
}

impl AgentStatus {
    /// Legal forward transitions per §4.4: `active ↔ busy ↔ draining → offline`.
    pub fn can_transition_to(self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        matches!(
            (self, next),
            (Active, Busy)
                | (Busy, Active)
                | (Active, Draining)
                | (Busy, Draining)
                | (Draining, Active)
                | (Draining, Busy)
                | (Active, Offline)
                | (Busy, Offline)
                | (Draining, Offline)
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workload {
    pub task_count: u32,
    pub cpu_millis: u64,
    pub mem_bytes: u64,
}

impl Workload {
    /// A single scalar used to rank candidates during capability-match
    /// assignment (§4.6); lower is less loaded. Weighted toward task count
    /// since it is the dimension every agent reports regardless of
    /// whether it also exposes cpu/mem telemetry.
    pub fn utilization(&self) -> f64 {
        self.task_count as f64 + (self.cpu_millis as f64 / 1000.0) * 0.01
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub tenant: TenantId,
    pub name: String,
    pub capabilities: HashSet<String>,
    pub role: String,
    pub status: AgentStatus,
    pub workload: Workload,
    pub metadata: serde_json::Value,
    pub session: Option<SessionId>,
    pub generation: u64,
    pub last_heartbeat: DateTime<Utc>,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn has_capabilities(&self, required: &HashSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

/// `(tenant, agent-name) -> Agent` index with a reverse `capability ->
/// {agent-id}` index, sharded implicitly by `DashMap`'s internal sharding
/// (the registry itself does not need to be wrapped in any outer lock).
#[derive(Default)]
pub struct AgentRegistry {
    by_key: DashMap<(TenantId, String), Agent>,
    by_id: DashMap<Uuid, (TenantId, String)>,
    generation: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct AgentStatusChange {
    pub agent_id: Uuid,
    pub tenant: TenantId,
    pub name: String,
    pub previous: Option<AgentStatus>,
    pub current: AgentStatus,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register is idempotent per session generation: re-registering an
    /// existing `(tenant, name)` from a new session replaces the binding and
    /// returns a status-change event describing the replacement so the
    /// caller can publish it to `agent.status` subscribers.
    pub fn register(
        &self,
        tenant: TenantId,
        name: String,
        capabilities: HashSet<String>,
        role: String,
        session: SessionId,
    ) -> AgentStatusChange {
        let key = (tenant, name.clone());
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.by_key.get(&key).map(|a| a.status);

        let agent = Agent {
            id: Uuid::new_v4(),
            tenant,
            name: name.clone(),
            capabilities,
            role,
            status: AgentStatus::Active,
            workload: Workload::default(),
            metadata: serde_json::Value::Null,
            session: Some(session),
            generation,
            last_heartbeat: Utc::now(),
            last_assigned_at: None,
        };
        let id = agent.id;

        info!(tenant = %tenant, agent = %name, generation, "registering agent");
        if let Some(old) = self.by_key.insert(key.clone(), agent) {
            self.by_id.remove(&old.id);
        }
        self.by_id.insert(id, key);

        AgentStatusChange {
            agent_id: id,
            tenant,
            name,
            previous,
            current: AgentStatus::Active,
        }
    }

    pub fn get(&self, tenant: TenantId, name: &str) -> Option<Agent> {
        self.by_key.get(&(tenant, name.to_string())).map(|a| a.clone())
    }

    pub fn get_by_id(&self, id: Uuid) -> Option<Agent> {
        let key = self.by_id.get(&id)?;
        self.by_key.get(&key).map(|a| a.clone())
    }

    /// `Discover(capabilities, filter) -> [Agent]`: agents in the same
    /// tenant whose capability set is a superset of the requested set.
    pub fn discover(&self, tenant: TenantId, required: &HashSet<String>) -> Vec<Agent> {
        self.by_key
            .iter()
            .filter(|e| e.key().0 == tenant && e.value().has_capabilities(required))
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn update_status(
        &self,
        tenant: TenantId,
        name: &str,
        next: AgentStatus,
    ) -> GatewayResult<AgentStatusChange> {
        let mut entry = self
            .by_key
            .get_mut(&(tenant, name.to_string()))
            .ok_or_else(|| GatewayError::not_found(format!("agent {name}")))?;

        if !entry.status.can_transition_to(next) {
            return Err(GatewayError::validation(format!(
                "illegal status transition {:?} -> {:?}",
                entry.status, next
            )));
        }

        let previous = entry.status;
        entry.status = next;
        Ok(AgentStatusChange {
            agent_id: entry.id,
            tenant,
            name: name.to_string(),
            previous: Some(previous),
            current: next,
        })
    }

    pub fn heartbeat(&self, tenant: TenantId, name: &str, workload: Workload) -> GatewayResult<()> {
        let mut entry = self
            .by_key
            .get_mut(&(tenant, name.to_string()))
            .ok_or_else(|| GatewayError::not_found(format!("agent {name}")))?;
        entry.last_heartbeat = Utc::now();
        entry.workload = workload;
        debug!(tenant = %tenant, agent = %name, "heartbeat received");
        Ok(())
    }

    /// Scan for agents silent for at least two heartbeat intervals and
    /// transition them to `offline`. Returns the resulting status changes so
    /// the caller can reassign their active tasks (§4.6) and publish
    /// notifications.
    pub fn sweep_offline(&self, heartbeat_interval: chrono::Duration) -> Vec<AgentStatusChange> {
        let deadline = Utc::now() - heartbeat_interval * 2;
        let mut changes = Vec::new();
        for mut entry in self.by_key.iter_mut() {
            if entry.status != AgentStatus::Offline && entry.last_heartbeat < deadline {
                let previous = entry.status;
                entry.status = AgentStatus::Offline;
                warn!(tenant = %entry.tenant, agent = %entry.name, "agent timed out, marking offline");
                changes.push(AgentStatusChange {
                    agent_id: entry.id,
                    tenant: entry.tenant,
                    name: entry.name.clone(),
                    previous: Some(previous),
                    current: AgentStatus::Offline,
                });
            }
        }
        changes
    }

    pub fn count(&self) -> usize {
        self.by_key.len()
    }
}
