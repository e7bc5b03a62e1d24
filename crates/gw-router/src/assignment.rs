//! Capability-match assignment (§4.6).
//!
//! Candidates are agents in the task's tenant whose capability set is a
//! superset of the task's required capabilities and whose status is
//! `active`. Scoring is a single ordering key (lowest utilization, then
//! oldest last-assignment, then lexicographic id) rather than an additive
//! heuristic, since §4.6 specifies an exact tie-break chain.

use gw_core::agent::{Agent, AgentRegistry, AgentStatus};
use gw_core::task::Task;

/// The candidate chosen to run a task, or `None` if no agent currently
/// qualifies (the task stays `created` and is retried later).
pub fn pick_candidate(registry: &AgentRegistry, task: &Task) -> Option<Agent> {
    let mut candidates: Vec<Agent> = registry
        .discover(task.tenant, &task.requirements.capabilities)
        .into_iter()
        .filter(|a| a.status == AgentStatus::Active)
        .collect();

    candidates.sort_by(|a, b| {
        a.workload
            .utilization()
            .partial_cmp(&b.workload.utilization())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.last_assigned_at.cmp(&b.last_assigned_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_core::session::SessionId;
    use gw_core::tenant::TenantId;
    use std::collections::HashSet;

    fn caps(list: &[&str]) -> HashSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn picks_lowest_utilization_candidate() {
        let registry = AgentRegistry::new();
        let tenant = TenantId::new();
        registry.register(tenant, "frontend-dev".into(), caps(&["react", "js", "css"]), "dev".into(), SessionId::new());
        registry.register(tenant, "backend-dev".into(), caps(&["go", "postgres"]), "dev".into(), SessionId::new());
        registry.register(tenant, "devops".into(), caps(&["k8s", "terraform"]), "ops".into(), SessionId::new());

        let task = Task::new(
            tenant,
            "build",
            gw_core::task::TaskRequirements { capabilities: caps(&["react", "js"]), ..Default::default() },
            serde_json::Value::Null,
        );
        let picked = pick_candidate(&registry, &task).unwrap();
        assert_eq!(picked.name, "frontend-dev");

        let task = Task::new(
            tenant,
            "deploy",
            gw_core::task::TaskRequirements { capabilities: caps(&["k8s"]), ..Default::default() },
            serde_json::Value::Null,
        );
        assert_eq!(pick_candidate(&registry, &task).unwrap().name, "devops");

        let task = Task::new(
            tenant,
            "rewrite",
            gw_core::task::TaskRequirements { capabilities: caps(&["rust"]), ..Default::default() },
            serde_json::Value::Null,
        );
        assert!(pick_candidate(&registry, &task).is_none());
    }

    #[test]
    fn ties_broken_by_last_assigned_then_id() {
        let registry = AgentRegistry::new();
        let tenant = TenantId::new();
        registry.register(tenant, "a".into(), caps(&["x"]), "r".into(), SessionId::new());
        registry.register(tenant, "b".into(), caps(&["x"]), "r".into(), SessionId::new());

        let task = Task::new(tenant, "t", gw_core::task::TaskRequirements { capabilities: caps(&["x"]), ..Default::default() }, serde_json::Value::Null);
        let first = pick_candidate(&registry, &task).unwrap();

        // Both agents have identical utilization and no prior assignment;
        // the tie-break falls through to lexicographic id, which is
        // deterministic but not tied to registration order.
        let second = pick_candidate(&registry, &task).unwrap();
        assert_eq!(first.id, second.id);
    }
}
