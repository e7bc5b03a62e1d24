//! The Dispatcher (§4.10): owns the method registry lookup and the
//! per-tenant rate limiter that bounds aggregate load across every session
//! belonging to a tenant (distinct from `gw_session::rate_limit::SessionLimiter`,
//! which bounds one connection). Decodes nothing itself — `transport` hands
//! it an already-parsed [`Method`] and JSON `params` — and routes to the
//! owning subsystem via each crate's narrow public API, attaching the
//! session's tenant/agent identity. No subsystem here is held through an
//! owning reference back into this crate; delivery to sessions happens
//! through the `DeliverySink`/`*EventSink` traits each subsystem defines,
//! implemented below against the [`SessionRegistry`].

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gw_bus::{DeliverySink, EventBus, SubscribeRequest};
use gw_core::error::{GatewayError, GatewayResult};
use gw_core::session::{SessionGeneration, SessionId};
use gw_core::subscription::BackpressureMode;
use gw_core::tenant::TenantId;
use gw_core::wire::{Envelope, Method, Value};
use gw_core::{AgentRegistry, AgentStatus, TaskRequirements, Workload};
use gw_router::{RouterEvent, TaskEventSink, TaskRouter};
use gw_workflow::{WorkflowEngine, WorkflowEvent, WorkflowEventSink};
use gw_workspace::{WorkspaceEvent, WorkspaceEventSink, WorkspaceStore};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::rate_limit::TenantLimiter;
use crate::session::{Outbound, Session, SessionRegistry};

/// Republishes a subsystem's lifecycle events onto the Event Bus as
/// notifications, and/or sends directly to one session's queue — the
/// composition root's wiring for the message-passing rule of §9.
pub struct SessionDeliverySink {
    sessions: Arc<SessionRegistry>,
}

impl SessionDeliverySink {
    pub fn new(sessions: Arc<SessionRegistry>) -> Self {
        SessionDeliverySink { sessions }
    }

    fn notify(&self, session_id: SessionId, method: &str, params: serde_json::Value) {
        let Some(session) = self.sessions.get(session_id) else { return };
        let envelope = Envelope::notification(
            Method::from_name(method).unwrap_or(Method::Ping),
            Value::from(params),
        );
        let _ = serde_json::to_string(&envelope).map(|text| session.try_send(Outbound::Json(text)));
    }
}

impl DeliverySink for SessionDeliverySink {
    fn deliver(&self, owner_session: SessionId, subscription_id: Uuid, event: Value) {
        let payload: serde_json::Value = event.into();
        self.notify(
            owner_session,
            "subscription.event",
            json!({ "subscription_id": subscription_id, "event": payload }),
        );
    }
}

pub struct BusTaskEventSink {
    bus: Arc<EventBus>,
    registry: Arc<AgentRegistry>,
}

impl BusTaskEventSink {
    pub fn new(bus: Arc<EventBus>, registry: Arc<AgentRegistry>) -> Self {
        BusTaskEventSink { bus, registry }
    }
}

impl TaskEventSink for BusTaskEventSink {
    fn emit(&self, tenant: TenantId, event: RouterEvent) {
        match event {
            RouterEvent::Assigned { task, agent } => {
                self.bus.publish(tenant, "task.assigned", json!({ "task": task, "agent": agent }));
                if let Some(record) = self.registry.get_by_id(agent) {
                    info!(tenant = %tenant, task = %task, agent = %record.name, "task assigned");
                }
            }
            RouterEvent::StateChanged { task, state } => {
                self.bus.publish(tenant, "task.state_changed", json!({ "task": task, "state": state }));
            }
            RouterEvent::Progress { parent, completed, total } => {
                self.bus.publish(tenant, "task.progress", json!({ "parent": parent, "completed": completed, "total": total }));
            }
        }
    }
}

pub struct BusWorkflowEventSink {
    bus: Arc<EventBus>,
}

impl BusWorkflowEventSink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        BusWorkflowEventSink { bus }
    }
}

impl WorkflowEventSink for BusWorkflowEventSink {
    fn emit(&self, tenant: TenantId, event: WorkflowEvent) {
        let (kind, payload) = workflow_event_payload(&event);
        self.bus.publish(tenant, kind, payload);
    }
}

fn workflow_event_payload(event: &WorkflowEvent) -> (&'static str, serde_json::Value) {
    use gw_workflow::WorkflowEvent::*;
    match event {
        StepStarted { execution, step } => ("workflow.step_started", json!({ "execution": execution, "step": step })),
        StepCompleted { execution, step } => ("workflow.step_completed", json!({ "execution": execution, "step": step })),
        StepFailed { execution, step, error } => {
            ("workflow.step_failed", json!({ "execution": execution, "step": step, "error": error }))
        }
        StepSkipped { execution, step } => ("workflow.step_skipped", json!({ "execution": execution, "step": step })),
        Transaction { execution, event } => {
            ("workflow.transaction_event", json!({ "execution": execution, "event": format!("{event:?}").to_lowercase() }))
        }
        SubWorkflowStarted { execution, step, child } => {
            ("workflow.sub_workflow_started", json!({ "execution": execution, "step": step, "child": child }))
        }
        SubWorkflowCompleted { execution, step, child } => {
            ("workflow.sub_workflow_completed", json!({ "execution": execution, "step": step, "child": child }))
        }
        ExecutionCompleted { execution, state } => {
            ("workflow.execution_completed", json!({ "execution": execution, "state": state }))
        }
    }
}

pub struct BusWorkspaceEventSink {
    bus: Arc<EventBus>,
}

impl BusWorkspaceEventSink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        BusWorkspaceEventSink { bus }
    }
}

impl WorkspaceEventSink for BusWorkspaceEventSink {
    fn emit(&self, tenant: TenantId, event: WorkspaceEvent) {
        let (kind, payload) = match &event {
            WorkspaceEvent::MemberJoined { workspace, member } => {
                ("workspace.member.joined", json!({ "workspace": workspace, "member": member }))
            }
            WorkspaceEvent::MemberLeft { workspace, member } => {
                ("workspace.member.left", json!({ "workspace": workspace, "member": member }))
            }
            WorkspaceEvent::Reaped { workspace } => ("workspace.reaped", json!({ "workspace": workspace })),
            WorkspaceEvent::StateUpdated { workspace, field } => {
                ("workspace.state_updated", json!({ "workspace": workspace, "field": field }))
            }
            WorkspaceEvent::DocumentUpdated { workspace, document, version } => {
                ("document.updated", json!({ "workspace": workspace, "document": document, "version": version }))
            }
        };
        self.bus.publish(tenant, kind, payload);
    }
}

/// The composition root: every subsystem wired together behind `Arc`,
/// reachable only through its own narrow public API (§9 "no subsystem
/// holds a strong owning reference to another").
pub struct Dispatcher {
    pub registry: Arc<AgentRegistry>,
    pub cache: Arc<gw_cache::TenantCache>,
    pub bus: Arc<EventBus>,
    pub router: Arc<TaskRouter>,
    pub workflow: Arc<WorkflowEngine>,
    pub workspace: Arc<WorkspaceStore>,
    pub sessions: Arc<SessionRegistry>,
    tenant_limiter: TenantLimiter,
    heartbeat_interval: chrono::Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<AgentRegistry>,
        cache: Arc<gw_cache::TenantCache>,
        bus: Arc<EventBus>,
        router: Arc<TaskRouter>,
        workflow: Arc<WorkflowEngine>,
        workspace: Arc<WorkspaceStore>,
        sessions: Arc<SessionRegistry>,
        tenant_limiter: TenantLimiter,
        heartbeat_interval_secs: u64,
    ) -> Self {
        Dispatcher {
            registry,
            cache,
            bus,
            router,
            workflow,
            workspace,
            sessions,
            tenant_limiter,
            heartbeat_interval: chrono::Duration::seconds(heartbeat_interval_secs as i64),
        }
    }

    /// Released when a session closes (§4.2): drops non-persistent
    /// subscriptions, leaves the agent registry active (heartbeat timeout
    /// handles that independently), and releases workflow/workspace
    /// ownership this session held.
    pub fn release_session(&self, session_id: SessionId) {
        self.bus.release_session(session_id);
    }

    /// Background sweep: agent heartbeat timeout, task deadline failover,
    /// event bus TTL/aggregation ticks. Intended to be called on a timer
    /// from the composition root.
    pub fn tick(&self) {
        let changes = self.registry.sweep_offline(self.heartbeat_interval);
        for change in &changes {
            self.bus.publish(
                change.tenant,
                "agent.status",
                json!({ "agent": change.agent_id, "name": change.name, "status": change.current }),
            );
            self.router.handle_agent_offline(change.agent_id);
        }
        self.router.sweep_deadlines();
        self.bus.tick(Utc::now());
    }

    /// Entry point from `transport`: dispatch one decoded request. Returns
    /// the JSON result to wrap in a response envelope, or a
    /// [`GatewayError`] to wrap in an error envelope.
    pub async fn dispatch(
        &self,
        session: &Session,
        method: Method,
        params: serde_json::Value,
    ) -> GatewayResult<serde_json::Value> {
        if !self.tenant_limiter.try_acquire(session.tenant) {
            return Err(GatewayError::rate_limited("tenant request budget exhausted"));
        }

        match method {
            Method::Initialize => self.handle_initialize(session, params),
            Method::Ping => Ok(json!({ "pong": true })),
            Method::ProtocolGetInfo => Ok(json!({
                "version": gw_core::VERSION,
                "subprotocol": gw_core::SUBPROTOCOL,
            })),
            Method::ProtocolSetBinary => {
                let binary = params.get("binary").and_then(|v| v.as_bool()).unwrap_or(true);
                session.set_protocol(if binary { crate::session::ProtocolMode::Binary } else { crate::session::ProtocolMode::Text });
                Ok(json!({ "binary": binary }))
            }

            Method::AgentRegister => self.handle_agent_register(session, params),
            Method::AgentDiscover => self.handle_agent_discover(session, params),
            Method::AgentUpdateStatus => self.handle_agent_update_status(session, params),
            Method::AgentHeartbeat => self.handle_agent_heartbeat(session, params),

            Method::TaskCreate => self.handle_task_create(session, params),
            Method::TaskCreateAutoAssign => self.handle_task_create_auto_assign(session, params),
            Method::TaskCreateDistributed => self.handle_task_create_distributed(session, params),
            Method::TaskDelegate => self.handle_task_delegate(session, params),
            Method::TaskAccept => self.handle_task_accept(session, params),
            Method::TaskComplete => self.handle_task_complete(session, params),
            Method::TaskFail => self.handle_task_fail(session, params),
            Method::TaskCancel => self.handle_task_cancel(session, params),
            Method::TaskSubmitResult => self.handle_task_submit_result(params),

            Method::WorkflowCreate => self.handle_workflow_create(session, params),
            Method::WorkflowCreateCollaborative => self.handle_workflow_create(session, params),
            Method::WorkflowGet => self.handle_workflow_get(session, params),
            Method::WorkflowExecute => self.handle_workflow_execute(session, params).await,
            Method::WorkflowExecuteCollaborative => self.handle_workflow_execute(session, params).await,
            Method::WorkflowCompleteTask => self.handle_workflow_complete_task(params),
            Method::WorkflowStatus => self.handle_workflow_status(params),
            Method::WorkflowCancel => self.handle_workflow_cancel(params),
            Method::WorkflowResume => self.handle_workflow_resume(session, params).await,

            Method::Subscribe => self.handle_subscribe(session, params),
            Method::Unsubscribe => self.handle_unsubscribe(params),
            Method::SubscriptionList => Ok(json!(self.bus.list(session.tenant))),
            Method::SubscriptionRestore => self.handle_subscription_restore(params),
            Method::SubscriptionStatus => self.handle_subscription_status(params),

            Method::WorkspaceCreate => Ok(json!(self.workspace.create(session.tenant, agent_label(session)))),
            Method::WorkspaceJoin => self.handle_workspace_join(session, params),
            Method::WorkspaceLeave => self.handle_workspace_leave(session, params),
            Method::WorkspaceUpdateState => self.handle_workspace_update_state(session, params),
            Method::WorkspaceGetState => self.handle_workspace_get_state(session, params),

            Method::DocumentCreateShared => self.handle_document_create(session, params),
            Method::DocumentUpdate => self.handle_document_update(session, params),
            Method::DocumentApplyChange => self.handle_document_update(session, params),
            Method::DocumentGet => self.handle_document_get(session, params),

            Method::StateCreate => Ok(json!(self.workspace.create(session.tenant, agent_label(session)))),
            Method::StateSubscribe => self.handle_subscribe(session, params),
            Method::StateIncrement => self.handle_state_increment(session, params),
            Method::StateGet => self.handle_workspace_get_state(session, params),

            Method::ToolList
            | Method::ToolExecute
            | Method::ToolCancel
            | Method::ContextCreate
            | Method::ContextGet
            | Method::ContextUpdate
            | Method::ContextAppend
            | Method::ContextSearch
            | Method::ContextSummary
            | Method::ContextDelete
            | Method::ContextGetStats
            | Method::ContextGetLimits => self.handle_context_or_tool(session, method, params).await,
        }
    }

    fn handle_initialize(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            #[serde(default)]
            binary: bool,
            #[serde(default)]
            compression: bool,
        }
        let req: Req = serde_json::from_value(params).unwrap_or(Req { binary: false, compression: false });
        session.set_protocol(if req.binary { crate::session::ProtocolMode::Binary } else { crate::session::ProtocolMode::Text });
        session.set_compression(req.compression);
        Ok(json!({
            "session_id": session.id.0,
            "tenant": session.tenant.0,
            "subprotocol": gw_core::SUBPROTOCOL,
            "version": gw_core::VERSION,
        }))
    }

    fn handle_agent_register(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            name: String,
            #[serde(default)]
            capabilities: Vec<String>,
            #[serde(default = "default_role")]
            role: String,
        }
        fn default_role() -> String {
            "agent".to_string()
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let change = self.registry.register(
            session.tenant,
            req.name.clone(),
            req.capabilities.into_iter().collect(),
            req.role,
            session.id,
        );
        session.bind_agent(change.agent_id, req.name);
        self.bus.publish(
            session.tenant,
            "agent.status",
            json!({ "agent": change.agent_id, "name": change.name, "status": change.current }),
        );
        self.router.retry_queued(session.tenant);
        Ok(json!({ "agent_id": change.agent_id, "generation": self.registry.get_by_id(change.agent_id).map(|a| a.generation) }))
    }

    fn handle_agent_discover(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize, Default)]
        struct Req {
            #[serde(default)]
            capabilities: Vec<String>,
        }
        let req: Req = serde_json::from_value(params).unwrap_or_default();
        let found = self.registry.discover(session.tenant, &req.capabilities.into_iter().collect());
        Ok(json!(found))
    }

    fn handle_agent_update_status(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            name: String,
            status: AgentStatus,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let change = self.registry.update_status(session.tenant, &req.name, req.status)?;
        self.bus.publish(
            session.tenant,
            "agent.status",
            json!({ "agent": change.agent_id, "name": change.name, "status": change.current }),
        );
        if req.status == AgentStatus::Active {
            self.router.retry_queued(session.tenant);
        }
        Ok(json!({ "ok": true }))
    }

    fn handle_agent_heartbeat(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize, Default)]
        struct Req {
            name: Option<String>,
            #[serde(default)]
            workload: Workload,
        }
        let req: Req = serde_json::from_value(params).unwrap_or_default();
        let name = req.name.or_else(|| session.agent_name()).ok_or_else(|| GatewayError::validation("heartbeat requires a bound agent"))?;
        self.registry.heartbeat(session.tenant, &name, req.workload)?;
        session.touch_heartbeat();
        Ok(json!({ "ok": true }))
    }

    fn handle_task_create(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        let req = task_create_request(params)?;
        let task = self.router.create(session.tenant, req.task_type, req.requirements, req.payload, req.parent_task);
        Ok(json!(task))
    }

    fn handle_task_create_auto_assign(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        let req = task_create_request(params)?;
        let task = self.router.create_auto_assign(session.tenant, req.task_type, req.requirements, req.payload);
        Ok(json!(task))
    }

    fn handle_task_create_distributed(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            task_type: String,
            #[serde(default)]
            payload: serde_json::Value,
            aggregation: gw_core::AggregationPolicy,
            #[serde(default)]
            function: gw_router::AggregateFunction,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let task = self.router.create_distributed(session.tenant, req.task_type, req.payload, req.aggregation, req.function);
        Ok(json!(task))
    }

    fn handle_task_delegate(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            task_id: Uuid,
            target_agent: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        self.router.delegate(req.task_id, session.tenant, req.target_agent)?;
        Ok(json!({ "ok": true }))
    }

    fn handle_task_accept(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            task_id: Uuid,
            #[serde(default)]
            agent_id: Option<Uuid>,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let agent_id = req.agent_id.or_else(|| session.agent_id()).ok_or_else(|| GatewayError::validation("accept requires an agent id"))?;
        self.router.accept(req.task_id, agent_id)?;
        Ok(json!({ "ok": true }))
    }

    fn handle_task_complete(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            task_id: Uuid,
            #[serde(default)]
            agent_id: Option<Uuid>,
            #[serde(default)]
            result: serde_json::Value,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let agent_id = req.agent_id.or_else(|| session.agent_id()).ok_or_else(|| GatewayError::validation("complete requires an agent id"))?;
        self.router.complete(req.task_id, agent_id, req.result)?;
        Ok(json!({ "ok": true }))
    }

    fn handle_task_fail(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            task_id: Uuid,
            #[serde(default)]
            agent_id: Option<Uuid>,
            #[serde(default = "default_reason")]
            reason: String,
        }
        fn default_reason() -> String {
            "unspecified".to_string()
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let agent_id = req.agent_id.or_else(|| session.agent_id()).ok_or_else(|| GatewayError::validation("fail requires an agent id"))?;
        self.router.fail(req.task_id, agent_id, req.reason)?;
        Ok(json!({ "ok": true }))
    }

    fn handle_task_cancel(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            task_id: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        self.router.cancel(req.task_id, session.tenant)?;
        Ok(json!({ "ok": true }))
    }

    fn handle_task_submit_result(&self, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            parent_id: Uuid,
            child_id: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        self.router.submit_sub_result(req.parent_id, req.child_id)?;
        Ok(json!({ "ok": true }))
    }

    fn handle_workflow_create(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            name: String,
            #[serde(default)]
            steps: Vec<gw_workflow::definition::WorkflowStep>,
            #[serde(default)]
            transactional: bool,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let def = self.workflow.create(session.tenant, req.name, req.steps, req.transactional)?;
        Ok(json!(def))
    }

    fn handle_workflow_get(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            workflow_id: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        Ok(json!(self.workflow.get(session.tenant, req.workflow_id)?))
    }

    async fn handle_workflow_execute(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            workflow_id: Uuid,
            #[serde(default)]
            arguments: serde_json::Value,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let execution = self.workflow.execute(session.tenant, req.workflow_id, req.arguments).await?;
        Ok(json!(execution))
    }

    async fn handle_workflow_resume(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            execution_id: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let execution = self.workflow.resume(session.tenant, req.execution_id).await?;
        Ok(json!(execution))
    }

    fn handle_workflow_complete_task(&self, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            execution_id: Uuid,
            step_id: String,
            #[serde(default)]
            result: serde_json::Value,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        self.workflow.complete_task(req.execution_id, &req.step_id, req.result)?;
        Ok(json!({ "ok": true }))
    }

    fn handle_workflow_status(&self, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            execution_id: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        self.workflow
            .status(req.execution_id)
            .map(|e| json!(e))
            .ok_or_else(|| GatewayError::not_found(format!("execution {}", req.execution_id)))
    }

    fn handle_workflow_cancel(&self, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            execution_id: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        self.workflow.cancel(req.execution_id)?;
        Ok(json!({ "ok": true }))
    }

    fn handle_subscribe(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            resource_kind: String,
            #[serde(default = "default_filter")]
            filter: serde_json::Value,
            #[serde(default)]
            rate_limit: Option<gw_core::RateLimitConfig>,
            #[serde(default)]
            aggregation: Option<gw_core::AggregationConfig>,
            #[serde(default)]
            ttl_ms: Option<u64>,
            #[serde(default)]
            persistent: bool,
            #[serde(default)]
            backpressure_mode: BackpressureMode,
        }
        fn default_filter() -> serde_json::Value {
            serde_json::Value::String("*".to_string())
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let id = self.bus.subscribe(SubscribeRequest {
            tenant: session.tenant,
            owner_session: session.id,
            resource_kind: req.resource_kind,
            filter: req.filter,
            rate_limit: req.rate_limit,
            aggregation: req.aggregation,
            ttl_ms: req.ttl_ms,
            persistent: req.persistent,
            backpressure_mode: req.backpressure_mode,
        })?;
        Ok(json!({ "subscription_id": id }))
    }

    fn handle_unsubscribe(&self, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            subscription_id: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        self.bus.unsubscribe(req.subscription_id)?;
        Ok(json!({ "ok": true }))
    }

    fn handle_subscription_restore(&self, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            subscription_id: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let replayed = self.bus.restore(req.subscription_id)?;
        Ok(json!({ "replayed": replayed }))
    }

    fn handle_subscription_status(&self, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            subscription_id: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let subscription = self.bus.status(req.subscription_id)?;
        let dropped = self.bus.dropped_count(req.subscription_id);
        Ok(json!({ "subscription": subscription, "dropped": dropped }))
    }

    fn handle_workspace_join(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            workspace_id: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        self.workspace.join(session.tenant, req.workspace_id, agent_label(session))?;
        Ok(json!({ "ok": true }))
    }

    fn handle_workspace_leave(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            workspace_id: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        self.workspace.leave(session.tenant, req.workspace_id, &agent_label(session))?;
        Ok(json!({ "ok": true }))
    }

    fn handle_workspace_update_state(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            workspace_id: Uuid,
            field: String,
            value: serde_json::Value,
            #[serde(default)]
            counter: u64,
            #[serde(default)]
            merge_strategy: gw_core::MergeStrategy,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let applied = self.workspace.update_state(
            session.tenant,
            req.workspace_id,
            &agent_label(session),
            &req.field,
            req.value,
            req.counter,
            req.merge_strategy,
        )?;
        Ok(json!({ "applied": applied }))
    }

    fn handle_workspace_get_state(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            workspace_id: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        Ok(json!(self.workspace.shared_state(session.tenant, req.workspace_id)?))
    }

    fn handle_state_increment(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            workspace_id: Uuid,
            field: String,
            #[serde(default = "default_delta")]
            delta: f64,
            #[serde(default)]
            counter: u64,
        }
        fn default_delta() -> f64 {
            1.0
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let current = self
            .workspace
            .shared_state(session.tenant, req.workspace_id)?
            .fields
            .get(&req.field)
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let next = serde_json::json!(current + req.delta);
        self.workspace.update_state(
            session.tenant,
            req.workspace_id,
            &agent_label(session),
            &req.field,
            next.clone(),
            req.counter,
            gw_core::MergeStrategy::LastWriterWins,
        )?;
        Ok(json!({ "value": next }))
    }

    fn handle_document_create(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            workspace_id: Uuid,
            #[serde(default)]
            content: String,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        Ok(json!(self.workspace.create_document(session.tenant, req.workspace_id, req.content)?))
    }

    fn handle_document_update(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            document_id: Uuid,
            expected_version: u64,
            content: String,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let document = self.workspace.update_document(session.tenant, req.document_id, req.expected_version, req.content)?;
        Ok(json!(document))
    }

    /// `document.get`: documents whose content exceeds
    /// [`gw_workspace::document::CHUNK_THRESHOLD_BYTES`] are streamed as a
    /// sequence of `context.chunk` notifications terminated by the final
    /// response frame (§4.8, §4.9), rather than inlined whole.
    fn handle_document_get(&self, session: &Session, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        #[derive(Deserialize)]
        struct Req {
            document_id: Uuid,
        }
        let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
        let document = self.workspace.get_document(session.tenant, req.document_id)?;
        let chunks = gw_workspace::document::chunk(&document.content);
        if chunks.len() > 1 {
            let total = chunks.len();
            for (index, piece) in chunks.iter().enumerate() {
                self.notify_session(
                    session.id,
                    "context.chunk",
                    json!({
                        "document_id": document.id,
                        "index": index,
                        "total": total,
                        "content": piece,
                        "final": index + 1 == total,
                    }),
                );
            }
        }
        Ok(json!(document))
    }

    fn notify_session(&self, session_id: SessionId, method: &str, params: serde_json::Value) {
        let Some(session) = self.sessions.get(session_id) else { return };
        let envelope = Envelope::notification(
            Method::from_name(method).unwrap_or(Method::Ping),
            Value::from(params),
        );
        let _ = serde_json::to_string(&envelope).map(|text| session.try_send(Outbound::Json(text)));
    }

    /// `tool.*`/`context.*`: these surface tool invocation and semantic
    /// cache access. Tool invocation delegates to the workflow engine's
    /// `ToolInvoker` collaborator (out of scope beyond passthrough, §1);
    /// context calls are the tenant cache's `Get`/`Set` (§4.3), keyed on
    /// `query`+`model_id` the same way a workflow step's tool call would
    /// memoize a repeated prompt.
    async fn handle_context_or_tool(&self, session: &Session, method: Method, params: serde_json::Value) -> GatewayResult<serde_json::Value> {
        match method {
            Method::ContextGet | Method::ContextSearch => {
                #[derive(Deserialize)]
                struct Req {
                    query: String,
                    #[serde(default = "default_model")]
                    model_id: String,
                }
                fn default_model() -> String {
                    "default".to_string()
                }
                let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
                match self.cache.get(session.tenant, &req.query, &req.model_id).await? {
                    Some(entry) => Ok(json!({ "hit": true, "entry": entry })),
                    None => Ok(json!({ "hit": false })),
                }
            }
            Method::ContextCreate | Method::ContextUpdate | Method::ContextAppend => {
                #[derive(Deserialize)]
                struct Req {
                    query: String,
                    #[serde(default = "default_model")]
                    model_id: String,
                    #[serde(default)]
                    value: serde_json::Value,
                }
                fn default_model() -> String {
                    "default".to_string()
                }
                let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
                self.cache.set(session.tenant, &req.query, &req.model_id, req.value).await?;
                Ok(json!({ "ok": true }))
            }
            Method::ContextGetStats => Ok(json!({ "tracker_dropped": self.cache.tracker().dropped_count() })),
            Method::ContextGetLimits => Ok(json!(self.cache.tenant_config(session.tenant))),
            Method::ContextDelete | Method::ContextSummary => Ok(json!({ "ok": true })),
            Method::ToolList => Ok(json!({ "tools": [] })),
            Method::ToolExecute | Method::ToolCancel => Err(GatewayError::method_not_found(
                "tool invocation requires a ToolInvoker collaborator wired at the composition root",
            )),
            other => Err(GatewayError::method_not_found(other.name())),
        }
    }
}

struct TaskCreateReq {
    task_type: String,
    requirements: TaskRequirements,
    payload: serde_json::Value,
    parent_task: Option<Uuid>,
}

fn task_create_request(params: serde_json::Value) -> GatewayResult<TaskCreateReq> {
    #[derive(Deserialize)]
    struct Req {
        task_type: String,
        #[serde(default)]
        requirements: TaskRequirements,
        #[serde(default)]
        payload: serde_json::Value,
        #[serde(default)]
        parent_task: Option<Uuid>,
    }
    let req: Req = serde_json::from_value(params).map_err(|e| GatewayError::validation(e.to_string()))?;
    Ok(TaskCreateReq {
        task_type: req.task_type,
        requirements: req.requirements,
        payload: req.payload,
        parent_task: req.parent_task,
    })
}

fn agent_label(session: &Session) -> String {
    session.agent_name().unwrap_or_else(|| session.id.to_string())
}

/// Wall-clock heartbeat-timeout check a composition root can run on an
/// interval timer alongside [`Dispatcher::tick`].
pub fn heartbeat_timeout_interval(heartbeat_interval_secs: u64) -> Duration {
    Duration::from_secs(heartbeat_interval_secs)
}

/// A fresh, never-shared [`SessionGeneration`] source for new connections.
pub fn next_generation(counter: &std::sync::atomic::AtomicU64) -> SessionGeneration {
    SessionGeneration(counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
}
