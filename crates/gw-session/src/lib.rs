//! Session layer: WS transport, frame codec dispatch, heartbeat, and the
//! composition root that wires every other gateway crate together behind
//! the narrow `*EventSink`/`DeliverySink` traits each one defines (§9).
//! Nothing outside this crate owns an axum `Router` or a `Session`.

pub mod dispatcher;
pub mod rate_limit;
pub mod session;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use gw_bus::EventBus;
use gw_cache::TenantCache;
use gw_core::{AgentRegistry, GatewayConfig, KeyValueStore, ToolInvoker, TokenValidator};
use gw_router::TaskRouter;
use gw_workflow::WorkflowEngine;
use gw_workspace::WorkspaceStore;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use dispatcher::Dispatcher;
pub use rate_limit::{SessionLimiter, TenantLimiter};
pub use session::{Outbound, ProtocolMode, Session, SessionRegistry};
pub use transport::GatewayState;

use dispatcher::{BusTaskEventSink, BusWorkflowEventSink, BusWorkspaceEventSink, SessionDeliverySink};

/// Every live subsystem plus the dispatcher that routes wire methods to
/// them. Built once at startup from a [`GatewayConfig`] and the external
/// collaborators (token validation, persistent store, tool invocation);
/// everything downstream of this constructor talks to the subsystems only
/// through their own narrow public APIs, never through a shared lock.
pub struct Gateway {
    pub config: GatewayConfig,
    pub dispatcher: Arc<Dispatcher>,
    pub cache: Arc<TenantCache>,
    pub validator: Arc<dyn TokenValidator>,
    store: Arc<dyn KeyValueStore>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        validator: Arc<dyn TokenValidator>,
        invoker: Arc<dyn ToolInvoker>,
        store: Arc<dyn KeyValueStore>,
    ) -> Arc<Self> {
        let sessions = Arc::new(SessionRegistry::new());
        let bus = Arc::new(EventBus::new(Arc::new(SessionDeliverySink::new(sessions.clone()))));

        let registry = Arc::new(AgentRegistry::new());
        let router = Arc::new(TaskRouter::new(
            registry.clone(),
            Arc::new(BusTaskEventSink::new(bus.clone(), registry.clone())),
        ));

        let workflow = Arc::new(WorkflowEngine::new(
            invoker,
            store.clone(),
            Arc::new(BusWorkflowEventSink::new(bus.clone())),
        ));

        let workspace = Arc::new(WorkspaceStore::new(Arc::new(BusWorkspaceEventSink::new(bus.clone()))));

        let cache = Arc::new(TenantCache::new(store.clone(), "gwcache").with_tracker_capacity(
            config.spec.tenant_defaults.tracker_channel_capacity,
        ));

        let tenant_limiter = TenantLimiter::new(config.spec.session.rate_limit.clone());

        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            cache.clone(),
            bus,
            router,
            workflow,
            workspace,
            sessions,
            tenant_limiter,
            config.spec.session.heartbeat_interval_secs,
        ));

        Arc::new(Gateway {
            config,
            dispatcher,
            cache,
            validator,
            store,
        })
    }

    /// The axum application: one `/ws` route, everything else (health
    /// checks, metrics) left for a composition root to layer on top.
    pub fn into_router(self: &Arc<Self>) -> Router {
        let state = GatewayState::new(self.dispatcher.clone(), self.validator.clone(), &self.config);
        let mut router = Router::new().route("/ws", get(transport::ws_upgrade)).with_state(state);
        if self.config.spec.cors {
            router = router.layer(CorsLayer::permissive());
        }
        router.layer(TraceLayer::new_for_http())
    }

    /// Spawns the background maintenance loops: agent heartbeat sweep /
    /// task deadline failover / event bus ticks, and the tenant cache's
    /// access-tracker flusher (§4.3, §4.6, §4.9).
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let dispatcher = self.dispatcher.clone();
        let interval = Duration::from_secs(self.config.spec.session.heartbeat_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                dispatcher.tick();
            }
        });

        let defaults = gw_cache::TenantCacheConfig {
            flush_interval_secs: self.config.spec.tenant_defaults.flush_interval_secs,
            tracking_batch_size: self.config.spec.tenant_defaults.tracking_batch_size,
            ..gw_cache::TenantCacheConfig::default()
        };
        let flush_interval = self.cache.tracker_flush_interval(&defaults);
        self.cache.tracker().spawn_flusher(
            self.store.clone(),
            "gwcache".to_string(),
            flush_interval,
            defaults.tracking_batch_size,
        );

        info!("background maintenance tasks started");
    }
}
