// Gateway Bus - the publish/subscribe Event Bus (§4.5).
//
// Matching order per subscription: compiled filter -> rate limit -> (if
// aggregation configured) append to window, else deliver directly. This
// crate owns the subscription table, filter compilation cache, rate
// limiters, aggregation windows and the bounded replay log used by
// persistent-subscription restore; it knows nothing about how a session
// actually pushes bytes to a socket, which is why delivery goes through
// the narrow [`DeliverySink`] trait the session layer implements.

pub mod aggregation;
pub mod rate_limit;
pub mod replay;
pub mod resource;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gw_core::error::{GatewayError, GatewayResult};
use gw_core::filter::{compile as compile_filter, CompiledFilter};
use gw_core::session::SessionId;
use gw_core::subscription::{BackpressureMode, Subscription};
use gw_core::tenant::TenantId;
use gw_core::wire::Value;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

pub use aggregation::{AggregatedEmission, AggregationWindow, GroupResult};
pub use rate_limit::SubscriptionLimiter;
pub use replay::{PublishedEvent, ReplayLog};

/// The narrow interface the Event Bus delivers matched/aggregated events
/// through. The session layer (`gw-session`) implements this against a
/// session's bounded outbound queue; tests use an in-memory collector.
pub trait DeliverySink: Send + Sync {
    fn deliver(&self, owner_session: SessionId, subscription_id: Uuid, event: Value);
}

struct SubscriptionEntry {
    subscription: Subscription,
    filter: CompiledFilter,
    limiter: Option<SubscriptionLimiter>,
    aggregation: Option<Mutex<AggregationWindow>>,
}

pub struct EventBus {
    subscriptions: DashMap<Uuid, SubscriptionEntry>,
    replay_log: ReplayLog,
    sink: Arc<dyn DeliverySink>,
}

#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub tenant: TenantId,
    pub owner_session: SessionId,
    pub resource_kind: String,
    pub filter: serde_json::Value,
    pub rate_limit: Option<gw_core::subscription::RateLimitConfig>,
    pub aggregation: Option<gw_core::subscription::AggregationConfig>,
    pub ttl_ms: Option<u64>,
    pub persistent: bool,
    pub backpressure_mode: BackpressureMode,
}

impl EventBus {
    pub fn new(sink: Arc<dyn DeliverySink>) -> Self {
        EventBus {
            subscriptions: DashMap::new(),
            replay_log: ReplayLog::new(replay::DEFAULT_BACKLOG),
            sink,
        }
    }

    pub fn subscribe(&self, req: SubscribeRequest) -> GatewayResult<Uuid> {
        let filter = compile_filter(&req.filter).map_err(|e| GatewayError::validation(e.to_string()))?;
        let id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = req.ttl_ms.map(|ms| now + chrono::Duration::milliseconds(ms as i64));

        let subscription = Subscription {
            id,
            tenant: req.tenant,
            owner_session: req.owner_session,
            resource_kind: req.resource_kind,
            filter: req.filter,
            rate_limit: req.rate_limit,
            aggregation: req.aggregation.clone(),
            ttl_ms: req.ttl_ms,
            persistent: req.persistent,
            backpressure_mode: req.backpressure_mode,
            cursor: self.replay_log.current_seq(),
            created_at: now,
            expires_at,
        };

        let entry = SubscriptionEntry {
            limiter: subscription.rate_limit.map(SubscriptionLimiter::new),
            aggregation: req.aggregation.map(|a| {
                Mutex::new(AggregationWindow::new(a.window_ms, a.functions, a.group_by))
            }),
            subscription,
            filter,
        };

        info!(tenant = %req.tenant, subscription = %id, "subscription created");
        self.subscriptions.insert(id, entry);
        Ok(id)
    }

    pub fn unsubscribe(&self, id: Uuid) -> GatewayResult<()> {
        self.subscriptions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| GatewayError::not_found(format!("subscription {id}")))
    }

    /// Called when a session closes: non-persistent subscriptions are
    /// discarded immediately; persistent ones survive for their TTL (§3,
    /// §4.2).
    pub fn release_session(&self, session: SessionId) {
        let mut to_remove = Vec::new();
        for entry in self.subscriptions.iter() {
            if entry.subscription.owner_session == session && !entry.subscription.persistent {
                to_remove.push(*entry.key());
            }
        }
        for id in to_remove {
            self.subscriptions.remove(&id);
        }
    }

    /// Publish an event tagged with a dotted/slash resource kind (§4.5).
    /// Runs the matching order: filter -> rate limit -> aggregate-or-deliver.
    pub fn publish(&self, tenant: TenantId, resource_kind: &str, payload: serde_json::Value) {
        let value: Value = payload.clone().into();
        let now = Utc::now();
        self.replay_log.append(tenant, resource_kind.to_string(), value.clone());

        for mut entry in self.subscriptions.iter_mut() {
            if entry.subscription.tenant != tenant {
                continue;
            }
            if entry.subscription.is_expired(now) {
                continue;
            }
            if !resource::matches(&entry.subscription.resource_kind, resource_kind) {
                continue;
            }
            if !entry.filter.matches(&value) {
                continue;
            }

            if let Some(limiter) = &entry.limiter {
                if !limiter.try_acquire() {
                    // drop-oldest is the default and only mode this bus
                    // implements synchronously; `block` is the session
                    // layer's responsibility since only it owns the
                    // backpressure-aware outbound queue.
                    continue;
                }
            }

            let sub_id = entry.subscription.id;
            let owner = entry.subscription.owner_session;
            if let Some(window) = &entry.aggregation {
                window.lock().append(&value, now);
            } else {
                entry.subscription.cursor = self.replay_log.current_seq();
                self.sink.deliver(owner, sub_id, value.clone());
            }
        }
    }

    /// Periodic maintenance: closes due aggregation windows (emitting their
    /// summaries) and prunes expired subscriptions. Intended to be driven
    /// by a timer in the composition root.
    pub fn tick(&self, now: DateTime<Utc>) {
        let mut expired = Vec::new();
        for mut entry in self.subscriptions.iter_mut() {
            if entry.subscription.is_expired(now) {
                expired.push(*entry.key());
                continue;
            }
            if let Some(window) = &entry.aggregation {
                if let Some(emission) = window.lock().close_if_due(now) {
                    self.emit_aggregation(&entry.subscription, emission);
                }
            }
        }
        for id in expired {
            debug!(subscription = %id, "subscription expired");
            self.subscriptions.remove(&id);
        }
    }

    fn emit_aggregation(&self, subscription: &Subscription, emission: AggregatedEmission) {
        let mut groups = Vec::new();
        for group in emission.groups {
            let mut map: HashMap<String, serde_json::Value> = HashMap::new();
            map.insert("group".to_string(), serde_json::Value::String(group.group_key));
            for (func, value) in group.values {
                map.insert(format!("{func:?}").to_lowercase(), serde_json::json!(value));
            }
            groups.push(map);
        }
        let payload: Value = serde_json::json!({
            "window_start": emission.window_start.to_rfc3339(),
            "window_end": emission.window_end.to_rfc3339(),
            "groups": groups,
        })
        .into();
        self.sink.deliver(subscription.owner_session, subscription.id, payload);
    }

    /// `subscription.restore(id)` (§4.5): replays missed events up to the
    /// bounded backlog and reports the count.
    pub fn restore(&self, id: Uuid) -> GatewayResult<usize> {
        let entry = self
            .subscriptions
            .get(&id)
            .ok_or_else(|| GatewayError::not_found(format!("subscription {id}")))?;
        if !entry.subscription.persistent {
            return Err(GatewayError::validation("only persistent subscriptions can be restored"));
        }
        let cursor = entry.subscription.cursor;
        let resource_kind = entry.subscription.resource_kind.clone();
        let filter = entry.filter.clone();
        let tenant = entry.subscription.tenant;
        let owner = entry.subscription.owner_session;
        let sub_id = entry.subscription.id;
        drop(entry);

        let backlog = self.replay_log.since(cursor);
        let mut replayed = 0usize;
        let mut last_seq = cursor;
        for event in backlog {
            if event.tenant != tenant || !resource::matches(&resource_kind, &event.resource_kind) {
                continue;
            }
            if !filter.matches(&event.payload) {
                continue;
            }
            self.sink.deliver(owner, sub_id, event.payload);
            replayed += 1;
            last_seq = event.seq;
        }

        if let Some(mut entry) = self.subscriptions.get_mut(&id) {
            entry.subscription.cursor = last_seq;
        }
        Ok(replayed)
    }

    pub fn list(&self, tenant: TenantId) -> Vec<Subscription> {
        self.subscriptions
            .iter()
            .filter(|e| e.subscription.tenant == tenant)
            .map(|e| e.subscription.clone())
            .collect()
    }

    pub fn status(&self, id: Uuid) -> GatewayResult<Subscription> {
        self.subscriptions
            .get(&id)
            .map(|e| e.subscription.clone())
            .ok_or_else(|| GatewayError::not_found(format!("subscription {id}")))
    }

    pub fn dropped_count(&self, id: Uuid) -> u64 {
        self.subscriptions
            .get(&id)
            .and_then(|e| e.limiter.as_ref().map(|l| l.dropped_count()))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct CollectingSink {
        events: StdMutex<Vec<(Uuid, serde_json::Value)>>,
    }

    impl DeliverySink for CollectingSink {
        fn deliver(&self, _owner_session: SessionId, subscription_id: Uuid, event: Value) {
            self.events.lock().unwrap().push((subscription_id, event.into()));
        }
    }

    fn bus() -> (EventBus, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        (EventBus::new(sink.clone()), sink)
    }

    #[test]
    fn publish_delivers_to_matching_subscription_only() {
        let (bus, sink) = bus();
        let tenant = TenantId::new();
        let id = bus
            .subscribe(SubscribeRequest {
                tenant,
                owner_session: SessionId::new(),
                resource_kind: "task.*".into(),
                filter: serde_json::json!({}),
                rate_limit: None,
                aggregation: None,
                ttl_ms: None,
                persistent: false,
                backpressure_mode: BackpressureMode::DropOldest,
            })
            .unwrap();

        bus.publish(tenant, "task.assigned", serde_json::json!({"task": "t1"}));
        bus.publish(TenantId::new(), "task.assigned", serde_json::json!({"task": "t2"}));
        bus.publish(tenant, "agent.status", serde_json::json!({"agent": "a1"}));

        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, id);
    }

    #[test]
    fn rate_limited_subscription_drops_excess() {
        let (bus, sink) = bus();
        let tenant = TenantId::new();
        bus.subscribe(SubscribeRequest {
            tenant,
            owner_session: SessionId::new(),
            resource_kind: "*".into(),
            filter: serde_json::json!({}),
            rate_limit: Some(gw_core::subscription::RateLimitConfig { max_per_second: 10, burst: 10 }),
            aggregation: None,
            ttl_ms: None,
            persistent: false,
            backpressure_mode: BackpressureMode::DropOldest,
        })
        .unwrap();

        for i in 0..100 {
            bus.publish(tenant, "ev", serde_json::json!({"i": i}));
        }
        assert!(sink.events.lock().unwrap().len() <= 10);
    }

    #[test]
    fn non_persistent_subscription_is_released_on_session_close() {
        let (bus, _sink) = bus();
        let tenant = TenantId::new();
        let session = SessionId::new();
        let id = bus
            .subscribe(SubscribeRequest {
                tenant,
                owner_session: session,
                resource_kind: "*".into(),
                filter: serde_json::json!({}),
                rate_limit: None,
                aggregation: None,
                ttl_ms: None,
                persistent: false,
                backpressure_mode: BackpressureMode::DropOldest,
            })
            .unwrap();
        bus.release_session(session);
        assert!(bus.status(id).is_err());
    }

    #[test]
    fn persistent_subscription_survives_session_close_and_restores() {
        let (bus, sink) = bus();
        let tenant = TenantId::new();
        let session = SessionId::new();
        let id = bus
            .subscribe(SubscribeRequest {
                tenant,
                owner_session: session,
                resource_kind: "*".into(),
                filter: serde_json::json!({}),
                rate_limit: None,
                aggregation: None,
                ttl_ms: Some(60_000),
                persistent: true,
                backpressure_mode: BackpressureMode::DropOldest,
            })
            .unwrap();

        bus.publish(tenant, "ev", serde_json::json!({"n": 1}));
        bus.release_session(session);
        bus.publish(tenant, "ev", serde_json::json!({"n": 2}));

        assert!(bus.status(id).is_ok());
        let replayed = bus.restore(id).unwrap();
        assert_eq!(replayed, 2);
        assert_eq!(sink.events.lock().unwrap().len(), 2);
    }

    #[test]
    fn aggregation_window_emits_on_tick() {
        let (bus, sink) = bus();
        let tenant = TenantId::new();
        bus.subscribe(SubscribeRequest {
            tenant,
            owner_session: SessionId::new(),
            resource_kind: "*".into(),
            filter: serde_json::json!({}),
            rate_limit: None,
            aggregation: Some(gw_core::subscription::AggregationConfig {
                window_ms: 100,
                functions: vec![gw_core::subscription::AggregationFunction::Count],
                group_by: vec![],
            }),
            ttl_ms: None,
            persistent: false,
            backpressure_mode: BackpressureMode::DropOldest,
        })
        .unwrap();

        let t0 = Utc::now();
        bus.publish(tenant, "ev", serde_json::json!({"value": 1}));
        assert!(sink.events.lock().unwrap().is_empty());
        bus.tick(t0 + chrono::Duration::milliseconds(200));
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }
}
