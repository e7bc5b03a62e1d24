//! The live per-connection [`Session`] (§4.2) and the registry of all
//! currently open sessions the dispatcher/subsystems address by
//! [`SessionId`]. Owns the bounded outbound queue and the backpressure /
//! heartbeat bookkeeping; the reader/writer tasks that actually move bytes
//! live in [`crate::transport`].

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use gw_core::session::{SessionGeneration, SessionId};
use gw_core::tenant::TenantId;
use gw_core::wire::BinaryFrame;
use gw_core::SessionLimits;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::rate_limit::SessionLimiter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    Text,
    Binary,
}

/// An outbound frame queued for the writer task. `Application` carries an
/// already-encoded frame (a response, a notification, a replayed event);
/// `Ping`/`Close` are transport-level control messages the writer speaks
/// directly rather than round-tripping through the frame codec.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(BinaryFrame),
    Json(String),
    Ping,
    Close,
}

/// One connected agent session (§3 Session). Cheaply cloneable: everything
/// mutable lives behind atomics or the queue sender, so subsystems can hold
/// a `Session` handle without an outer `Arc<Mutex<..>>`.
#[derive(Clone)]
pub struct Session {
    pub id: SessionId,
    pub tenant: TenantId,
    inner: Arc<SessionInner>,
}

struct SessionInner {
    agent_id: parking_lot::Mutex<Option<Uuid>>,
    agent_name: parking_lot::Mutex<Option<String>>,
    generation: SessionGeneration,
    protocol: parking_lot::Mutex<ProtocolMode>,
    compression: AtomicBool,
    last_heartbeat_ms: AtomicI64,
    awaiting_pong: AtomicBool,
    out_tx: mpsc::Sender<Outbound>,
    limiter: SessionLimiter,
    dropped_for_backpressure: std::sync::atomic::AtomicU64,
}

impl Session {
    pub fn new(
        tenant: TenantId,
        generation: SessionGeneration,
        queue_capacity: usize,
        limits: &SessionLimits,
    ) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let session = Session {
            id: SessionId::new(),
            tenant,
            inner: Arc::new(SessionInner {
                agent_id: parking_lot::Mutex::new(None),
                agent_name: parking_lot::Mutex::new(None),
                generation,
                protocol: parking_lot::Mutex::new(ProtocolMode::Text),
                compression: AtomicBool::new(false),
                last_heartbeat_ms: AtomicI64::new(Utc::now().timestamp_millis()),
                awaiting_pong: AtomicBool::new(false),
                out_tx: tx,
                limiter: SessionLimiter::new(&limits.rate_limit),
                dropped_for_backpressure: std::sync::atomic::AtomicU64::new(0),
            }),
        };
        (session, rx)
    }

    pub fn generation(&self) -> SessionGeneration {
        self.inner.generation
    }

    pub fn agent_id(&self) -> Option<Uuid> {
        *self.inner.agent_id.lock()
    }

    pub fn agent_name(&self) -> Option<String> {
        self.inner.agent_name.lock().clone()
    }

    /// Binds this session to an agent identity on a successful `initialize`
    /// or `agent.register` exchange (§3 Session lifecycle).
    pub fn bind_agent(&self, agent_id: Uuid, agent_name: impl Into<String>) {
        *self.inner.agent_id.lock() = Some(agent_id);
        *self.inner.agent_name.lock() = Some(agent_name.into());
    }

    pub fn protocol(&self) -> ProtocolMode {
        *self.inner.protocol.lock()
    }

    pub fn set_protocol(&self, mode: ProtocolMode) {
        *self.inner.protocol.lock() = mode;
    }

    pub fn compression_negotiated(&self) -> bool {
        self.inner.compression.load(Ordering::Relaxed)
    }

    pub fn set_compression(&self, negotiated: bool) {
        self.inner.compression.store(negotiated, Ordering::Relaxed);
    }

    pub fn touch_heartbeat(&self) {
        self.inner.last_heartbeat_ms.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.inner.awaiting_pong.store(false, Ordering::Relaxed);
    }

    pub fn last_heartbeat_ms(&self) -> i64 {
        self.inner.last_heartbeat_ms.load(Ordering::Relaxed)
    }

    /// Called when the writer sends a `Ping`; returns `true` if a `Pong`
    /// was never received for the *previous* ping, meaning the session has
    /// now missed two consecutive intervals and should be closed (§4.2).
    pub fn note_ping_sent(&self) -> bool {
        self.inner.awaiting_pong.swap(true, Ordering::Relaxed)
    }

    /// Token-bucket check for the per-session rate limit (§4.2, default
    /// 200 req/s burst 400). `false` means the caller should respond with
    /// `RateLimited` instead of dispatching the request.
    pub fn try_acquire_rate_limit(&self) -> bool {
        self.inner.limiter.try_acquire()
    }

    /// Best-effort enqueue onto the bounded outbound queue (§4.2, §9
    /// Streaming Pattern backpressure). Never blocks the caller: a full
    /// queue increments the dropped counter instead, mirroring the
    /// `drop_oldest` mode's "never stall the publisher" property — the
    /// actual oldest-entry eviction happens in the writer, this is just the
    /// enqueue-side counter.
    pub fn try_send(&self, msg: Outbound) -> bool {
        match self.inner.out_tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.dropped_for_backpressure.fetch_add(1, Ordering::Relaxed);
                warn!(session = %self.id, "outbound queue saturated, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub async fn send(&self, msg: Outbound) -> bool {
        self.inner.out_tx.send(msg).await.is_ok()
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped_for_backpressure.load(Ordering::Relaxed)
    }
}

/// Registry of every open session, keyed by [`SessionId`], so subsystems
/// (`gw-bus`'s [`crate::dispatcher::SessionDeliverySink`], the dispatcher's
/// own lookups) can address a session without the session layer handing
/// out owning references across the crate boundary.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Session) {
        debug!(session = %session.id, tenant = %session.tenant, "session opened");
        self.sessions.insert(session.id, session);
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.sessions.get(&id).map(|e| e.clone())
    }

    pub fn remove(&self, id: SessionId) -> Option<Session> {
        debug!(session = %id, "session closed");
        self.sessions.remove(&id).map(|(_, s)| s)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> SessionLimits {
        SessionLimits::default()
    }

    #[test]
    fn new_session_starts_unbound_and_text_mode() {
        let (session, _rx) = Session::new(TenantId::new(), SessionGeneration(1), 16, &limits());
        assert!(session.agent_id().is_none());
        assert_eq!(session.protocol(), ProtocolMode::Text);
    }

    #[test]
    fn bind_agent_records_id_and_name() {
        let (session, _rx) = Session::new(TenantId::new(), SessionGeneration(1), 16, &limits());
        let id = Uuid::new_v4();
        session.bind_agent(id, "worker-1");
        assert_eq!(session.agent_id(), Some(id));
        assert_eq!(session.agent_name(), Some("worker-1".to_string()));
    }

    #[test]
    fn full_queue_drops_and_counts_instead_of_blocking() {
        let (session, _rx) = Session::new(TenantId::new(), SessionGeneration(1), 1, &limits());
        assert!(session.try_send(Outbound::Ping));
        assert!(!session.try_send(Outbound::Ping));
        assert_eq!(session.dropped_count(), 1);
    }

    #[test]
    fn ping_pong_tracking_flags_a_missed_pong() {
        let (session, _rx) = Session::new(TenantId::new(), SessionGeneration(1), 16, &limits());
        assert!(!session.note_ping_sent());
        assert!(session.note_ping_sent());
        session.touch_heartbeat();
        assert!(!session.note_ping_sent());
    }

    #[test]
    fn registry_insert_get_remove_round_trip() {
        let registry = SessionRegistry::new();
        let (session, _rx) = Session::new(TenantId::new(), SessionGeneration(1), 16, &limits());
        let id = session.id;
        registry.insert(session);
        assert!(registry.get(id).is_some());
        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
    }
}
