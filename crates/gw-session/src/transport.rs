//! WebSocket transport (§4.2, §6): the one place raw bytes cross the wire.
//! Upgrades an HTTP connection, authenticates the Bearer token against the
//! [`TokenValidator`] collaborator, opens a [`Session`], and runs a
//! reader/writer task pair coordinated through the session's bounded
//! outbound queue. Heartbeat and idle-timeout handling follow the same
//! `tokio::select!` shape as a plain WebSocket gateway: a ticking pinger,
//! the inbound stream, and a sleep that resets on every received frame.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use gw_core::session::SessionGeneration;
use gw_core::wire::{BinaryFrame, Envelope, EnvelopeKind, Value};
use gw_core::{GatewayConfig, GatewayError, SessionLimits};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};

use crate::dispatcher::Dispatcher;
use crate::session::{Outbound, ProtocolMode, Session};

#[derive(Clone)]
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    pub validator: Arc<dyn gw_core::TokenValidator>,
    pub queue_capacity: usize,
    pub session_limits: SessionLimits,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
    generation: Arc<AtomicU64>,
}

impl GatewayState {
    pub fn new(dispatcher: Arc<Dispatcher>, validator: Arc<dyn gw_core::TokenValidator>, config: &GatewayConfig) -> Self {
        let limits = config.spec.session.clone();
        GatewayState {
            dispatcher,
            validator,
            queue_capacity: limits.queue_capacity,
            ping_interval: Duration::from_secs(limits.heartbeat_interval_secs),
            idle_timeout: Duration::from_secs(limits.heartbeat_interval_secs * 2),
            session_limits: limits,
            generation: Arc::new(AtomicU64::new(1)),
        }
    }

    fn next_generation(&self) -> SessionGeneration {
        SessionGeneration(self.generation.fetch_add(1, Ordering::SeqCst))
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// `GET /ws`: subprotocol `mcp.v1`, Bearer token auth (§6).
pub async fn ws_upgrade(State(state): State<GatewayState>, headers: HeaderMap, ws: WebSocketUpgrade) -> impl IntoResponse {
    let token = bearer_token(&headers).map(|s| s.to_string());
    ws.protocols([gw_core::SUBPROTOCOL]).on_upgrade(move |socket| handle_socket(state, token, socket))
}

async fn handle_socket(state: GatewayState, token: Option<String>, socket: WebSocket) {
    let Some(token) = token else {
        close_unauthenticated(socket).await;
        return;
    };

    let claims = match state.validator.validate(&token).await {
        Ok(claims) => claims,
        Err(err) => {
            warn!(error = %err, "websocket auth failed");
            close_unauthenticated(socket).await;
            return;
        }
    };

    let (session, out_rx) = Session::new(claims.tenant, state.next_generation(), state.queue_capacity, &state.session_limits);
    let span = tracing::info_span!("ws_session", tenant = %claims.tenant, session = %session.id);
    run_session(state, session, out_rx, socket).instrument(span).await;
}

async fn close_unauthenticated(mut socket: WebSocket) {
    let _ = socket.send(Message::Close(None)).await;
}

async fn run_session(state: GatewayState, session: Session, mut out_rx: mpsc::Receiver<Outbound>, socket: WebSocket) {
    state.dispatcher.sessions.insert(session.clone());
    info!("session opened");

    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let wire_msg = match encode_outbound(msg) {
                Some(msg) => msg,
                None => continue,
            };
            if ws_tx.send(wire_msg).await.is_err() {
                break;
            }
        }
    });

    let mut last_rx = Instant::now();
    let mut ping_tick = tokio::time::interval(state.ping_interval);

    loop {
        tokio::select! {
            _ = ping_tick.tick() => {
                if session.note_ping_sent() {
                    warn!("missed two consecutive heartbeats, closing session");
                    break;
                }
                let _ = session.try_send(Outbound::Ping);
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Ping(_))) => {
                        last_rx = Instant::now();
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_rx = Instant::now();
                        session.touch_heartbeat();
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Text(text))) => {
                        last_rx = Instant::now();
                        session.set_protocol(ProtocolMode::Text);
                        handle_text_frame(&state, &session, text).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        last_rx = Instant::now();
                        session.set_protocol(ProtocolMode::Binary);
                        handle_binary_frame(&state, &session, Bytes::from(bytes)).await;
                    }
                    Some(Err(err)) => {
                        debug!(error = %err, "websocket read error");
                        break;
                    }
                    None => break,
                }
            }

            _ = tokio::time::sleep_until(last_rx + state.idle_timeout) => {
                info!("idle timeout, closing session");
                break;
            }
        }
    }

    state.dispatcher.sessions.remove(session.id);
    state.dispatcher.release_session(session.id);
    let _ = session.send(Outbound::Close).await;
    writer.abort();
    info!("session closed");
}

fn encode_outbound(msg: Outbound) -> Option<Message> {
    match msg {
        Outbound::Frame(frame) => match frame.encode(false) {
            Ok(bytes) => Some(Message::Binary(bytes.to_vec())),
            Err(err) => {
                warn!(error = %err, "failed to encode outbound frame");
                None
            }
        },
        Outbound::Json(text) => Some(Message::Text(text)),
        Outbound::Ping => Some(Message::Ping(Vec::new())),
        Outbound::Close => Some(Message::Close(None)),
    }
}

async fn handle_text_frame(state: &GatewayState, session: &Session, text: String) {
    let envelope: Envelope = match serde_json::from_str(&text) {
        Ok(env) => env,
        Err(err) => {
            warn!(error = %err, "malformed text envelope");
            return;
        }
    };
    if let Some(resp) = dispatch_envelope(state, session, envelope).await {
        let _ = session.try_send(Outbound::Json(serde_json::to_string(&resp).unwrap_or_default()));
    }
}

async fn handle_binary_frame(state: &GatewayState, session: &Session, bytes: Bytes) {
    let frame = match BinaryFrame::decode(bytes) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "malformed binary frame");
            return;
        }
    };
    let envelope: Envelope = match serde_json::from_slice(&frame.payload) {
        Ok(env) => env,
        Err(err) => {
            warn!(error = %err, "malformed binary envelope payload");
            return;
        }
    };
    let method_code = envelope.method.map(|m| m.code()).unwrap_or(0);
    if let Some(resp) = dispatch_envelope(state, session, envelope).await {
        let compressed = session.compression_negotiated();
        let payload = serde_json::to_vec(&resp).unwrap_or_default();
        let frame = BinaryFrame {
            frame_type: resp.kind,
            method: method_code,
            compressed,
            encrypted: false,
            request_id: resp.id,
            payload: Bytes::from(payload),
        };
        let _ = session.try_send(Outbound::Frame(frame));
    }
}

/// Dispatches one parsed request/notification envelope and builds the
/// response envelope to send back, or `None` for a notification (the wire
/// protocol has no request/response pair to satisfy in that case).
async fn dispatch_envelope(state: &GatewayState, session: &Session, envelope: Envelope) -> Option<Envelope> {
    if envelope.kind != EnvelopeKind::Request {
        return None;
    }
    let Some(method) = envelope.method else {
        return Some(Envelope::error(envelope.id, &GatewayError::malformed("request missing method")));
    };

    if !session.try_acquire_rate_limit() {
        return Some(Envelope::error(envelope.id, &GatewayError::rate_limited("session request budget exhausted")));
    }

    let params: serde_json::Value = envelope.params.map(Into::into).unwrap_or(serde_json::Value::Null);
    Some(match state.dispatcher.dispatch(session, method, params).await {
        Ok(result) => Envelope::response(envelope.id, Value::from(result)),
        Err(err) => Envelope::error(envelope.id, &err),
    })
}
