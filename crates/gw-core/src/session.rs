//! Shared session identity.
//!
//! The full `Session` (send queue, heartbeat, backpressure state — §4.2) is
//! owned by the `gw-session` crate, which depends on this one. Every other
//! subsystem here only needs to name a session to track ownership (a
//! subscription's owner, an agent's current binding, a task's originating
//! caller), so the id type lives in the shared core instead of creating a
//! dependency cycle.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        SessionId::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing counter distinguishing successive connections
/// from the same agent, so messages from a superseded generation can be
/// discarded rather than acted on (see GLOSSARY: "Session generation").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionGeneration(pub u64);
