//! Workspace/Document data model (§3, §4.8). The CRDT-style merge engine
//! lives in `gw-workspace`.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    LastWriterWins,
    AppendArrays,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::LastWriterWins
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub tenant: TenantId,
    pub workspace: Uuid,
    pub content: String,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// Per-field vector clock metadata so concurrent scalar writes to distinct
/// fields merge without loss, while same-field writes resolve last-writer-wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldClock {
    pub writer: String,
    pub counter: u64,
    pub written_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedState {
    pub fields: HashMap<String, serde_json::Value>,
    pub clocks: HashMap<String, FieldClock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub tenant: TenantId,
    pub members: HashSet<String>,
    pub creator: String,
    pub state: SharedState,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(tenant: TenantId, creator: impl Into<String>) -> Self {
        let creator = creator.into();
        let mut members = HashSet::new();
        members.insert(creator.clone());
        Workspace {
            id: Uuid::new_v4(),
            tenant,
            members,
            creator,
            state: SharedState::default(),
            created_at: Utc::now(),
        }
    }

    /// `true` once the last member has left — the caller is then
    /// responsible for reaping the workspace (§3 lifecycle).
    pub fn leave(&mut self, member: &str) -> bool {
        self.members.remove(member);
        self.members.is_empty()
    }
}
