//! Workspace Sync: shared scratchpads agents collaborate through.
//!
//! A [`Workspace`] holds one conflict-free [`SharedState`] (merged via
//! [`merge::apply_field`], no coordinator needed) plus any number of
//! [`Document`]s (optimistic-concurrency blobs, see [`document`]). Both live
//! in this one crate because they share a membership and lifecycle model —
//! a workspace is reaped once its last member leaves.

pub mod document;
pub mod merge;

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use gw_core::error::{GatewayError, GatewayResult};
use gw_core::tenant::TenantId;
use gw_core::workspace::{Document, MergeStrategy, SharedState, Workspace};

/// Notifications a composition root wires to the Event Bus / session layer.
#[derive(Debug, Clone)]
pub enum WorkspaceEvent {
    MemberJoined { workspace: Uuid, member: String },
    MemberLeft { workspace: Uuid, member: String },
    Reaped { workspace: Uuid },
    StateUpdated { workspace: Uuid, field: String },
    DocumentUpdated { workspace: Uuid, document: Uuid, version: u64 },
}

pub trait WorkspaceEventSink: Send + Sync {
    fn emit(&self, tenant: TenantId, event: WorkspaceEvent);
}

pub struct NullSink;

impl WorkspaceEventSink for NullSink {
    fn emit(&self, _tenant: TenantId, _event: WorkspaceEvent) {}
}

/// In-memory registry of workspaces and their documents, scoped per tenant
/// via the stored [`TenantId`] on each `Workspace`/`Document`.
pub struct WorkspaceStore {
    workspaces: DashMap<Uuid, Workspace>,
    documents: DashMap<Uuid, Document>,
    sink: Arc<dyn WorkspaceEventSink>,
}

impl WorkspaceStore {
    pub fn new(sink: Arc<dyn WorkspaceEventSink>) -> Self {
        Self {
            workspaces: DashMap::new(),
            documents: DashMap::new(),
            sink,
        }
    }

    pub fn create(&self, tenant: TenantId, creator: impl Into<String>) -> Workspace {
        let workspace = Workspace::new(tenant, creator.into());
        self.workspaces.insert(workspace.id, workspace.clone());
        workspace
    }

    pub fn get(&self, tenant: TenantId, id: Uuid) -> GatewayResult<Workspace> {
        let entry = self
            .workspaces
            .get(&id)
            .ok_or_else(|| GatewayError::not_found(format!("workspace {id}")))?;
        if entry.tenant != tenant {
            return Err(GatewayError::not_found(format!("workspace {id}")));
        }
        Ok(entry.clone())
    }

    pub fn join(&self, tenant: TenantId, id: Uuid, member: impl Into<String>) -> GatewayResult<()> {
        let member = member.into();
        let mut entry = self
            .workspaces
            .get_mut(&id)
            .ok_or_else(|| GatewayError::not_found(format!("workspace {id}")))?;
        if entry.tenant != tenant {
            return Err(GatewayError::not_found(format!("workspace {id}")));
        }
        entry.members.insert(member.clone());
        self.sink.emit(tenant, WorkspaceEvent::MemberJoined { workspace: id, member });
        Ok(())
    }

    /// Removes `member`; reaps the workspace (and its documents) if that was
    /// the last one.
    pub fn leave(&self, tenant: TenantId, id: Uuid, member: &str) -> GatewayResult<()> {
        let is_empty = {
            let mut entry = self
                .workspaces
                .get_mut(&id)
                .ok_or_else(|| GatewayError::not_found(format!("workspace {id}")))?;
            if entry.tenant != tenant {
                return Err(GatewayError::not_found(format!("workspace {id}")));
            }
            entry.leave(member)
        };
        self.sink.emit(
            tenant,
            WorkspaceEvent::MemberLeft { workspace: id, member: member.to_string() },
        );
        if is_empty {
            self.workspaces.remove(&id);
            self.documents.retain(|_, doc| doc.workspace != id);
            self.sink.emit(tenant, WorkspaceEvent::Reaped { workspace: id });
        }
        Ok(())
    }

    /// Applies one field write to the workspace's shared state using the
    /// CRDT merge rule; `counter` is the writer's own monotonically
    /// increasing per-field sequence number.
    pub fn update_state(
        &self,
        tenant: TenantId,
        id: Uuid,
        writer: &str,
        field: &str,
        value: serde_json::Value,
        counter: u64,
        strategy: MergeStrategy,
    ) -> GatewayResult<bool> {
        let mut entry = self
            .workspaces
            .get_mut(&id)
            .ok_or_else(|| GatewayError::not_found(format!("workspace {id}")))?;
        if entry.tenant != tenant {
            return Err(GatewayError::not_found(format!("workspace {id}")));
        }
        let applied = merge::apply_field(&mut entry.state, writer, field, value, counter, strategy);
        if applied {
            self.sink.emit(
                tenant,
                WorkspaceEvent::StateUpdated { workspace: id, field: field.to_string() },
            );
        }
        Ok(applied)
    }

    pub fn shared_state(&self, tenant: TenantId, id: Uuid) -> GatewayResult<SharedState> {
        Ok(self.get(tenant, id)?.state)
    }

    pub fn create_document(
        &self,
        tenant: TenantId,
        workspace: Uuid,
        content: String,
    ) -> GatewayResult<Document> {
        self.get(tenant, workspace)?;
        let doc = document::new_document(tenant, workspace, content);
        self.documents.insert(doc.id, doc.clone());
        Ok(doc)
    }

    pub fn get_document(&self, tenant: TenantId, id: Uuid) -> GatewayResult<Document> {
        let entry = self
            .documents
            .get(&id)
            .ok_or_else(|| GatewayError::not_found(format!("document {id}")))?;
        if entry.tenant != tenant {
            return Err(GatewayError::not_found(format!("document {id}")));
        }
        Ok(entry.clone())
    }

    pub fn update_document(
        &self,
        tenant: TenantId,
        id: Uuid,
        expected_version: u64,
        content: String,
    ) -> GatewayResult<Document> {
        let mut entry = self
            .documents
            .get_mut(&id)
            .ok_or_else(|| GatewayError::not_found(format!("document {id}")))?;
        if entry.tenant != tenant {
            return Err(GatewayError::not_found(format!("document {id}")));
        }
        document::update(&mut entry, expected_version, content)?;
        self.sink.emit(
            tenant,
            WorkspaceEvent::DocumentUpdated { workspace: entry.workspace, document: id, version: entry.version },
        );
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<WorkspaceEvent>>,
    }

    impl WorkspaceEventSink for RecordingSink {
        fn emit(&self, _tenant: TenantId, event: WorkspaceEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn join_and_leave_last_member_reaps_workspace() {
        let sink = Arc::new(RecordingSink::default());
        let store = WorkspaceStore::new(sink.clone());
        let tenant = TenantId::new();
        let ws = store.create(tenant, "alice");

        store.join(tenant, ws.id, "bob").unwrap();
        assert_eq!(store.get(tenant, ws.id).unwrap().members.len(), 2);

        store.leave(tenant, ws.id, "alice").unwrap();
        assert!(store.get(tenant, ws.id).is_ok());

        store.leave(tenant, ws.id, "bob").unwrap();
        assert!(store.get(tenant, ws.id).is_err());

        let events = sink.events.lock().unwrap();
        assert!(matches!(events.last(), Some(WorkspaceEvent::Reaped { .. })));
    }

    #[test]
    fn foreign_tenant_cannot_see_workspace() {
        let store = WorkspaceStore::new(Arc::new(NullSink));
        let tenant = TenantId::new();
        let other = TenantId::new();
        let ws = store.create(tenant, "alice");
        assert!(store.get(other, ws.id).is_err());
    }

    #[test]
    fn update_state_merges_via_crdt_rule() {
        let store = WorkspaceStore::new(Arc::new(NullSink));
        let tenant = TenantId::new();
        let ws = store.create(tenant, "alice");

        store
            .update_state(tenant, ws.id, "alice", "status", serde_json::json!("draft"), 1, MergeStrategy::LastWriterWins)
            .unwrap();
        let applied = store
            .update_state(tenant, ws.id, "bob", "status", serde_json::json!("stale"), 0, MergeStrategy::LastWriterWins)
            .unwrap();
        assert!(!applied);
        assert_eq!(
            store.shared_state(tenant, ws.id).unwrap().fields["status"],
            serde_json::json!("draft")
        );
    }

    #[test]
    fn document_lifecycle_round_trips() {
        let store = WorkspaceStore::new(Arc::new(NullSink));
        let tenant = TenantId::new();
        let ws = store.create(tenant, "alice");

        let doc = store.create_document(tenant, ws.id, "hello".to_string()).unwrap();
        assert_eq!(doc.version, 1);

        let updated = store.update_document(tenant, doc.id, 1, "world".to_string()).unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.content, "world");

        let stale = store.update_document(tenant, doc.id, 1, "oops".to_string());
        assert!(stale.is_err());
    }

    #[test]
    fn leaving_reaps_documents_too() {
        let store = WorkspaceStore::new(Arc::new(NullSink));
        let tenant = TenantId::new();
        let ws = store.create(tenant, "alice");
        let doc = store.create_document(tenant, ws.id, "hello".to_string()).unwrap();

        store.leave(tenant, ws.id, "alice").unwrap();

        assert!(store.get_document(tenant, doc.id).is_err());
    }
}
