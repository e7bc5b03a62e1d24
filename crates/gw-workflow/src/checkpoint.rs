//! Checkpoint persistence (§4.7, §6 persistent state layout: "per-execution
//! checkpoint blob"). Stored through the `KeyValueStore` collaborator under
//! a hash-tagged key, mirroring `gw-core::cache`'s key layout so a tenant's
//! checkpoints co-reside on one cluster shard too.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use gw_core::error::GatewayResult;
use gw_core::tenant::TenantId;
use gw_core::KeyValueStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub tenant: TenantId,
    pub completed_steps: HashSet<String>,
    pub outputs: HashMap<String, serde_json::Value>,
    pub pending_steps: HashSet<String>,
}

pub fn checkpoint_key(prefix: &str, tenant: TenantId, execution_id: Uuid) -> String {
    format!("{prefix}:checkpoint:{}:{execution_id}", tenant.hash_tag())
}

pub async fn save(store: &dyn KeyValueStore, prefix: &str, record: &CheckpointRecord) -> GatewayResult<()> {
    let key = checkpoint_key(prefix, record.tenant, record.execution_id);
    let bytes = serde_json::to_vec(record)?;
    store.set(&key, bytes).await
}

pub async fn load(
    store: &dyn KeyValueStore,
    prefix: &str,
    tenant: TenantId,
    execution_id: Uuid,
) -> GatewayResult<Option<CheckpointRecord>> {
    let key = checkpoint_key(prefix, tenant, execution_id);
    match store.get(&key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}
