//! Cache entry data model (§3, §4.3). The LRU/eviction engine lives in
//! `gw-cache`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tenant::TenantId;

/// `<prefix>:{<tenant-uuid>}:q:<normalized>` — the hash-tag layout from §6
/// so a tenant's keyspace co-resides on one shard.
pub fn cache_key(prefix: &str, tenant: TenantId, normalized_query: &str) -> String {
    format!("{prefix}:{}:q:{normalized_query}", tenant.hash_tag())
}

/// `<prefix>:lru:{<tenant-uuid>}` — the per-tenant LRU index key, scored by
/// unix seconds.
pub fn lru_index_key(prefix: &str, tenant: TenantId) -> String {
    format!("{prefix}:lru:{}", tenant.hash_tag())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub tenant: TenantId,
    pub key: String,
    pub value: serde_json::Value,
    pub size_bytes: usize,
    pub importance: f64,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(tenant: TenantId, key: String, value: serde_json::Value) -> Self {
        let size_bytes = value.to_string().len();
        let now = Utc::now();
        CacheEntry {
            tenant,
            key,
            value,
            size_bytes,
            importance: 0.0,
            created_at: now,
            last_access: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_access = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_embeds_hash_tag() {
        let tenant = TenantId::parse("00000000-0000-0000-0000-000000000002").unwrap();
        let key = cache_key("semcache", tenant, "abc123");
        assert_eq!(key, "semcache:{00000000-0000-0000-0000-000000000002}:q:abc123");
        assert_eq!(
            lru_index_key("semcache", tenant),
            "semcache:lru:{00000000-0000-0000-0000-000000000002}"
        );
    }
}
