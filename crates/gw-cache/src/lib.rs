// Gateway Cache - Tenant-isolated semantic cache (§4.3).
//
// Every call requires a tenant derived from the authenticated caller; a
// missing tenant fails with `NoTenantId`, never a silent fallback to a
// shared namespace. Entries co-reside on one cluster shard per tenant via
// the hash-tag key layout defined in `gw-core::cache`.

pub mod config;
pub mod eviction;
pub mod tracker;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gw_core::cache::{cache_key, lru_index_key, CacheEntry};
use gw_core::circuit::{CircuitBreaker, CircuitBreakerConfig};
use gw_core::error::{GatewayError, GatewayResult};
use gw_core::tenant::TenantId;
use gw_core::KeyValueStore;
use tracing::{debug, instrument};

pub use config::{TenantCacheConfig, TenantConfigStore};
pub use eviction::{EvictionPolicy, EvictionReport};
pub use tracker::AccessTracker;

/// Normalizes a raw query string for cache-key purposes: trims whitespace
/// and lowercases, matching the normalization the upstream embedding
/// provider is assumed to apply before hashing (§3 Cache Entry).
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

/// Fingerprints `(normalized query, model id)` into the key suffix used by
/// `cache_key`. A full embedding vector is not hashed here: callers that
/// have a real embedding pass its model id; the vector itself is only used
/// upstream by the embedding provider (out of core scope, §1).
pub fn fingerprint(normalized_query: &str, model_id: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    normalized_query.hash(&mut hasher);
    model_id.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

pub struct TenantCache {
    store: Arc<dyn KeyValueStore>,
    breaker: CircuitBreaker,
    prefix: String,
    tenant_config: TenantConfigStore,
    tracker: AccessTracker,
}

impl TenantCache {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        TenantCache {
            store,
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
            prefix: prefix.into(),
            tenant_config: TenantConfigStore::new(),
            tracker: AccessTracker::new(10_000),
        }
    }

    pub fn with_tracker_capacity(mut self, capacity: usize) -> Self {
        self.tracker = AccessTracker::new(capacity);
        self
    }

    pub fn tracker(&self) -> &AccessTracker {
        &self.tracker
    }

    async fn guarded<T, Fut>(&self, fut: Fut) -> GatewayResult<T>
    where
        Fut: std::future::Future<Output = GatewayResult<T>>,
    {
        if !self.breaker.allow() {
            return Err(GatewayError::circuit_open("key-value store"));
        }
        match fut.await {
            Ok(v) => {
                self.breaker.on_success();
                Ok(v)
            }
            Err(e) => {
                self.breaker.on_failure();
                Err(e)
            }
        }
    }

    /// `Get(query, embedding) -> entry|miss` (§4.3). `tenant` must come
    /// from the authenticated caller; there is no default tenant.
    #[instrument(skip(self, query), fields(tenant = %tenant))]
    pub async fn get(&self, tenant: TenantId, query: &str, model_id: &str) -> GatewayResult<Option<CacheEntry>> {
        let normalized = normalize_query(query);
        let fp = fingerprint(&normalized, model_id);
        let key = cache_key(&self.prefix, tenant, &fp);

        let raw = self.guarded(self.store.get(&key)).await?;
        let Some(bytes) = raw else {
            debug!(tenant = %tenant, "cache miss");
            return Ok(None);
        };

        let mut entry: CacheEntry = serde_json::from_slice(&bytes)?;
        if entry.tenant != tenant {
            // Defense in depth: a key collision across tenants must never
            // surface another tenant's value (§8 invariant 2).
            return Ok(None);
        }
        entry.touch();
        self.tracker.record(tenant, key.clone());
        debug!(tenant = %tenant, "cache hit");
        Ok(Some(entry))
    }

    /// `Set(query, embedding, value)` (§4.3).
    #[instrument(skip(self, query, value), fields(tenant = %tenant))]
    pub async fn set(&self, tenant: TenantId, query: &str, model_id: &str, value: serde_json::Value) -> GatewayResult<()> {
        let normalized = normalize_query(query);
        let fp = fingerprint(&normalized, model_id);
        let key = cache_key(&self.prefix, tenant, &fp);
        let entry = CacheEntry::new(tenant, key.clone(), value);
        let bytes = serde_json::to_vec(&entry)?;

        self.guarded(self.store.set(&key, bytes)).await?;
        let index_key = lru_index_key(&self.prefix, tenant);
        self.guarded(self.store.zadd(&index_key, Utc::now().timestamp(), &key)).await?;
        self.tracker.record(tenant, key);
        Ok(())
    }

    /// Per-tenant configuration (limits, feature flags, TTL overrides),
    /// loaded once and memoized for 5 minutes (§4.3).
    pub fn tenant_config(&self, tenant: TenantId) -> TenantCacheConfig {
        self.tenant_config.get_or_default(tenant)
    }

    pub fn set_tenant_config(&self, tenant: TenantId, config: TenantCacheConfig) {
        self.tenant_config.set(tenant, config);
    }

    /// Runs one eviction sweep for `tenant` per the configured policy
    /// (§4.3, §8 invariant 6).
    pub async fn evict_tenant(&self, tenant: TenantId, policy: &EvictionPolicy) -> GatewayResult<EvictionReport> {
        eviction::evict_tenant(self.store.as_ref(), &self.breaker, &self.prefix, tenant, policy).await
    }

    pub fn no_tenant() -> GatewayError {
        GatewayError::no_tenant_id()
    }

    pub fn tracker_flush_interval(&self, config: &TenantCacheConfig) -> Duration {
        Duration::from_secs(config.flush_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_core::InMemoryStore;

    fn cache() -> TenantCache {
        TenantCache::new(Arc::new(InMemoryStore::new()), "semcache")
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = cache();
        let tenant = TenantId::new();
        assert!(cache.get(tenant, "hello world", "gpt").await.unwrap().is_none());
        cache.set(tenant, "hello world", "gpt", serde_json::json!({"answer": 42})).await.unwrap();
        let hit = cache.get(tenant, "Hello World", "gpt").await.unwrap().unwrap();
        assert_eq!(hit.value, serde_json::json!({"answer": 42}));
    }

    #[tokio::test]
    async fn tenant_isolation_even_under_key_collision() {
        let cache = cache();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();
        cache.set(tenant_a, "shared-query", "gpt", serde_json::json!("A's answer")).await.unwrap();
        assert!(cache.get(tenant_b, "shared-query", "gpt").await.unwrap().is_none());
        assert!(cache.get(tenant_a, "shared-query", "gpt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn query_normalization_is_case_and_whitespace_insensitive() {
        let cache = cache();
        let tenant = TenantId::new();
        cache.set(tenant, "  Weather Today  ", "gpt", serde_json::json!("sunny")).await.unwrap();
        assert!(cache.get(tenant, "weather today", "gpt").await.unwrap().is_some());
    }
}
