//! Per-tenant cache configuration, loaded once and memoized for 5 minutes
//! (§4.3) so a hot `get`/`set` path never pays a config-store round trip.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use gw_core::tenant::TenantId;
use serde::{Deserialize, Serialize};

pub const MEMOIZE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantCacheConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
    pub eviction_keep_fraction: f64,
    pub eviction_batch_size: usize,
    pub tracking_batch_size: usize,
    pub flush_interval_secs: u64,
    pub adaptive_eviction: bool,
    pub adaptive_hit_rate_threshold: f64,
}

impl Default for TenantCacheConfig {
    fn default() -> Self {
        TenantCacheConfig {
            ttl_secs: 300,
            max_entries: 10_000,
            eviction_keep_fraction: 0.9,
            eviction_batch_size: 100,
            tracking_batch_size: 1_000,
            flush_interval_secs: 10,
            adaptive_eviction: false,
            adaptive_hit_rate_threshold: 0.5,
        }
    }
}

struct Memoized {
    config: TenantCacheConfig,
    loaded_at: Instant,
}

/// In-memory memoization layer over whatever external store owns the
/// authoritative per-tenant configuration blob (§6 persistent state
/// layout). Loading the authoritative value is left to the caller via
/// [`TenantConfigStore::set`] on cache miss/expiry; this type only owns the
/// "memoize for 5 minutes" policy.
#[derive(Default)]
pub struct TenantConfigStore {
    entries: DashMap<TenantId, Memoized>,
}

impl TenantConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized config if still fresh, otherwise the default
    /// (callers that have a real config-loading collaborator should call
    /// `set` after fetching the authoritative value).
    pub fn get_or_default(&self, tenant: TenantId) -> TenantCacheConfig {
        if let Some(entry) = self.entries.get(&tenant) {
            if entry.loaded_at.elapsed() < MEMOIZE_TTL {
                return entry.config.clone();
            }
        }
        TenantCacheConfig::default()
    }

    pub fn set(&self, tenant: TenantId, config: TenantCacheConfig) {
        self.entries.insert(
            tenant,
            Memoized {
                config,
                loaded_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, tenant: TenantId) {
        self.entries.remove(&tenant);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconfigured_tenant_gets_defaults() {
        let store = TenantConfigStore::new();
        let cfg = store.get_or_default(TenantId::new());
        assert_eq!(cfg.max_entries, 10_000);
    }

    #[test]
    fn set_then_get_returns_memoized_value() {
        let store = TenantConfigStore::new();
        let tenant = TenantId::new();
        let mut cfg = TenantCacheConfig::default();
        cfg.max_entries = 42;
        store.set(tenant, cfg);
        assert_eq!(store.get_or_default(tenant).max_entries, 42);
    }
}
