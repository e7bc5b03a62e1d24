//! Eviction policy and sweep (§4.3, §8 invariant 6, §9 open question on
//! importance-based retention tie-breaking).

use gw_core::cache::{lru_index_key, CacheEntry};
use gw_core::circuit::CircuitBreaker;
use gw_core::error::GatewayResult;
use gw_core::tenant::TenantId;
use gw_core::{KeyValueStore, SCRIPT_COUNT_TENANT_KEYS};
use tracing::{info, warn};

use crate::config::TenantCacheConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Evict down to `keep_fraction * max_entries` whenever the tenant is
    /// over its cap. Default strategy.
    SizeBased { max_entries: usize, keep_fraction_permille: u32 },
    /// As `SizeBased`, but evicts more aggressively (lower keep fraction)
    /// once the observed hit rate falls below a threshold.
    Adaptive {
        max_entries: usize,
        keep_fraction_permille: u32,
        aggressive_keep_fraction_permille: u32,
        hit_rate_threshold_permille: u32,
        observed_hit_rate_permille: u32,
    },
}

impl EvictionPolicy {
    pub fn from_config(config: &TenantCacheConfig, observed_hit_rate: f64) -> Self {
        let keep_permille = (config.eviction_keep_fraction * 1000.0) as u32;
        if config.adaptive_eviction {
            EvictionPolicy::Adaptive {
                max_entries: config.max_entries,
                keep_fraction_permille: keep_permille,
                aggressive_keep_fraction_permille: (keep_permille / 2).max(100),
                hit_rate_threshold_permille: (config.adaptive_hit_rate_threshold * 1000.0) as u32,
                observed_hit_rate_permille: (observed_hit_rate * 1000.0) as u32,
            }
        } else {
            EvictionPolicy::SizeBased {
                max_entries: config.max_entries,
                keep_fraction_permille: keep_permille,
            }
        }
    }

    fn target(&self) -> usize {
        match *self {
            EvictionPolicy::SizeBased { max_entries, keep_fraction_permille } => {
                max_entries * keep_fraction_permille as usize / 1000
            }
            EvictionPolicy::Adaptive {
                max_entries,
                keep_fraction_permille,
                aggressive_keep_fraction_permille,
                hit_rate_threshold_permille,
                observed_hit_rate_permille,
            } => {
                let fraction = if observed_hit_rate_permille < hit_rate_threshold_permille {
                    aggressive_keep_fraction_permille
                } else {
                    keep_fraction_permille
                };
                max_entries * fraction as usize / 1000
            }
        }
    }

    fn cap(&self) -> usize {
        match *self {
            EvictionPolicy::SizeBased { max_entries, .. } => max_entries,
            EvictionPolicy::Adaptive { max_entries, .. } => max_entries,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub counted: usize,
    pub target: usize,
    pub evicted: usize,
    pub failed: usize,
}

/// One eviction sweep for a tenant (§4.3). Order of operations: count keys
/// via the scan script, compute the target, fetch the oldest entries from
/// the per-tenant LRU index, delete them in batches. Batches continue on
/// partial failure; the report's `failed` count lets the caller surface a
/// metric without aborting the sweep.
pub async fn evict_tenant(
    store: &dyn KeyValueStore,
    breaker: &CircuitBreaker,
    prefix: &str,
    tenant: TenantId,
    policy: &EvictionPolicy,
) -> GatewayResult<EvictionReport> {
    let index_key = lru_index_key(prefix, tenant);

    let count = guarded_count(store, breaker, &index_key).await?;
    let target = policy.target();
    let cap = policy.cap();

    if count <= cap {
        return Ok(EvictionReport { counted: count, target, evicted: 0, failed: 0 });
    }

    let to_evict = count - target;
    info!(tenant = %tenant, count, target, to_evict, "eviction sweep starting");

    let oldest = guarded(breaker, store.zrange(&index_key, 0, to_evict as isize - 1)).await?;

    let mut evicted = 0usize;
    let mut failed = 0usize;
    const EVICTION_BATCH_SIZE: usize = 100;
    for batch in oldest.chunks(EVICTION_BATCH_SIZE) {
        for key in batch {
            let del_ok = guarded(breaker, store.del(key)).await.is_ok();
            let zrem_ok = guarded(breaker, store.zrem(&index_key, key)).await.is_ok();
            if del_ok && zrem_ok {
                evicted += 1;
            } else {
                failed += 1;
                warn!(tenant = %tenant, key, "eviction batch entry failed, continuing");
            }
        }
    }

    Ok(EvictionReport { counted: count, target, evicted, failed })
}

async fn guarded_count(store: &dyn KeyValueStore, breaker: &CircuitBreaker, index_key: &str) -> GatewayResult<usize> {
    let value = guarded(
        breaker,
        store.eval(SCRIPT_COUNT_TENANT_KEYS, vec![index_key.to_string()], vec![]),
    )
    .await?;
    Ok(value.as_u64().unwrap_or(0) as usize)
}

async fn guarded<T, Fut>(breaker: &CircuitBreaker, fut: Fut) -> GatewayResult<T>
where
    Fut: std::future::Future<Output = GatewayResult<T>>,
{
    if !breaker.allow() {
        return Err(gw_core::error::GatewayError::circuit_open("key-value store"));
    }
    match fut.await {
        Ok(v) => {
            breaker.on_success();
            Ok(v)
        }
        Err(e) => {
            breaker.on_failure();
            Err(e)
        }
    }
}

/// Importance-descending, then recency-descending tie-break for
/// importance-based retention (§9 open question, resolved in DESIGN.md).
pub fn sort_by_retention_priority(entries: &mut [CacheEntry]) {
    entries.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.last_access.cmp(&a.last_access))
    });
}
