//! Subscription data model (§3, §4.5). The matching/delivery engine lives in
//! `gw-bus`; this crate owns the shape so the wire layer and the bus agree
//! on it without a dependency cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::SessionId;
use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_per_second: u32,
    pub burst: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationFunction {
    Sum,
    Avg,
    Max,
    Min,
    Count,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub window_ms: u64,
    pub functions: Vec<AggregationFunction>,
    #[serde(default)]
    pub group_by: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureMode {
    DropOldest,
    Block,
}

impl Default for BackpressureMode {
    fn default() -> Self {
        BackpressureMode::DropOldest
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant: TenantId,
    pub owner_session: SessionId,
    pub resource_kind: String,
    pub filter: serde_json::Value,
    pub rate_limit: Option<RateLimitConfig>,
    pub aggregation: Option<AggregationConfig>,
    pub ttl_ms: Option<u64>,
    pub persistent: bool,
    pub backpressure_mode: BackpressureMode,
    pub cursor: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Subscription {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| now >= e).unwrap_or(false)
    }
}
