// Gateway Core - GatewayConfig resource type
//
// GatewayConfig is the daemon's root configuration: bind address, cors,
// per-tenant defaults, and session limits. It follows the same
// Kubernetes-style resource shape (apiVersion/kind/metadata/spec) used by
// every other resource type in this codebase.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// GatewayConfig - gateway daemon configuration
///
/// Example:
/// ```yaml
/// apiVersion: gateway.dev/v1
/// kind: GatewayConfig
/// metadata:
///   name: prod
/// spec:
///   bind:
///     host: 0.0.0.0
///     port: 8443
///   cors: true
///   tenantDefaults:
///     cacheTtlSecs: 300
///     evictionIntervalSecs: 300
///     maxSessions: 1000
///   session:
///     queueCapacity: 1024
///     heartbeatIntervalSecs: 30
///     rateLimit:
///       perSecond: 200
///       burst: 400
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "GatewayConfigInput")]
pub struct GatewayConfig {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: GatewayConfigMetadata,
    pub spec: GatewayConfigSpec,
}

fn default_api_version() -> String {
    "gateway.dev/v1".to_string()
}

fn default_kind() -> String {
    "GatewayConfig".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfigMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfigSpec {
    #[serde(default)]
    pub bind: BindConfig,
    #[serde(default = "default_true")]
    pub cors: bool,
    #[serde(default)]
    pub tenant_defaults: TenantDefaults,
    #[serde(default)]
    pub session: SessionLimits,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for BindConfig {
    fn default() -> Self {
        BindConfig {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantDefaults {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
    #[serde(default = "default_eviction_keep_fraction")]
    pub eviction_keep_fraction: f64,
    #[serde(default = "default_eviction_batch_size")]
    pub eviction_batch_size: usize,
    #[serde(default = "default_tracking_batch_size")]
    pub tracking_batch_size: usize,
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    #[serde(default = "default_tracker_channel_capacity")]
    pub tracker_channel_capacity: usize,
}

fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_eviction_interval_secs() -> u64 {
    300
}
fn default_max_sessions() -> u32 {
    1000
}
fn default_eviction_keep_fraction() -> f64 {
    0.9
}
fn default_eviction_batch_size() -> usize {
    100
}
fn default_tracking_batch_size() -> usize {
    1000
}
fn default_flush_interval_secs() -> u64 {
    10
}
fn default_tracker_channel_capacity() -> usize {
    10_000
}

impl Default for TenantDefaults {
    fn default() -> Self {
        TenantDefaults {
            cache_ttl_secs: default_cache_ttl_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
            max_sessions: default_max_sessions(),
            eviction_keep_fraction: default_eviction_keep_fraction(),
            eviction_batch_size: default_eviction_batch_size(),
            tracking_batch_size: default_tracking_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
            tracker_channel_capacity: default_tracker_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSpec {
    #[serde(default = "default_rate_per_second")]
    pub per_second: u32,
    #[serde(default = "default_rate_burst")]
    pub burst: u32,
}

fn default_rate_per_second() -> u32 {
    200
}
fn default_rate_burst() -> u32 {
    400
}

impl Default for RateLimitSpec {
    fn default() -> Self {
        RateLimitSpec {
            per_second: default_rate_per_second(),
            burst: default_rate_burst(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLimits {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default)]
    pub rate_limit: RateLimitSpec,
}

fn default_queue_capacity() -> usize {
    1024
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}

impl Default for SessionLimits {
    fn default() -> Self {
        SessionLimits {
            queue_capacity: default_queue_capacity(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            rate_limit: RateLimitSpec::default(),
        }
    }
}

impl Default for GatewayConfigSpec {
    fn default() -> Self {
        GatewayConfigSpec {
            bind: BindConfig::default(),
            cors: true,
            tenant_defaults: TenantDefaults::default(),
            session: SessionLimits::default(),
        }
    }
}

/// Flat shorthand accepted alongside the full K8s-style resource, the same
/// dual-format convention used by `AgentConfig`/`Workflow` upstream: a
/// bare `{name, host, port, ...}` map is promoted into a full
/// `GatewayConfig` via `From`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum GatewayConfigInput {
    Full {
        #[serde(default = "default_api_version")]
        #[serde(rename = "apiVersion")]
        api_version: String,
        #[serde(default = "default_kind")]
        kind: String,
        metadata: GatewayConfigMetadata,
        spec: GatewayConfigSpec,
    },
    Flat(FlatGatewayConfig),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatGatewayConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub cors: Option<bool>,
}

impl From<GatewayConfigInput> for GatewayConfig {
    fn from(input: GatewayConfigInput) -> Self {
        match input {
            GatewayConfigInput::Full {
                api_version,
                kind,
                metadata,
                spec,
            } => GatewayConfig {
                api_version,
                kind,
                metadata,
                spec,
            },
            GatewayConfigInput::Flat(flat) => {
                let mut spec = GatewayConfigSpec::default();
                if let Some(host) = flat.host {
                    spec.bind.host = host;
                }
                if let Some(port) = flat.port {
                    spec.bind.port = port;
                }
                if let Some(cors) = flat.cors {
                    spec.cors = cors;
                }
                GatewayConfig {
                    api_version: default_api_version(),
                    kind: default_kind(),
                    metadata: GatewayConfigMetadata {
                        name: flat.name.unwrap_or_else(|| "default".to_string()),
                        labels: HashMap::new(),
                    },
                    spec,
                }
            }
        }
    }
}

impl GatewayConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, crate::error::GatewayError> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_kubernetes_style_config() {
        let yaml = r#"
apiVersion: gateway.dev/v1
kind: GatewayConfig
metadata:
  name: prod
spec:
  bind:
    host: 127.0.0.1
    port: 9443
  cors: false
"#;
        let cfg = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.metadata.name, "prod");
        assert_eq!(cfg.spec.bind.port, 9443);
        assert!(!cfg.spec.cors);
        assert_eq!(cfg.spec.session.rate_limit.per_second, 200);
    }

    #[test]
    fn parses_flat_shorthand() {
        let yaml = r#"
name: dev
host: 0.0.0.0
port: 7000
"#;
        let cfg = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(cfg.metadata.name, "dev");
        assert_eq!(cfg.spec.bind.port, 7000);
        assert!(cfg.spec.cors);
    }

    #[test]
    fn defaults_match_spec_constants() {
        let cfg = GatewayConfigSpec::default();
        assert_eq!(cfg.session.queue_capacity, 1024);
        assert_eq!(cfg.session.heartbeat_interval_secs, 30);
        assert_eq!(cfg.session.rate_limit.per_second, 200);
        assert_eq!(cfg.session.rate_limit.burst, 400);
        assert_eq!(cfg.tenant_defaults.eviction_batch_size, 100);
    }
}
