// Gateway Core - Foundation types, error taxonomy, and wire protocol for
// the multi-tenant agent-orchestration gateway.
//
// This crate provides the data model and wire-level types shared by every
// other gateway crate: the frame codec, the method registry, the tenant and
// agent identities, and the narrow interfaces the gateway consumes from its
// external collaborators (token validation, the persistent store, tool
// invocation).

pub mod agent;
pub mod cache;
pub mod circuit;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod filter;
pub mod session;
pub mod subscription;
pub mod task;
pub mod tenant;
pub mod wire;
pub mod workspace;

pub use agent::{Agent, AgentRegistry, AgentStatus, AgentStatusChange, Workload};
pub use cache::{cache_key, lru_index_key, CacheEntry};
pub use collaborators::{
    HmacTokenValidator, InMemoryStore, KeyValueStore, TokenClaims, TokenValidator, ToolInvoker,
    SCRIPT_COUNT_TENANT_KEYS,
};
pub use config::{
    BindConfig, FlatGatewayConfig, GatewayConfig, GatewayConfigMetadata, GatewayConfigSpec,
    RateLimitSpec, SessionLimits, TenantDefaults,
};
pub use error::{GatewayError, GatewayResult};
pub use filter::{compile as compile_filter, CompiledFilter, CompiledOp, FilterCompileError};
pub use session::{SessionGeneration, SessionId};
pub use subscription::{
    AggregationConfig, AggregationFunction, BackpressureMode, RateLimitConfig, Subscription,
};
pub use task::{AggregationPolicy, Task, TaskRequirements, TaskState};
pub use tenant::TenantId;
pub use wire::{BinaryFrame, Envelope, EnvelopeKind, ErrorEnvelope, Method, Value};
pub use workspace::{Document, FieldClock, MergeStrategy, SharedState, Workspace};

/// Crate version, exposed for `protocol.get_info`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Subprotocol advertised at the `/ws` upgrade (§6).
pub const SUBPROTOCOL: &str = "mcp.v1";

/// Default global concurrency cap for parallel steps within one workflow
/// execution (§4.7).
pub const DEFAULT_WORKFLOW_CONCURRENCY: usize = 64;
