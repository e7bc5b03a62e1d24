//! Gateway error taxonomy.
//!
//! A single enum carries every error category the gateway surfaces on the
//! wire (§7 of the design). Each variant has a stable numeric `code()` used
//! in the response envelope's `error.code` field, independent of the enum's
//! declaration order so reordering variants never changes a client-visible
//! code.

use std::fmt;

/// Result alias used across every gateway crate instead of ad hoc
/// `Result<T, String>` or per-module error types.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("no tenant id for request")]
    NoTenantId,

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("context too large: {0}")]
    ContextTooLarge(String),

    #[error("operation cancelled")]
    OperationCancelled,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("circuit open: {0}")]
    CircuitOpen(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("upstream failed: {0}")]
    UpstreamFailed(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl GatewayError {
    /// Stable numeric error code surfaced in the wire envelope.
    pub fn code(&self) -> u32 {
        match self {
            GatewayError::Unauthorized(_) => 1001,
            GatewayError::NoTenantId => 1002,
            GatewayError::RateLimited(_) => 1003,
            GatewayError::MethodNotFound(_) => 1004,
            GatewayError::Malformed(_) => 1005,
            GatewayError::ValidationError(_) => 1006,
            GatewayError::Conflict(_) => 1007,
            GatewayError::NotFound(_) => 1008,
            GatewayError::ContextTooLarge(_) => 1009,
            GatewayError::OperationCancelled => 1010,
            GatewayError::Timeout(_) => 1011,
            GatewayError::CircuitOpen(_) => 1012,
            GatewayError::StoreUnavailable(_) => 1013,
            GatewayError::UpstreamFailed(_) => 1014,
            GatewayError::InternalError(_) => 1015,
        }
    }

    /// Short machine-stable name, used as the envelope's `error.code` companion label.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized(_) => "Unauthorized",
            GatewayError::NoTenantId => "NoTenantId",
            GatewayError::RateLimited(_) => "RateLimited",
            GatewayError::MethodNotFound(_) => "MethodNotFound",
            GatewayError::Malformed(_) => "Malformed",
            GatewayError::ValidationError(_) => "ValidationError",
            GatewayError::Conflict(_) => "Conflict",
            GatewayError::NotFound(_) => "NotFound",
            GatewayError::ContextTooLarge(_) => "ContextTooLarge",
            GatewayError::OperationCancelled => "OperationCancelled",
            GatewayError::Timeout(_) => "Timeout",
            GatewayError::CircuitOpen(_) => "CircuitOpen",
            GatewayError::StoreUnavailable(_) => "StoreUnavailable",
            GatewayError::UpstreamFailed(_) => "UpstreamFailed",
            GatewayError::InternalError(_) => "InternalError",
        }
    }

    /// Transient categories retried locally per a step's retry policy (§7 propagation policy).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::StoreUnavailable(_) | GatewayError::UpstreamFailed(_) | GatewayError::Timeout(_)
        )
    }

    pub fn unauthorized(msg: impl fmt::Display) -> Self {
        GatewayError::Unauthorized(msg.to_string())
    }

    pub fn no_tenant_id() -> Self {
        GatewayError::NoTenantId
    }

    pub fn rate_limited(msg: impl fmt::Display) -> Self {
        GatewayError::RateLimited(msg.to_string())
    }

    pub fn method_not_found(msg: impl fmt::Display) -> Self {
        GatewayError::MethodNotFound(msg.to_string())
    }

    pub fn malformed(msg: impl fmt::Display) -> Self {
        GatewayError::Malformed(msg.to_string())
    }

    pub fn validation(msg: impl fmt::Display) -> Self {
        GatewayError::ValidationError(msg.to_string())
    }

    pub fn conflict(msg: impl fmt::Display) -> Self {
        GatewayError::Conflict(msg.to_string())
    }

    pub fn not_found(msg: impl fmt::Display) -> Self {
        GatewayError::NotFound(msg.to_string())
    }

    pub fn context_too_large(msg: impl fmt::Display) -> Self {
        GatewayError::ContextTooLarge(msg.to_string())
    }

    pub fn timeout(msg: impl fmt::Display) -> Self {
        GatewayError::Timeout(msg.to_string())
    }

    pub fn circuit_open(msg: impl fmt::Display) -> Self {
        GatewayError::CircuitOpen(msg.to_string())
    }

    pub fn store_unavailable(msg: impl fmt::Display) -> Self {
        GatewayError::StoreUnavailable(msg.to_string())
    }

    pub fn upstream_failed(msg: impl fmt::Display) -> Self {
        GatewayError::UpstreamFailed(msg.to_string())
    }

    pub fn internal(msg: impl fmt::Display) -> Self {
        GatewayError::InternalError(msg.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Malformed(e.to_string())
    }
}

impl From<serde_yaml::Error> for GatewayError {
    fn from(e: serde_yaml::Error) -> Self {
        GatewayError::ValidationError(e.to_string())
    }
}
