//! Default [`ToolInvoker`] collaborator wired by `serve` when no external
//! tool backend is configured. Mirrors the role `gw-core`'s
//! [`gw_core::InMemoryStore`] plays for `KeyValueStore`: a concrete,
//! in-process stand-in for a collaborator whose real implementation lives
//! outside this codebase.

use async_trait::async_trait;
use gw_core::{GatewayError, GatewayResult, ToolInvoker};

/// Rejects every invocation with `MethodNotFound`. Workflows whose steps
/// only reach `SubWorkflow`/`External` kinds never touch this; any `Tool`
/// step fails until a real invoker (an MCP client, an HTTP callout) is
/// wired in its place.
pub struct UnconfiguredToolInvoker;

#[async_trait]
impl ToolInvoker for UnconfiguredToolInvoker {
    async fn invoke(&self, tool: &str, _args: serde_json::Value) -> GatewayResult<serde_json::Value> {
        Err(GatewayError::method_not_found(format!("no tool backend configured for '{tool}'")))
    }
}
