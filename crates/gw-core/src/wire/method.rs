//! The method registry: string name ↔ 16-bit wire code (§6).
//!
//! JSON frames carry the string form (`"task.create"`); binary frames carry
//! the 2-byte code so the dispatcher never pays string-comparison cost on
//! the hot path. The mapping is exhaustive and defined in one place so the
//! two framing modes can never disagree about a method's identity.

use std::fmt;

use crate::error::{GatewayError, GatewayResult};

macro_rules! method_registry {
    ($( $code:literal => $variant:ident = $name:literal ),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Method {
            $( $variant ),+
        }

        impl Method {
            pub fn code(self) -> u16 {
                match self {
                    $( Method::$variant => $code ),+
                }
            }

            pub fn from_code(code: u16) -> GatewayResult<Self> {
                match code {
                    $( $code => Ok(Method::$variant), )+
                    other => Err(GatewayError::method_not_found(format!("code {other}"))),
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $( Method::$variant => $name ),+
                }
            }

            pub fn from_name(name: &str) -> GatewayResult<Self> {
                match name {
                    $( $name => Ok(Method::$variant), )+
                    other => Err(GatewayError::method_not_found(other)),
                }
            }
        }
    };
}

method_registry! {
    1  => Initialize = "initialize",
    2  => ToolList = "tool.list",
    3  => ToolExecute = "tool.execute",
    4  => ToolCancel = "tool.cancel",
    5  => ContextCreate = "context.create",
    6  => ContextGet = "context.get",
    7  => ContextUpdate = "context.update",
    8  => ContextAppend = "context.append",
    9  => ContextSearch = "context.search",
    10 => ContextSummary = "context.summary",
    11 => ContextDelete = "context.delete",
    12 => ContextGetStats = "context.get_stats",
    13 => ContextGetLimits = "context.get_limits",
    14 => AgentRegister = "agent.register",
    15 => AgentDiscover = "agent.discover",
    16 => AgentUpdateStatus = "agent.update_status",
    17 => AgentHeartbeat = "agent.heartbeat",
    18 => TaskCreate = "task.create",
    19 => TaskCreateAutoAssign = "task.create_auto_assign",
    20 => TaskDelegate = "task.delegate",
    21 => TaskAccept = "task.accept",
    22 => TaskComplete = "task.complete",
    23 => TaskFail = "task.fail",
    24 => TaskCancel = "task.cancel",
    25 => TaskSubmitResult = "task.submit_result",
    26 => TaskCreateDistributed = "task.create_distributed",
    27 => WorkflowCreate = "workflow.create",
    28 => WorkflowCreateCollaborative = "workflow.create_collaborative",
    29 => WorkflowGet = "workflow.get",
    30 => WorkflowExecute = "workflow.execute",
    31 => WorkflowExecuteCollaborative = "workflow.execute_collaborative",
    32 => WorkflowCompleteTask = "workflow.complete_task",
    33 => WorkflowStatus = "workflow.status",
    34 => WorkflowCancel = "workflow.cancel",
    35 => WorkflowResume = "workflow.resume",
    36 => Subscribe = "subscribe",
    37 => Unsubscribe = "unsubscribe",
    38 => SubscriptionList = "subscription.list",
    39 => SubscriptionRestore = "subscription.restore",
    40 => SubscriptionStatus = "subscription.status",
    41 => WorkspaceCreate = "workspace.create",
    42 => WorkspaceJoin = "workspace.join",
    43 => WorkspaceLeave = "workspace.leave",
    44 => WorkspaceUpdateState = "workspace.update_state",
    45 => WorkspaceGetState = "workspace.get_state",
    46 => DocumentCreateShared = "document.create_shared",
    47 => DocumentUpdate = "document.update",
    48 => DocumentApplyChange = "document.apply_change",
    49 => DocumentGet = "document.get",
    50 => StateCreate = "state.create",
    51 => StateSubscribe = "state.subscribe",
    52 => StateIncrement = "state.increment",
    53 => StateGet = "state.get",
    54 => ProtocolSetBinary = "protocol.set_binary",
    55 => ProtocolGetInfo = "protocol.get_info",
    56 => Ping = "ping",
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_method_by_code_and_name() {
        for code in 1..=56u16 {
            let m = Method::from_code(code).unwrap();
            assert_eq!(m.code(), code);
            assert_eq!(Method::from_name(m.name()).unwrap(), m);
        }
    }

    #[test]
    fn unknown_code_is_method_not_found() {
        assert!(Method::from_code(9999).is_err());
        assert!(Method::from_name("bogus.method").is_err());
    }
}
