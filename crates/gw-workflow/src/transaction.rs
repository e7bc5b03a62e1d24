//! Transactional-mode compensation journal (§4.7): records each completed
//! step's compensating action so the engine can run them in reverse
//! completion order when a later step fails.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub step_id: String,
    pub compensate: Option<String>,
    pub output: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionEvent {
    Commit,
    Rollback,
}

/// Derives the compensating action by convention when a step doesn't
/// declare one explicitly (§4.7: `create -> delete`, `lock -> unlock`,
/// `write -> restore-prior-version`). Returns `None` when no convention
/// applies, meaning the step is treated as side-effect-free for rollback
/// purposes.
pub fn derive_compensation(tool: &str) -> Option<String> {
    if let Some(rest) = tool.strip_prefix("create_") {
        return Some(format!("delete_{rest}"));
    }
    if let Some(rest) = tool.strip_prefix("lock_") {
        return Some(format!("unlock_{rest}"));
    }
    if let Some(rest) = tool.strip_prefix("write_") {
        return Some(format!("restore_{rest}"));
    }
    None
}
