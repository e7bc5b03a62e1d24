//! CRDT-style shared-state merge (§4.8).
//!
//! Each field in a [`gw_core::workspace::SharedState`] carries its own
//! [`gw_core::workspace::FieldClock`] — a per-writer logical counter plus a
//! wall-clock timestamp — so concurrent writes to *distinct* fields never
//! collide, and concurrent writes to the *same* field resolve
//! deterministically without a coordinator: the write with the higher
//! counter wins, ties broken by timestamp, full ties (same counter, same
//! instant — two writers racing) broken by writer name so every replica
//! converges on the same value. `merge_strategy: append_arrays` additionally
//! lets list-valued fields merge as a deduplicated union instead of
//! overwriting.

use std::cmp::Ordering;

use chrono::Utc;
use serde_json::Value;

use gw_core::workspace::{FieldClock, MergeStrategy, SharedState};

/// Compares two writes to the same field; `Greater` means `incoming` wins.
fn resolve(existing: &FieldClock, incoming: &FieldClock) -> Ordering {
    incoming
        .counter
        .cmp(&existing.counter)
        .then_with(|| incoming.written_at.cmp(&existing.written_at))
        .then_with(|| incoming.writer.cmp(&existing.writer))
}

/// Applies one field write to `state`. Returns `true` if the write was
/// applied (it won the clock comparison or the field was previously unset).
pub fn apply_field(
    state: &mut SharedState,
    writer: &str,
    field: &str,
    value: Value,
    counter: u64,
    strategy: MergeStrategy,
) -> bool {
    let incoming_clock = FieldClock {
        writer: writer.to_string(),
        counter,
        written_at: Utc::now(),
    };

    let should_apply = match state.clocks.get(field) {
        None => true,
        Some(existing) => resolve(existing, &incoming_clock) != Ordering::Less,
    };

    if !should_apply {
        return false;
    }

    let merged_value = match strategy {
        MergeStrategy::AppendArrays => match (state.fields.get(field), &value) {
            (Some(Value::Array(existing)), Value::Array(incoming)) => {
                let mut merged: Vec<Value> = existing.clone();
                for item in incoming {
                    if !merged.contains(item) {
                        merged.push(item.clone());
                    }
                }
                Value::Array(merged)
            }
            _ => value,
        },
        MergeStrategy::LastWriterWins => value,
    };

    state.fields.insert(field.to_string(), merged_value);
    state.clocks.insert(field.to_string(), incoming_clock);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{thread, time::Duration};

    #[test]
    fn higher_counter_wins_regardless_of_order() {
        let mut state = SharedState::default();
        apply_field(&mut state, "a", "status", json!("draft"), 1, MergeStrategy::LastWriterWins);
        apply_field(&mut state, "b", "status", json!("final"), 5, MergeStrategy::LastWriterWins);
        // A late-arriving lower-counter write must not clobber the winner.
        apply_field(&mut state, "c", "status", json!("stale"), 2, MergeStrategy::LastWriterWins);
        assert_eq!(state.fields["status"], json!("final"));
    }

    #[test]
    fn distinct_fields_never_conflict() {
        let mut state = SharedState::default();
        apply_field(&mut state, "a", "title", json!("hello"), 1, MergeStrategy::LastWriterWins);
        apply_field(&mut state, "b", "body", json!("world"), 1, MergeStrategy::LastWriterWins);
        assert_eq!(state.fields["title"], json!("hello"));
        assert_eq!(state.fields["body"], json!("world"));
    }

    #[test]
    fn same_counter_tie_broken_by_timestamp_then_writer() {
        let mut state = SharedState::default();
        apply_field(&mut state, "a", "f", json!(1), 1, MergeStrategy::LastWriterWins);
        thread::sleep(Duration::from_millis(2));
        apply_field(&mut state, "a", "f", json!(2), 1, MergeStrategy::LastWriterWins);
        assert_eq!(state.fields["f"], json!(2));
    }

    #[test]
    fn append_arrays_strategy_unions_and_dedups() {
        let mut state = SharedState::default();
        apply_field(&mut state, "a", "tags", json!(["x", "y"]), 1, MergeStrategy::AppendArrays);
        apply_field(&mut state, "b", "tags", json!(["y", "z"]), 2, MergeStrategy::AppendArrays);
        assert_eq!(state.fields["tags"], json!(["x", "y", "z"]));
    }

    #[test]
    fn append_arrays_falls_back_to_overwrite_for_non_array_fields() {
        let mut state = SharedState::default();
        apply_field(&mut state, "a", "count", json!(1), 1, MergeStrategy::AppendArrays);
        apply_field(&mut state, "b", "count", json!(2), 2, MergeStrategy::AppendArrays);
        assert_eq!(state.fields["count"], json!(2));
    }
}
