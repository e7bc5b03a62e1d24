//! Aggregation windows (§4.5): events arriving after a window closes are
//! assigned to the next window, applied here by only ever appending into
//! the currently *open* window and never mutating one already closed and
//! emitted.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use gw_core::subscription::AggregationFunction;
use gw_core::wire::Value;

#[derive(Debug, Clone, Default)]
struct GroupAccumulator {
    count: u64,
    sum: f64,
    max: f64,
    min: f64,
    seen_any: bool,
}

impl GroupAccumulator {
    fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        if !self.seen_any {
            self.max = value;
            self.min = value;
            self.seen_any = true;
        } else {
            self.max = self.max.max(value);
            self.min = self.min.min(value);
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupResult {
    pub group_key: String,
    pub values: HashMap<AggregationFunction, f64>,
}

#[derive(Debug, Clone)]
pub struct AggregatedEmission {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub groups: Vec<GroupResult>,
}

pub struct AggregationWindow {
    window_ms: u64,
    functions: Vec<AggregationFunction>,
    group_by: Vec<String>,
    window_start: Option<DateTime<Utc>>,
    groups: HashMap<String, GroupAccumulator>,
}

fn extract_numeric(event: &Value) -> f64 {
    event.get("value").and_then(Value::as_f64).unwrap_or(1.0)
}

fn group_key(event: &Value, group_by: &[String]) -> String {
    if group_by.is_empty() {
        return String::new();
    }
    group_by
        .iter()
        .map(|field| {
            let v = event
                .get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| "null".to_string());
            format!("{field}={v}")
        })
        .collect::<Vec<_>>()
        .join("|")
}

impl AggregationWindow {
    pub fn new(window_ms: u64, functions: Vec<AggregationFunction>, group_by: Vec<String>) -> Self {
        AggregationWindow {
            window_ms,
            functions,
            group_by,
            window_start: None,
            groups: HashMap::new(),
        }
    }

    /// Append an event to the currently open window, opening one if none
    /// is active. Never touches an already-closed window, which is what
    /// gives late events the "assigned to the next window" semantics.
    pub fn append(&mut self, event: &Value, now: DateTime<Utc>) {
        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        let key = group_key(event, &self.group_by);
        self.groups.entry(key).or_default().push(extract_numeric(event));
    }

    /// Closes the window and returns its aggregated emission if the window
    /// is open and has elapsed `window_ms` as of `now`. Resets internal
    /// state so the next `append` opens a fresh window.
    pub fn close_if_due(&mut self, now: DateTime<Utc>) -> Option<AggregatedEmission> {
        let start = self.window_start?;
        if now < start + Duration::milliseconds(self.window_ms as i64) {
            return None;
        }
        self.force_close(now)
    }

    /// Force-close the current window regardless of elapsed time (used on
    /// subscription teardown so no partial window is silently dropped).
    pub fn force_close(&mut self, now: DateTime<Utc>) -> Option<AggregatedEmission> {
        let start = self.window_start.take()?;
        let groups = std::mem::take(&mut self.groups);
        if groups.is_empty() {
            return None;
        }
        let results = groups
            .into_iter()
            .map(|(group_key, acc)| {
                let mut values = HashMap::new();
                for func in &self.functions {
                    let v = match func {
                        AggregationFunction::Sum => acc.sum,
                        AggregationFunction::Avg => {
                            if acc.count == 0 {
                                0.0
                            } else {
                                acc.sum / acc.count as f64
                            }
                        }
                        AggregationFunction::Max => acc.max,
                        AggregationFunction::Min => acc.min,
                        AggregationFunction::Count => acc.count as f64,
                    };
                    values.insert(*func, v);
                }
                GroupResult { group_key, values }
            })
            .collect();
        Some(AggregatedEmission { window_start: start, window_end: now, groups: results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: f64, group: &str) -> Value {
        json!({"value": value, "kind": group}).into()
    }

    #[test]
    fn sum_avg_max_min_count_over_a_window() {
        let mut window = AggregationWindow::new(
            1000,
            vec![
                AggregationFunction::Sum,
                AggregationFunction::Avg,
                AggregationFunction::Max,
                AggregationFunction::Min,
                AggregationFunction::Count,
            ],
            vec![],
        );
        let t0 = Utc::now();
        window.append(&event(1.0, "a"), t0);
        window.append(&event(3.0, "a"), t0);
        window.append(&event(5.0, "a"), t0);

        assert!(window.close_if_due(t0 + Duration::milliseconds(500)).is_none());
        let emission = window.close_if_due(t0 + Duration::milliseconds(1001)).unwrap();
        let group = &emission.groups[0];
        assert_eq!(group.values[&AggregationFunction::Sum], 9.0);
        assert_eq!(group.values[&AggregationFunction::Avg], 3.0);
        assert_eq!(group.values[&AggregationFunction::Max], 5.0);
        assert_eq!(group.values[&AggregationFunction::Min], 1.0);
        assert_eq!(group.values[&AggregationFunction::Count], 3.0);
    }

    #[test]
    fn group_by_splits_accumulators() {
        let mut window = AggregationWindow::new(1000, vec![AggregationFunction::Count], vec!["kind".to_string()]);
        let t0 = Utc::now();
        window.append(&event(1.0, "a"), t0);
        window.append(&event(1.0, "b"), t0);
        window.append(&event(1.0, "a"), t0);

        let emission = window.force_close(t0 + Duration::milliseconds(1100)).unwrap();
        assert_eq!(emission.groups.len(), 2);
    }

    #[test]
    fn late_event_after_close_starts_a_fresh_window() {
        let mut window = AggregationWindow::new(1000, vec![AggregationFunction::Count], vec![]);
        let t0 = Utc::now();
        window.append(&event(1.0, "a"), t0);
        let first = window.close_if_due(t0 + Duration::milliseconds(1100)).unwrap();
        assert_eq!(first.groups[0].values[&AggregationFunction::Count], 1.0);

        // A "late" event for the closed window is appended after close and
        // must land in the next window, not retroactively mutate `first`.
        window.append(&event(1.0, "a"), t0 + Duration::milliseconds(1150));
        assert!(window.close_if_due(t0 + Duration::milliseconds(1200)).is_none());
        let second = window.close_if_due(t0 + Duration::milliseconds(2200)).unwrap();
        assert_eq!(second.groups[0].values[&AggregationFunction::Count], 1.0);
    }
}
