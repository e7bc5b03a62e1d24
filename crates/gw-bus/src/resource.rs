//! Dotted/slash resource-kind matching (§4.5 "Wildcard delivery").
//!
//! Publishers tag events with dotted paths (`tool.events.test_runner`);
//! subscriptions may use `"*"` on any path component to match any value at
//! that position. `.` and `/` are both accepted as separators so a
//! subscription written as `tool.events/*` matches a publish tagged
//! `tool.events.test_runner` just as `tool.events.*` would.

fn segments(path: &str) -> Vec<&str> {
    path.split(|c| c == '.' || c == '/').collect()
}

/// `true` if `pattern` matches `resource_kind`, honoring per-segment `"*"`
/// wildcards. A bare `"*"` pattern matches every resource kind.
pub fn matches(pattern: &str, resource_kind: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let pattern_segments = segments(pattern);
    let kind_segments = segments(resource_kind);
    if pattern_segments.len() != kind_segments.len() {
        return false;
    }
    pattern_segments
        .iter()
        .zip(kind_segments.iter())
        .all(|(p, k)| *p == "*" || p == k)
}
