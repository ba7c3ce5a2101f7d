//! Shared guardrails for query result bounds and traversal limits.

pub const MAX_LIST_LIMIT: i64 = 1000;
pub const DEFAULT_LIST_LIMIT: i64 = 50;
pub const MAX_FRONTIER_DEPTH: i64 = 32;
pub const MAX_GRAPH_VISITED: usize = 2000;

pub fn clamp_int(value: i64, minimum: i64, maximum: i64) -> i64 {
    value.max(minimum).min(maximum)
}

pub fn clamp_depth(value: i64, maximum: i64) -> i64 {
    clamp_int(value, 1, maximum)
}

pub fn clamp_limit(value: i64, maximum: i64) -> i64 {
    clamp_int(value, 1, maximum)
}
