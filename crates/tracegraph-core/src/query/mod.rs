//! Read-only lookups over a store connection. Nothing here writes.

pub mod frontier;
pub mod guards;
pub mod issues;
pub mod runs;

pub use frontier::{frames_from_frontier, FrameRecord, Frontier};
pub use issues::{issue_by_handle, list_issues, IssueRecord};
pub use runs::{latest_run, list_runs, run_summary_json, RunRecord};
