//! Run summary: the context object threaded through every pipeline step.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::diff::IssueDiff;
use crate::models::{Diagnostic, RunMetadata};
use crate::pipeline::StepTimings;
use crate::stabilizer::KeyDelta;

/// Per-table entity counts produced by the stabilizer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaCounts {
    pub added: usize,
    pub removed: usize,
    pub unchanged: usize,
}

/// Accumulating record of a run. Steps set fields and append diagnostics;
/// nothing is ever taken back out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub metadata: RunMetadata,
    pub retain_all_models: bool,
    pub started_at: DateTime<Utc>,
    pub run_id: Option<i64>,
    pub issue_diff: Option<IssueDiff>,
    pub entity_delta: BTreeMap<String, DeltaCounts>,
    pub trimmed_frames: usize,
    pub step_timings_ms: IndexMap<String, u64>,
    pub diagnostics: Vec<Diagnostic>,
    extra: BTreeMap<String, serde_json::Value>,
}

impl RunSummary {
    pub fn new(metadata: RunMetadata) -> Self {
        Self {
            metadata: metadata.with_default_job_id(),
            retain_all_models: false,
            started_at: Utc::now(),
            run_id: None,
            issue_diff: None,
            entity_delta: BTreeMap::new(),
            trimmed_frames: 0,
            step_timings_ms: IndexMap::new(),
            diagnostics: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_retain_all_models(mut self, retain: bool) -> Self {
        self.retain_all_models = retain;
        self
    }

    pub fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Attach a free-form value. An existing key keeps its first value.
    pub fn record(&mut self, key: &str, value: serde_json::Value) -> bool {
        if self.extra.contains_key(key) {
            return false;
        }
        self.extra.insert(key.to_string(), value);
        true
    }

    pub fn extra(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    pub(crate) fn record_delta(&mut self, delta: &KeyDelta) {
        for (table, sets) in delta.tables() {
            self.entity_delta.insert(
                table.table_name().to_string(),
                DeltaCounts {
                    added: sets.added.len(),
                    removed: sets.removed.len(),
                    unchanged: sets.unchanged.len(),
                },
            );
        }
    }
}

impl StepTimings for RunSummary {
    /// A step timed twice keeps its position and takes the later value.
    fn record_step_timing(&mut self, step: &str, elapsed_ms: u64) {
        self.step_timings_ms.insert(step.to_string(), elapsed_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_first_value() {
        let mut summary = RunSummary::new(RunMetadata::default());
        assert!(summary.record("note", serde_json::json!(1)));
        assert!(!summary.record("note", serde_json::json!(2)));
        assert_eq!(summary.extra("note"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_step_timing_overwrites_in_place() {
        let mut summary = RunSummary::new(RunMetadata::default());
        summary.record_step_timing("parse", 3);
        summary.record_step_timing("save", 1);
        summary.record_step_timing("save", 9);
        let steps: Vec<(&str, u64)> = summary
            .step_timings_ms
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        assert_eq!(steps, vec![("parse", 3), ("save", 9)]);
    }

    #[test]
    fn test_new_fills_job_id() {
        let summary = RunSummary::new(RunMetadata {
            differential_id: Some(7),
            ..Default::default()
        });
        assert_eq!(summary.metadata.job_id.as_deref(), Some("user_input_7"));
        assert!(!summary.retain_all_models);
    }
}
