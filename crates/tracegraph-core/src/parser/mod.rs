//! Analysis-output parsing: raw JSON documents to typed records.

pub mod document;
pub mod linemap;
pub mod output;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::ParserConfig;
use crate::diff::diff_issues;
use crate::errors::{TraceError, TraceResult};
use crate::models::{issue_handle, Diagnostic, TraceKind};
use crate::pipeline::PipelineStep;
use crate::summary::RunSummary;

pub use linemap::{LineMap, LineMapEntry};
pub use output::AnalysisOutput;

const STAGE: &str = "parse";

/// A precondition or postcondition edge as it appeared in the input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedFrame {
    pub kind: TraceKind,
    pub caller: String,
    pub caller_port: String,
    pub callee: String,
    pub callee_port: String,
    pub filename: String,
    pub line: i64,
    pub features: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedIssue {
    pub handle: String,
    pub code: String,
    pub callable: String,
    pub message: String,
    pub filename: String,
    pub line: i64,
    /// Optional rule kind; part of the handle when present.
    pub kind: Option<String>,
    /// Postcondition roots.
    pub sources: Vec<ParsedFrame>,
    /// Precondition roots.
    pub sinks: Vec<ParsedFrame>,
}

impl ParsedIssue {
    /// The handle this issue would have at another location.
    pub fn handle_at(&self, filename: &str, line: i64) -> String {
        issue_handle(&self.code, &self.callable, filename, line, self.kind.as_deref())
    }
}

/// Every record decoded from one run's output, across all its shards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedRun {
    pub issues: Vec<ParsedIssue>,
    pub preconditions: Vec<ParsedFrame>,
    pub postconditions: Vec<ParsedFrame>,
}

impl ParsedRun {
    /// Concatenate another shard's records onto this one.
    pub fn merge(&mut self, other: ParsedRun) {
        self.issues.extend(other.issues);
        self.preconditions.extend(other.preconditions);
        self.postconditions.extend(other.postconditions);
    }

    pub fn handles(&self) -> BTreeSet<String> {
        self.issues.iter().map(|i| i.handle.clone()).collect()
    }
}

/// What to compare the current run's issues against.
#[derive(Clone, Debug)]
pub enum PreviousInput {
    /// A complete previous analysis output.
    Output(AnalysisOutput),
    /// A JSON file holding a list of previous issue handles.
    IssueHandles(PathBuf),
}

impl PreviousInput {
    fn check_exists(&self) -> TraceResult<()> {
        match self {
            PreviousInput::Output(output) => output.check_exists(),
            PreviousInput::IssueHandles(path) => ensure_exists(path),
        }
    }

    fn load_handles(&self, workers: usize) -> TraceResult<BTreeSet<String>> {
        match self {
            PreviousInput::Output(output) => Ok(output.parse(workers)?.0.handles()),
            PreviousInput::IssueHandles(path) => {
                let raw = std::fs::read_to_string(path)?;
                let handles: Vec<String> = serde_json::from_str(&raw)?;
                Ok(handles.into_iter().collect())
            }
        }
    }
}

pub(crate) fn ensure_exists(path: &Path) -> TraceResult<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(TraceError::NotFound(path.to_path_buf()))
    }
}

/// Input of the parse step.
#[derive(Clone, Debug)]
pub struct AnalysisInputs {
    pub current: AnalysisOutput,
    pub previous: Option<PreviousInput>,
    pub linemap: Option<PathBuf>,
}

impl AnalysisInputs {
    pub fn new(current: AnalysisOutput) -> Self {
        Self {
            current,
            previous: None,
            linemap: None,
        }
    }

    pub fn with_previous(mut self, previous: PreviousInput) -> Self {
        self.previous = Some(previous);
        self
    }

    pub fn with_linemap(mut self, path: impl Into<PathBuf>) -> Self {
        self.linemap = Some(path.into());
        self
    }

    fn check_exists(&self) -> TraceResult<()> {
        self.current.check_exists()?;
        if let Some(previous) = &self.previous {
            previous.check_exists()?;
        }
        if let Some(linemap) = &self.linemap {
            ensure_exists(linemap)?;
        }
        Ok(())
    }
}

/// Pipeline step decoding the current run, and, when a previous run is
/// given, attaching the issue diff to the summary.
#[derive(Clone, Debug, Default)]
pub struct AnalysisOutputParser {
    config: ParserConfig,
}

impl AnalysisOutputParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }
}

impl PipelineStep<AnalysisInputs, ParsedRun, RunSummary> for AnalysisOutputParser {
    fn name(&self) -> &'static str {
        STAGE
    }

    fn run(&mut self, inputs: AnalysisInputs, summary: &mut RunSummary) -> TraceResult<ParsedRun> {
        inputs.check_exists()?;

        let linemap = inputs.linemap.as_deref().map(LineMap::from_file).transpose()?;
        let (current, diagnostics) = inputs.current.parse(self.config.workers)?;
        for diagnostic in diagnostics {
            summary.push_diagnostic(diagnostic);
        }
        info!(
            shards = inputs.current.shard_count(),
            issues = current.issues.len(),
            preconditions = current.preconditions.len(),
            postconditions = current.postconditions.len(),
            "parsed analysis output"
        );
        summary.record("shards", serde_json::json!(inputs.current.shard_count()));

        if let Some(previous) = &inputs.previous {
            let reference = previous.load_handles(self.config.workers)?;
            let diff = diff_issues(&current.issues, &reference, linemap.as_ref());
            summary.push_diagnostic(Diagnostic::info(
                STAGE,
                format!(
                    "{} new, {} fixed, {} unchanged issues",
                    diff.new.len(),
                    diff.fixed.len(),
                    diff.unchanged.len()
                ),
            ));
            summary.issue_diff = Some(diff);
        } else if linemap.is_some() {
            summary.push_diagnostic(Diagnostic::warning(
                STAGE,
                "line map supplied without a previous run; ignored",
            ));
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RunMetadata;

    const CURRENT: &str = r#"{"version": 1, "issues": [
        {"code": "T", "callable": "b", "filename": "f.py", "line": 1},
        {"code": "T", "callable": "c", "filename": "f.py", "line": 12}
    ]}"#;

    const PREVIOUS: &str = r#"{"version": 1, "issues": [
        {"code": "T", "callable": "a", "filename": "f.py", "line": 1},
        {"code": "T", "callable": "b", "filename": "f.py", "line": 1},
        {"code": "T", "callable": "c", "filename": "f.py", "line": 10}
    ]}"#;

    #[test]
    fn test_diff_against_previous_output_with_linemap() {
        let dir = tempfile::tempdir().unwrap();
        let linemap = dir.path().join("linemap.json");
        std::fs::write(
            &linemap,
            r#"[{"old_file": "f.py", "old_line": 10, "new_file": "f.py", "new_line": 12}]"#,
        )
        .unwrap();

        let inputs = AnalysisInputs::new(AnalysisOutput::from_contents("current", CURRENT))
            .with_previous(PreviousInput::Output(AnalysisOutput::from_contents("previous", PREVIOUS)))
            .with_linemap(&linemap);
        let mut summary = RunSummary::new(RunMetadata::default());
        let parsed = AnalysisOutputParser::default().run(inputs, &mut summary).unwrap();

        assert_eq!(parsed.issues.len(), 2);
        let diff = summary.issue_diff.unwrap();
        assert_eq!(diff.fixed, BTreeSet::from(["T:a:f.py:1".to_string()]));
        assert!(diff.new.is_empty());
        assert_eq!(diff.unchanged.len(), 2);
    }

    #[test]
    fn test_diff_against_handle_file() {
        let dir = tempfile::tempdir().unwrap();
        let handles = dir.path().join("handles.json");
        std::fs::write(&handles, r#"["T:b:f.py:1", "T:z:f.py:9"]"#).unwrap();

        let inputs = AnalysisInputs::new(AnalysisOutput::from_contents("current", CURRENT))
            .with_previous(PreviousInput::IssueHandles(handles));
        let mut summary = RunSummary::new(RunMetadata::default());
        AnalysisOutputParser::default().run(inputs, &mut summary).unwrap();
        assert_eq!(summary.extra("shards"), Some(&serde_json::json!(1)));

        let diff = summary.issue_diff.unwrap();
        assert_eq!(diff.fixed, BTreeSet::from(["T:z:f.py:9".to_string()]));
        assert_eq!(diff.new, BTreeSet::from(["T:c:f.py:12".to_string()]));
        assert_eq!(diff.unchanged, BTreeSet::from(["T:b:f.py:1".to_string()]));
    }

    #[test]
    fn test_missing_previous_file_fails_before_parsing() {
        let inputs = AnalysisInputs::new(AnalysisOutput::from_contents("current", "not json at all"))
            .with_previous(PreviousInput::IssueHandles("/no/such/handles.json".into()));
        let mut summary = RunSummary::new(RunMetadata::default());
        let err = AnalysisOutputParser::default().run(inputs, &mut summary).unwrap_err();
        assert!(matches!(err, TraceError::NotFound(_)));
    }

    #[test]
    fn test_missing_linemap_is_not_found() {
        let inputs = AnalysisInputs::new(AnalysisOutput::from_contents("current", CURRENT))
            .with_linemap("/no/such/linemap.json");
        let mut summary = RunSummary::new(RunMetadata::default());
        let err = AnalysisOutputParser::default().run(inputs, &mut summary).unwrap_err();
        assert!(matches!(err, TraceError::NotFound(_)));
    }

    #[test]
    fn test_no_previous_means_no_diff() {
        let inputs = AnalysisInputs::new(AnalysisOutput::from_contents("current", CURRENT));
        let mut summary = RunSummary::new(RunMetadata::default());
        AnalysisOutputParser::default().run(inputs, &mut summary).unwrap();
        assert!(summary.issue_diff.is_none());
    }
}
