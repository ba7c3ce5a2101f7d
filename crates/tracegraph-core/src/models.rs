//! Shared typed models used across parsing, graph building, and storage.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Schema / contract constants
// ---------------------------------------------------------------------------

/// Analysis-output document versions this crate can read.
pub const SUPPORTED_INPUT_VERSIONS: &[i64] = &[1];

/// Port name used for the caller side of an issue's root frames.
pub const ROOT_PORT: &str = "root";

/// Status written on every committed run row.
pub const RUN_STATUS_FINISHED: &str = "finished";

// ---------------------------------------------------------------------------
// Hashing helpers
// ---------------------------------------------------------------------------

/// SHA-256 hex digest over an ordered list of fields.
///
/// Every field is prefixed with its byte length, so `("ab", "c")` and
/// `("a", "bc")` hash differently whatever bytes the fields contain.
pub fn content_hash(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn push_handle_field(handle: &mut String, field: &str) {
    for c in field.chars() {
        if c == '\\' || c == ':' {
            handle.push('\\');
        }
        handle.push(c);
    }
}

/// Cross-run identity of an issue: `code:callable:filename:line`, followed
/// by `:kind` when the issue has one.
///
/// `\` and `:` inside a field are escaped with a backslash, so two
/// different tuples never produce the same handle.
pub fn issue_handle(
    code: &str,
    callable: &str,
    filename: &str,
    line: i64,
    kind: Option<&str>,
) -> String {
    let mut handle = String::new();
    for field in [code, callable, filename] {
        push_handle_field(&mut handle, field);
        handle.push(':');
    }
    handle.push_str(&line.to_string());
    if let Some(kind) = kind.filter(|k| !k.is_empty()) {
        handle.push(':');
        push_handle_field(&mut handle, kind);
    }
    handle
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharedTextKind {
    Callable,
    Feature,
    Filename,
    Message,
}

impl SharedTextKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SharedTextKind::Callable => "callable",
            SharedTextKind::Feature => "feature",
            SharedTextKind::Filename => "filename",
            SharedTextKind::Message => "message",
        }
    }
}

/// Direction of a trace frame. Postconditions describe where taint comes
/// from (an issue's sources), preconditions where it goes (its sinks).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Postcondition,
    Precondition,
}

impl TraceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TraceKind::Postcondition => "postcondition",
            TraceKind::Precondition => "precondition",
        }
    }
}

/// Stabilized per-table row identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryKey(pub i64);

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entity tables that receive stabilized keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityTable {
    SharedTexts,
    TraceFrames,
    Issues,
}

impl EntityTable {
    pub const ALL: [EntityTable; 3] = [
        EntityTable::SharedTexts,
        EntityTable::TraceFrames,
        EntityTable::Issues,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            EntityTable::SharedTexts => "shared_texts",
            EntityTable::TraceFrames => "trace_frames",
            EntityTable::Issues => "issues",
        }
    }
}

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
        }
    }
}

/// A note emitted by a pipeline step. Collected in the run summary and
/// persisted alongside the run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub stage: String,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    pub fn info(stage: &str, message: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn warning(stage: &str, message: impl Into<String>) -> Self {
        Self {
            stage: stage.to_string(),
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Run metadata
// ---------------------------------------------------------------------------

/// Caller-supplied description of the run being analyzed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_kind: Option<String>,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub commit_hash: Option<String>,
    pub job_id: Option<String>,
    pub differential_id: Option<i64>,
}

impl RunMetadata {
    /// A differential run without an explicit job id gets a synthetic one so
    /// its runs can still be grouped.
    pub fn with_default_job_id(mut self) -> Self {
        if self.job_id.is_none() {
            if let Some(diff_id) = self.differential_id {
                self.job_id = Some(format!("user_input_{diff_id}"));
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_deterministic() {
        let a = content_hash(&["callable", "foo"]);
        let b = content_hash(&["callable", "foo"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_content_hash_field_boundaries() {
        assert_ne!(content_hash(&["ab", "c"]), content_hash(&["a", "bc"]));
        assert_ne!(content_hash(&["a"]), content_hash(&["a", ""]));
        // Control bytes inside a field cannot fake a boundary.
        assert_ne!(content_hash(&["a\u{1f}b", "c"]), content_hash(&["a", "b\u{1f}c"]));
    }

    #[test]
    fn test_issue_handle_format() {
        assert_eq!(issue_handle("T1", "foo", "a.py", 20, None), "T1:foo:a.py:20");
        assert_eq!(issue_handle("T1", "foo", "a.py", 20, Some("")), "T1:foo:a.py:20");
        assert_eq!(issue_handle("T1", "foo", "a.py", 20, Some("sql")), "T1:foo:a.py:20:sql");
    }

    #[test]
    fn test_issue_handle_escapes_separators() {
        let a = issue_handle("T1", "pkg:run", "a.py", 20, None);
        let b = issue_handle("T1", "pkg", "run:a.py", 20, None);
        assert_ne!(a, b);
        assert_eq!(a, "T1:pkg\\:run:a.py:20");

        assert_ne!(
            issue_handle("T1", "a\\", "b", 1, None),
            issue_handle("T1", "a", "\\b", 1, None),
        );
    }

    #[test]
    fn test_default_job_id_from_differential() {
        let meta = RunMetadata {
            differential_id: Some(42),
            ..Default::default()
        }
        .with_default_job_id();
        assert_eq!(meta.job_id.as_deref(), Some("user_input_42"));

        let meta = RunMetadata {
            job_id: Some("job".into()),
            differential_id: Some(42),
            ..Default::default()
        }
        .with_default_job_id();
        assert_eq!(meta.job_id.as_deref(), Some("job"));
    }
}
