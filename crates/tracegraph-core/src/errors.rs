//! Error types for the trace-graph core.

use std::path::PathBuf;

/// Top-level error enum for the trace-graph core.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// The input document carries no version marker, or one we do not read.
    #[error("Schema error: {0}")]
    Schema(String),

    /// A required field is missing from an issue or frame record.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A file requested on the command line or in the inputs does not exist.
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The save transaction failed and was rolled back.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TraceError {
    pub fn malformed(context: impl Into<String>, field: &str) -> Self {
        TraceError::MalformedInput(format!("{} is missing required field `{field}`", context.into()))
    }

    /// True for failures raised while persisting. The saver rolls back on
    /// every one of these.
    pub fn is_storage(&self) -> bool {
        matches!(self, TraceError::Storage(_) | TraceError::Sqlite(_))
    }
}

pub type TraceResult<T> = Result<T, TraceError>;
