//! Location translation between two revisions of the analyzed code.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

use crate::errors::{TraceError, TraceResult};

/// One moved location. Locations not listed translate to themselves.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct LineMapEntry {
    pub old_file: String,
    pub old_line: i64,
    pub new_file: String,
    pub new_line: i64,
}

/// Maps current-revision locations to where they were in the previous
/// revision.
#[derive(Clone, Debug, Default)]
pub struct LineMap {
    new_to_old: HashMap<(String, i64), (String, i64)>,
}

impl LineMap {
    pub fn from_file(path: &Path) -> TraceResult<Self> {
        if !path.exists() {
            return Err(TraceError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path)?;
        let entries: Vec<LineMapEntry> = serde_json::from_str(&raw)?;
        Ok(Self::from_entries(entries))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = LineMapEntry>) -> Self {
        let mut new_to_old = HashMap::new();
        for entry in entries {
            let key = (entry.new_file, entry.new_line);
            if new_to_old.contains_key(&key) {
                warn!(file = %key.0, line = key.1, "line map lists a location twice; keeping the first");
                continue;
            }
            new_to_old.insert(key, (entry.old_file, entry.old_line));
        }
        Self { new_to_old }
    }

    pub fn len(&self) -> usize {
        self.new_to_old.len()
    }

    pub fn is_empty(&self) -> bool {
        self.new_to_old.is_empty()
    }

    /// Previous-revision location of `filename:line`.
    pub fn to_old<'a>(&'a self, filename: &'a str, line: i64) -> (&'a str, i64) {
        match self.new_to_old.get(&(filename.to_string(), line)) {
            Some((file, old_line)) => (file.as_str(), *old_line),
            None => (filename, line),
        }
    }
}
