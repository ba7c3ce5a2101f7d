//! Locating and decoding the shards that make up one run's output.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::errors::{TraceError, TraceResult};
use crate::models::Diagnostic;
use crate::parser::document::parse_document;
use crate::parser::{ensure_exists, ParsedRun};

const STAGE: &str = "parse";

#[derive(Clone, Debug)]
enum Shard {
    File(PathBuf),
    Inline { name: String, contents: String },
}

impl Shard {
    fn origin(&self) -> String {
        match self {
            Shard::File(path) => path.display().to_string(),
            Shard::Inline { name, .. } => name.clone(),
        }
    }

    fn read(&self) -> TraceResult<String> {
        match self {
            Shard::File(path) => Ok(std::fs::read_to_string(path)?),
            Shard::Inline { contents, .. } => Ok(contents.clone()),
        }
    }
}

/// One run's analysis output: a single document or a set of shards.
#[derive(Clone, Debug)]
pub struct AnalysisOutput {
    shards: Vec<Shard>,
}

impl AnalysisOutput {
    /// A file is one document; a directory holds one `*.json` document per
    /// shard, read in sorted path order.
    pub fn from_path(path: impl AsRef<Path>) -> TraceResult<Self> {
        let path = path.as_ref();
        ensure_exists(path)?;
        if path.is_file() {
            return Ok(Self {
                shards: vec![Shard::File(path.to_path_buf())],
            });
        }

        let mut files: Vec<PathBuf> = WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(e) => Some(e),
                Err(e) => {
                    warn!("skipping unreadable shard entry: {e}");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(TraceError::NotFound(path.join("*.json")));
        }
        Ok(Self {
            shards: files.into_iter().map(Shard::File).collect(),
        })
    }

    pub fn from_contents(name: &str, contents: &str) -> Self {
        Self::from_shards([(name, contents)])
    }

    pub fn from_shards<'a>(shards: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            shards: shards
                .into_iter()
                .map(|(name, contents)| Shard::Inline {
                    name: name.to_string(),
                    contents: contents.to_string(),
                })
                .collect(),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub(crate) fn check_exists(&self) -> TraceResult<()> {
        for shard in &self.shards {
            if let Shard::File(path) = shard {
                ensure_exists(path)?;
            }
        }
        Ok(())
    }

    /// Decode every shard on a worker pool and merge them in shard order.
    pub fn parse(&self, workers: usize) -> TraceResult<(ParsedRun, Vec<Diagnostic>)> {
        let diagnostics = Mutex::new(Vec::new());
        let parse_one = |shard: &Shard| -> TraceResult<ParsedRun> {
            let origin = shard.origin();
            let run = parse_document(&shard.read()?, &origin)?;
            for issue in &run.issues {
                if issue.sources.is_empty() && issue.sinks.is_empty() {
                    diagnostics.lock().push(Diagnostic::warning(
                        STAGE,
                        format!("{origin}: issue {} has no source or sink frames", issue.handle),
                    ));
                }
            }
            debug!(shard = %origin, issues = run.issues.len(), "decoded shard");
            Ok(run)
        };

        let results: Vec<TraceResult<ParsedRun>> = if self.shards.len() <= 1 {
            self.shards.iter().map(parse_one).collect()
        } else {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(workers.max(1))
                .build()
            {
                Ok(pool) => pool.install(|| self.shards.par_iter().map(parse_one).collect()),
                Err(e) => {
                    warn!("falling back to sequential shard parsing: {e}");
                    self.shards.iter().map(parse_one).collect()
                }
            }
        };

        let mut merged = ParsedRun::default();
        for result in results {
            merged.merge(result?);
        }
        let mut diagnostics = diagnostics.into_inner();
        diagnostics.sort_by(|a, b| a.message.cmp(&b.message));
        Ok((merged, diagnostics))
    }
}
