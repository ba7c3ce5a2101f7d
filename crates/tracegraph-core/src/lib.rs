//! Trace-graph postprocessing core.
//!
//! Turns a static-analysis run's output (issues plus the pre/postcondition
//! frames that explain them) into a compact, deduplicated trace graph, gives
//! every entity a primary key that stays stable across runs, and commits the
//! run to a SQLite store in one transaction. Optionally classifies issues as
//! new, fixed or unchanged against a previous run.
//!
//! The stages are ordinary [`pipeline::PipelineStep`]s:
//! parse → build → trim → stabilize → save.

pub mod config;
pub mod diff;
pub mod errors;
pub mod graph;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod query;
pub mod stabilizer;
pub mod store;
pub mod summary;

use crate::config::{ParserConfig, SaverConfig};
use crate::errors::TraceResult;
use crate::graph::{TraceGraphBuilder, TrimTraceGraph};
use crate::parser::{AnalysisInputs, AnalysisOutputParser};
use crate::pipeline::Pipeline;
use crate::stabilizer::PrimaryKeyStabilizer;
use crate::store::{Database, DatabaseSaver};
use crate::summary::RunSummary;

pub use crate::errors::TraceError;

/// Knobs for one [`analyze`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AnalyzeConfig {
    pub parser: ParserConfig,
    pub saver: SaverConfig,
}

impl AnalyzeConfig {
    pub fn from_env() -> Self {
        Self {
            parser: ParserConfig::from_env(),
            saver: SaverConfig::from_env(),
        }
    }
}

/// The standard pipeline, writing into `db`.
pub fn analysis_pipeline<'a>(
    db: &Database,
    config: AnalyzeConfig,
) -> Pipeline<'a, AnalysisInputs, i64, RunSummary> {
    Pipeline::new(AnalysisOutputParser::new(config.parser))
        .then(TraceGraphBuilder)
        .then(TrimTraceGraph)
        .then(PrimaryKeyStabilizer::new(db.clone()))
        .then(DatabaseSaver::new(db.clone(), config.saver))
}

/// Run the whole pipeline once. The store schema is created or migrated
/// first. On success the returned summary carries the new run id.
pub fn analyze(
    db: &Database,
    inputs: AnalysisInputs,
    summary: RunSummary,
    config: AnalyzeConfig,
) -> TraceResult<RunSummary> {
    db.init_schema()?;
    let (_run_id, summary) = analysis_pipeline(db, config).run(inputs, summary)?;
    Ok(summary)
}
