//! Atomic persistence of one stabilized run.

use std::time::Instant;

use chrono::Utc;
use rusqlite::{params, Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::config::SaverConfig;
use crate::errors::{TraceError, TraceResult};
use crate::graph::{issue_content_hash, FrameIdx, TextIdx};
use crate::models::{EntityTable, PrimaryKey, TraceKind, RUN_STATUS_FINISHED};
use crate::pipeline::{PipelineStep, StepTimings};
use crate::stabilizer::StabilizedGraph;
use crate::store::database::{last_run_id, max_key_meta, set_meta, Database};
use crate::summary::RunSummary;

const STAGE: &str = "save";

/// Pipeline step that writes the run in a single `BEGIN IMMEDIATE`
/// transaction. Returns the new run id.
#[derive(Clone, Debug)]
pub struct DatabaseSaver {
    db: Database,
    config: SaverConfig,
}

impl DatabaseSaver {
    pub fn new(db: Database, config: SaverConfig) -> Self {
        Self { db, config }
    }

    fn save(&self, input: &StabilizedGraph, summary: &mut RunSummary) -> TraceResult<i64> {
        let started = Instant::now();
        let mut conn = self.db.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let latest = last_run_id(&tx)?;
        if latest != input.previous_run_id {
            return Err(TraceError::Storage(format!(
                "store moved from run {:?} to {:?} while this run was being keyed",
                input.previous_run_id, latest
            )));
        }
        let run_id = latest.unwrap_or(0) + 1;

        write_shared_texts(&tx, input, run_id)?;
        write_frames(&tx, input, run_id)?;
        write_issues(&tx, input, run_id)?;
        let retired = retire_removed(&tx, input, self.config.retain_history)?;
        for table in EntityTable::ALL {
            if let Some(max) = input.delta.max_key(table) {
                set_meta(&tx, &max_key_meta(table), &max.to_string())?;
            }
        }

        summary.run_id = Some(run_id);
        write_diagnostics(&tx, run_id, summary)?;
        // The driver times this step only after it returns; the stored
        // summary gets the time spent up to the run row instead.
        summary.record_step_timing(STAGE, started.elapsed().as_millis() as u64);
        write_run(&tx, run_id, summary)?;

        tx.commit()?;
        debug!(run_id, retired, "save transaction committed");
        Ok(run_id)
    }
}

impl PipelineStep<StabilizedGraph, i64, RunSummary> for DatabaseSaver {
    fn name(&self) -> &'static str {
        STAGE
    }

    fn run(&mut self, input: StabilizedGraph, summary: &mut RunSummary) -> TraceResult<i64> {
        match self.save(&input, summary) {
            Ok(run_id) => {
                info!(
                    run_id,
                    issues = input.graph.issues.len(),
                    frames = input.graph.frames.len(),
                    "saved run"
                );
                Ok(run_id)
            }
            Err(err) => {
                // The transaction was dropped uncommitted, so nothing landed.
                summary.run_id = None;
                warn!(error = %err, "save rolled back");
                Err(match err {
                    TraceError::Sqlite(e) => TraceError::Storage(e.to_string()),
                    other => other,
                })
            }
        }
    }
}

fn write_shared_texts(conn: &Connection, input: &StabilizedGraph, run_id: i64) -> TraceResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO shared_texts (id, content_hash, kind, contents, is_current, run_id) \
         VALUES (?1, ?2, ?3, ?4, 1, ?5) \
         ON CONFLICT(id) DO UPDATE SET is_current = 1, run_id = excluded.run_id;",
    )?;
    for (text, key) in input.graph.texts.iter().zip(&input.keys.shared_texts) {
        stmt.execute(params![
            key.0,
            text.content_hash(),
            text.kind.as_str(),
            text.contents,
            run_id
        ])?;
    }
    Ok(())
}

fn write_frames(conn: &Connection, input: &StabilizedGraph, run_id: i64) -> TraceResult<()> {
    let graph = &input.graph;
    let text_key = |idx: TextIdx| input.keys.shared_texts[idx.0].0;

    let mut upsert = conn.prepare(
        "INSERT INTO trace_frames ( \
             id, content_hash, kind, caller_id, caller_port, callee_id, callee_port, \
             filename_id, line, is_current, run_id \
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 1, ?10) \
         ON CONFLICT(id) DO UPDATE SET is_current = 1, run_id = excluded.run_id;",
    )?;
    let mut clear_features = conn.prepare("DELETE FROM trace_frame_features WHERE frame_id = ?1;")?;
    let mut add_feature = conn.prepare(
        "INSERT OR IGNORE INTO trace_frame_features (frame_id, feature_id) VALUES (?1, ?2);",
    )?;

    for (i, (frame, key)) in graph.frames.iter().zip(&input.keys.frames).enumerate() {
        let hash = graph.frame_identity(FrameIdx(i)).content_hash();
        upsert.execute(params![
            key.0,
            hash,
            frame.kind.as_str(),
            text_key(frame.caller),
            frame.caller_port,
            text_key(frame.callee),
            frame.callee_port,
            text_key(frame.filename),
            frame.line,
            run_id
        ])?;
        // Features are not part of identity; the latest run's set wins.
        clear_features.execute(params![key.0])?;
        for feature in &frame.features {
            add_feature.execute(params![key.0, text_key(*feature)])?;
        }
    }
    Ok(())
}

fn write_issues(conn: &Connection, input: &StabilizedGraph, run_id: i64) -> TraceResult<()> {
    let graph = &input.graph;
    let text_key = |idx: TextIdx| input.keys.shared_texts[idx.0].0;
    let frame_key = |idx: FrameIdx| input.keys.frames[idx.0].0;

    let mut upsert = conn.prepare(
        "INSERT INTO issues ( \
             id, content_hash, handle, code, callable_id, message_id, filename_id, line, \
             is_current, run_id, first_seen_run_id \
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1, ?9, ?9) \
         ON CONFLICT(id) DO UPDATE SET \
             message_id = excluded.message_id, \
             is_current = 1, \
             run_id = excluded.run_id;",
    )?;
    let mut clear_roots = conn.prepare("DELETE FROM issue_frame_roots WHERE issue_id = ?1;")?;
    let mut add_root = conn.prepare(
        "INSERT OR IGNORE INTO issue_frame_roots (issue_id, frame_id, kind) VALUES (?1, ?2, ?3);",
    )?;

    for (issue, key) in graph.issues.iter().zip(&input.keys.issues) {
        upsert.execute(params![
            key.0,
            issue_content_hash(&issue.handle),
            issue.handle,
            issue.code,
            text_key(issue.callable),
            text_key(issue.message),
            text_key(issue.filename),
            issue.line,
            run_id
        ])?;
        clear_roots.execute(params![key.0])?;
        for root in &issue.source_roots {
            add_root.execute(params![key.0, frame_key(*root), TraceKind::Postcondition.as_str()])?;
        }
        for root in &issue.sink_roots {
            add_root.execute(params![key.0, frame_key(*root), TraceKind::Precondition.as_str()])?;
        }
    }
    Ok(())
}

/// Mark removed rows not current, or delete them with their links when
/// history is not retained. Returns the number of rows touched.
fn retire_removed(conn: &Connection, input: &StabilizedGraph, retain_history: bool) -> TraceResult<usize> {
    let mut touched = 0;
    for (table, sets) in input.delta.tables() {
        if sets.removed.is_empty() {
            continue;
        }
        let name = table.table_name();
        let sql = if retain_history {
            format!("UPDATE {name} SET is_current = 0 WHERE id = ?1;")
        } else {
            format!("DELETE FROM {name} WHERE id = ?1;")
        };
        let mut stmt = conn.prepare(&sql)?;
        let mut unlink = match (retain_history, table) {
            (false, EntityTable::TraceFrames) => Some(conn.prepare(
                "DELETE FROM trace_frame_features WHERE frame_id = ?1;",
            )?),
            (false, EntityTable::Issues) => Some(conn.prepare(
                "DELETE FROM issue_frame_roots WHERE issue_id = ?1;",
            )?),
            _ => None,
        };
        for PrimaryKey(key) in &sets.removed {
            touched += stmt.execute(params![key])?;
            if let Some(unlink) = unlink.as_mut() {
                unlink.execute(params![key])?;
            }
        }
    }
    Ok(touched)
}

fn write_diagnostics(conn: &Connection, run_id: i64, summary: &RunSummary) -> TraceResult<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO run_diagnostics (run_id, stage, severity, message) VALUES (?1, ?2, ?3, ?4);",
    )?;
    for diagnostic in &summary.diagnostics {
        stmt.execute(params![
            run_id,
            diagnostic.stage,
            diagnostic.severity.as_str(),
            diagnostic.message
        ])?;
    }
    Ok(())
}

fn write_run(conn: &Connection, run_id: i64, summary: &RunSummary) -> TraceResult<()> {
    let totals = summary
        .entity_delta
        .values()
        .fold((0usize, 0usize, 0usize), |acc, counts| {
            (acc.0 + counts.added, acc.1 + counts.removed, acc.2 + counts.unchanged)
        });
    let diff = summary.issue_diff.as_ref();
    let meta = &summary.metadata;
    conn.execute(
        "INSERT INTO runs ( \
             id, run_kind, repository, branch, commit_hash, job_id, differential_id, \
             status, started_at, finished_at, added_count, removed_count, unchanged_count, \
             new_issue_count, fixed_issue_count, unchanged_issue_count, summary_json \
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17);",
        params![
            run_id,
            meta.run_kind,
            meta.repository,
            meta.branch,
            meta.commit_hash,
            meta.job_id,
            meta.differential_id,
            RUN_STATUS_FINISHED,
            summary.started_at.to_rfc3339(),
            Utc::now().to_rfc3339(),
            totals.0 as i64,
            totals.1 as i64,
            totals.2 as i64,
            diff.map(|d| d.new.len() as i64),
            diff.map(|d| d.fixed.len() as i64),
            diff.map(|d| d.unchanged.len() as i64),
            serde_json::to_string(summary)?,
        ],
    )?;
    Ok(())
}
