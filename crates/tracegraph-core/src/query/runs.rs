//! Run history lookups.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::errors::TraceResult;
use crate::query::guards::{clamp_limit, MAX_LIST_LIMIT};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub run_kind: Option<String>,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub commit_hash: Option<String>,
    pub job_id: Option<String>,
    pub differential_id: Option<i64>,
    pub status: String,
    pub started_at: String,
    pub finished_at: String,
    pub added_count: i64,
    pub removed_count: i64,
    pub unchanged_count: i64,
    pub new_issue_count: Option<i64>,
    pub fixed_issue_count: Option<i64>,
    pub unchanged_issue_count: Option<i64>,
}

const RUN_COLUMNS: &str = "id, run_kind, repository, branch, commit_hash, job_id, differential_id, \
     status, started_at, finished_at, added_count, removed_count, unchanged_count, \
     new_issue_count, fixed_issue_count, unchanged_issue_count";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        run_kind: row.get(1)?,
        repository: row.get(2)?,
        branch: row.get(3)?,
        commit_hash: row.get(4)?,
        job_id: row.get(5)?,
        differential_id: row.get(6)?,
        status: row.get(7)?,
        started_at: row.get(8)?,
        finished_at: row.get(9)?,
        added_count: row.get(10)?,
        removed_count: row.get(11)?,
        unchanged_count: row.get(12)?,
        new_issue_count: row.get(13)?,
        fixed_issue_count: row.get(14)?,
        unchanged_issue_count: row.get(15)?,
    })
}

pub fn latest_run(conn: &Connection) -> TraceResult<Option<RunRecord>> {
    let run = conn
        .query_row(
            &format!("SELECT {RUN_COLUMNS} FROM runs ORDER BY id DESC LIMIT 1;"),
            [],
            run_from_row,
        )
        .optional()?;
    Ok(run)
}

/// Newest first.
pub fn list_runs(conn: &Connection, limit: i64) -> TraceResult<Vec<RunRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RUN_COLUMNS} FROM runs ORDER BY id DESC LIMIT ?1;"
    ))?;
    let rows = stmt.query_map(params![clamp_limit(limit, MAX_LIST_LIMIT)], run_from_row)?;
    let mut runs = Vec::new();
    for row in rows {
        runs.push(row?);
    }
    Ok(runs)
}

/// Stored summary JSON of one run.
pub fn run_summary_json(conn: &Connection, run_id: i64) -> TraceResult<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT summary_json FROM runs WHERE id = ?1;",
            params![run_id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}
