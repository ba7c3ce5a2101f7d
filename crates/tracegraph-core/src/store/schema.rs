//! SQLite schema DDL and migration framework.

use rusqlite::Connection;

use crate::errors::TraceResult;

/// Current schema version. Migrations run from whatever the store currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 2;

/// Every table the store owns, in creation order.
pub const TABLES: &[&str] = &[
    "store_meta",
    "runs",
    "shared_texts",
    "trace_frames",
    "trace_frame_features",
    "issues",
    "issue_frame_roots",
    "run_diagnostics",
    "migration_history",
];

/// Core DDL. Executed with `IF NOT EXISTS` so it is safe to replay on an
/// already-initialised store.
///
/// Entity tables take their `id` from the stabilizer, never from SQLite.
/// `content_hash` is not unique: a retired row keeps its hash after the
/// same content comes back under a fresh key.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS runs (
        id INTEGER PRIMARY KEY,
        run_kind TEXT,
        repository TEXT,
        branch TEXT,
        commit_hash TEXT,
        job_id TEXT,
        differential_id INTEGER,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT NOT NULL,
        added_count INTEGER NOT NULL DEFAULT 0,
        removed_count INTEGER NOT NULL DEFAULT 0,
        unchanged_count INTEGER NOT NULL DEFAULT 0,
        new_issue_count INTEGER,
        fixed_issue_count INTEGER,
        unchanged_issue_count INTEGER,
        summary_json TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS shared_texts (
        id INTEGER PRIMARY KEY,
        content_hash TEXT NOT NULL,
        kind TEXT NOT NULL,
        contents TEXT NOT NULL,
        is_current INTEGER NOT NULL DEFAULT 1,
        run_id INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS trace_frames (
        id INTEGER PRIMARY KEY,
        content_hash TEXT NOT NULL,
        kind TEXT NOT NULL,
        caller_id INTEGER NOT NULL,
        caller_port TEXT NOT NULL,
        callee_id INTEGER NOT NULL,
        callee_port TEXT NOT NULL,
        filename_id INTEGER NOT NULL,
        line INTEGER NOT NULL,
        is_current INTEGER NOT NULL DEFAULT 1,
        run_id INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS trace_frame_features (
        frame_id INTEGER NOT NULL,
        feature_id INTEGER NOT NULL,
        PRIMARY KEY(frame_id, feature_id)
    );",
    "CREATE TABLE IF NOT EXISTS issues (
        id INTEGER PRIMARY KEY,
        content_hash TEXT NOT NULL,
        handle TEXT NOT NULL,
        code TEXT NOT NULL,
        callable_id INTEGER NOT NULL,
        message_id INTEGER NOT NULL,
        filename_id INTEGER NOT NULL,
        line INTEGER NOT NULL,
        is_current INTEGER NOT NULL DEFAULT 1,
        run_id INTEGER NOT NULL,
        first_seen_run_id INTEGER NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS issue_frame_roots (
        issue_id INTEGER NOT NULL,
        frame_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        PRIMARY KEY(issue_id, frame_id)
    );",
    "CREATE TABLE IF NOT EXISTS run_diagnostics (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id INTEGER NOT NULL,
        stage TEXT NOT NULL,
        severity TEXT NOT NULL,
        message TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE INDEX IF NOT EXISTS idx_shared_texts_current ON shared_texts(is_current, content_hash);",
    "CREATE INDEX IF NOT EXISTS idx_trace_frames_current ON trace_frames(is_current, content_hash);",
    "CREATE INDEX IF NOT EXISTS idx_issues_current ON issues(is_current, content_hash);",
    "CREATE INDEX IF NOT EXISTS idx_issues_handle ON issues(handle);",
    "CREATE INDEX IF NOT EXISTS idx_issue_roots_frame ON issue_frame_roots(frame_id);",
    "CREATE INDEX IF NOT EXISTS idx_run_diagnostics_run ON run_diagnostics(run_id);",
];

// ─── Migration framework ────────────────────────────────────────────────────

/// Run all pending migrations from the current stored version up to
/// [`SCHEMA_VERSION`]. Each step is wrapped in a SAVEPOINT so a failure rolls
/// back only that single step.
pub fn migrate_schema(conn: &Connection) -> TraceResult<()> {
    let mut current_version = get_schema_version(conn);

    while current_version < SCHEMA_VERSION {
        let next_version = current_version + 1;
        conn.execute_batch("SAVEPOINT tracegraph_migrate_step;")?;

        let step_result = (|| -> TraceResult<()> {
            match next_version {
                1 => migrate_to_v1(conn)?,
                2 => migrate_to_v2(conn)?,
                _ => {}
            }
            set_schema_version(conn, next_version)?;
            record_migration_step(conn, current_version, next_version, "success", None)?;
            conn.execute_batch("RELEASE SAVEPOINT tracegraph_migrate_step;")?;
            Ok(())
        })();

        match step_result {
            Ok(()) => {
                current_version = next_version;
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK TO SAVEPOINT tracegraph_migrate_step;");
                let _ = conn.execute_batch("RELEASE SAVEPOINT tracegraph_migrate_step;");
                let _ = record_migration_step(
                    conn,
                    current_version,
                    next_version,
                    "failed",
                    Some(&e.to_string()),
                );
                return Err(e);
            }
        }
    }

    Ok(())
}

/// Read the current schema version from `store_meta`.
/// Returns 0 when the key is absent or unparseable.
pub(crate) fn get_schema_version(conn: &Connection) -> i32 {
    let result: Result<String, _> = conn.query_row(
        "SELECT value FROM store_meta WHERE key = 'schema_version';",
        [],
        |row| row.get(0),
    );
    match result {
        Ok(v) => v.parse::<i32>().unwrap_or(0),
        Err(_) => 0,
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> TraceResult<()> {
    conn.execute(
        "INSERT INTO store_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        rusqlite::params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from_v: i32,
    to_v: i32,
    status: &str,
    error_msg: Option<&str>,
) -> TraceResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        rusqlite::params![from_v, to_v, status, error_msg],
    )?;
    Ok(())
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: baseline, created by SCHEMA_STATEMENTS.
fn migrate_to_v1(_conn: &Connection) -> TraceResult<()> {
    Ok(())
}

/// v1 -> v2: continuation lookups by frame start, used by frontier queries.
fn migrate_to_v2(conn: &Connection) -> TraceResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_trace_frames_start \
         ON trace_frames(kind, caller_id, caller_port);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn
    }

    #[test]
    fn test_every_table_is_created() {
        let conn = fresh();
        for table in TABLES {
            let found: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1;",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(found, 1, "missing table {table}");
        }
    }

    #[test]
    fn test_migrate_fresh_database() {
        let conn = fresh();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let steps: i64 = conn
            .query_row("SELECT COUNT(*) FROM migration_history WHERE status = 'success';", [], |row| row.get(0))
            .unwrap();
        assert_eq!(steps, SCHEMA_VERSION as i64);
    }

    #[test]
    fn test_migrate_idempotent() {
        let conn = fresh();
        migrate_schema(&conn).unwrap();
        migrate_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }

    #[test]
    fn test_upgrade_from_v1_adds_start_index() {
        let conn = fresh();
        conn.execute_batch("INSERT INTO store_meta(key, value) VALUES('schema_version', '1');")
            .unwrap();
        migrate_schema(&conn).unwrap();
        let found: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_trace_frames_start';",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(found, 1);
    }
}
