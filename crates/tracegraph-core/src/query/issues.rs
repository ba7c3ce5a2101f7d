//! Issue lookups by run and by handle.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::errors::TraceResult;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IssueRecord {
    pub id: i64,
    pub handle: String,
    pub code: String,
    pub callable: String,
    pub message: String,
    pub filename: String,
    pub line: i64,
    pub is_current: bool,
    pub first_seen_run_id: i64,
    pub last_seen_run_id: i64,
}

// Texts of a retired issue may be gone when history retention was switched
// off later, hence the outer joins.
const ISSUE_SELECT: &str = "SELECT i.id, i.handle, i.code, \
            COALESCE(c.contents, ''), COALESCE(m.contents, ''), COALESCE(f.contents, ''), \
            i.line, i.is_current, i.first_seen_run_id, i.run_id \
     FROM issues i \
     LEFT JOIN shared_texts c ON c.id = i.callable_id \
     LEFT JOIN shared_texts m ON m.id = i.message_id \
     LEFT JOIN shared_texts f ON f.id = i.filename_id";

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<IssueRecord> {
    Ok(IssueRecord {
        id: row.get(0)?,
        handle: row.get(1)?,
        code: row.get(2)?,
        callable: row.get(3)?,
        message: row.get(4)?,
        filename: row.get(5)?,
        line: row.get(6)?,
        is_current: row.get::<_, i64>(7)? != 0,
        first_seen_run_id: row.get(8)?,
        last_seen_run_id: row.get(9)?,
    })
}

/// Issues present in `run_id`, ordered by handle.
///
/// A key lives for one unbroken stretch of runs (a returning issue gets a
/// fresh key), so presence is `first_seen <= run_id <= last_seen`. Runs
/// whose rows were deleted with history retention off are not recoverable.
pub fn list_issues(conn: &Connection, run_id: i64) -> TraceResult<Vec<IssueRecord>> {
    let mut stmt = conn.prepare(&format!(
        "{ISSUE_SELECT} WHERE i.first_seen_run_id <= ?1 AND i.run_id >= ?1 ORDER BY i.handle;"
    ))?;
    let rows = stmt.query_map(params![run_id], issue_from_row)?;
    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }
    Ok(issues)
}

/// The newest row for `handle`, current or not.
pub fn issue_by_handle(conn: &Connection, handle: &str) -> TraceResult<Option<IssueRecord>> {
    let issue = conn
        .query_row(
            &format!("{ISSUE_SELECT} WHERE i.handle = ?1 ORDER BY i.is_current DESC, i.id DESC LIMIT 1;"),
            params![handle],
            issue_from_row,
        )
        .optional()?;
    Ok(issue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::issue;
    use crate::parser::ParsedRun;
    use crate::store::test_support::seeded_store;

    fn run(callables: &[&str]) -> ParsedRun {
        ParsedRun {
            issues: callables.iter().map(|c| issue(c, 1, vec![], vec![])).collect(),
            ..Default::default()
        }
    }

    fn handles(issues: &[IssueRecord]) -> Vec<&str> {
        issues.iter().map(|i| i.handle.as_str()).collect()
    }

    #[test]
    fn test_list_issues_per_run() {
        let (_dir, db) = seeded_store(&[run(&["a", "b"]), run(&["b", "c"])]);
        let conn = db.connect().unwrap();

        assert_eq!(handles(&list_issues(&conn, 1).unwrap()), vec!["T1:a:a.py:1", "T1:b:a.py:1"]);
        assert_eq!(handles(&list_issues(&conn, 2).unwrap()), vec!["T1:b:a.py:1", "T1:c:a.py:1"]);
        assert!(list_issues(&conn, 3).unwrap().is_empty());
    }

    #[test]
    fn test_issue_by_handle_resolves_texts() {
        let (_dir, db) = seeded_store(&[run(&["a", "b"]), run(&["b"])]);
        let conn = db.connect().unwrap();

        let b = issue_by_handle(&conn, "T1:b:a.py:1").unwrap().unwrap();
        assert_eq!((b.callable.as_str(), b.filename.as_str(), b.message.as_str()), ("b", "a.py", "flow"));
        assert!(b.is_current);
        assert_eq!((b.first_seen_run_id, b.last_seen_run_id), (1, 2));

        let a = issue_by_handle(&conn, "T1:a:a.py:1").unwrap().unwrap();
        assert!(!a.is_current);
        assert_eq!(a.last_seen_run_id, 1);

        assert!(issue_by_handle(&conn, "T1:zzz:a.py:1").unwrap().is_none());
    }
}
