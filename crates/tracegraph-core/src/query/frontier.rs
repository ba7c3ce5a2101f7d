//! Bounded breadth-first expansion over stored continuation frames.

use std::collections::{HashSet, VecDeque};

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::errors::TraceResult;
use crate::query::guards::{clamp_depth, MAX_FRONTIER_DEPTH, MAX_GRAPH_VISITED};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FrameRecord {
    pub id: i64,
    pub kind: String,
    pub caller: String,
    pub caller_port: String,
    pub callee: String,
    pub callee_port: String,
    pub filename: String,
    pub line: i64,
    /// Steps from the starting frame; the start itself is 0.
    pub depth: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Frontier {
    pub start: FrameRecord,
    /// Reachable frames in BFS order, excluding the start.
    pub frames: Vec<FrameRecord>,
    /// Set when the visit cap cut the walk short.
    pub truncated: bool,
}

const FRAME_SELECT: &str = "SELECT t.id, t.kind, COALESCE(c.contents, ''), t.caller_port, \
            COALESCE(e.contents, ''), t.callee_port, COALESCE(f.contents, ''), t.line, \
            t.callee_id \
     FROM trace_frames t \
     LEFT JOIN shared_texts c ON c.id = t.caller_id \
     LEFT JOIN shared_texts e ON e.id = t.callee_id \
     LEFT JOIN shared_texts f ON f.id = t.filename_id";

struct Hop {
    record: FrameRecord,
    callee_id: i64,
}

fn hop_from_row(row: &Row<'_>, depth: i64) -> rusqlite::Result<Hop> {
    Ok(Hop {
        record: FrameRecord {
            id: row.get(0)?,
            kind: row.get(1)?,
            caller: row.get(2)?,
            caller_port: row.get(3)?,
            callee: row.get(4)?,
            callee_port: row.get(5)?,
            filename: row.get(6)?,
            line: row.get(7)?,
            depth,
        },
        callee_id: row.get(8)?,
    })
}

/// Current frames that continue from `frame_id`, up to `max_depth` hops
/// away. Returns `None` when the frame does not exist.
pub fn frames_from_frontier(
    conn: &Connection,
    frame_id: i64,
    max_depth: i64,
) -> TraceResult<Option<Frontier>> {
    let max_depth = clamp_depth(max_depth, MAX_FRONTIER_DEPTH);
    let start = conn
        .query_row(
            &format!("{FRAME_SELECT} WHERE t.id = ?1;"),
            params![frame_id],
            |row| hop_from_row(row, 0),
        )
        .optional()?;
    let Some(start) = start else {
        return Ok(None);
    };

    let mut next_stmt = conn.prepare(&format!(
        "{FRAME_SELECT} WHERE t.is_current = 1 AND t.kind = ?1 \
           AND t.caller_id = ?2 AND t.caller_port = ?3 \
         ORDER BY t.id;"
    ))?;

    let mut visited: HashSet<i64> = HashSet::from([start.record.id]);
    let mut queue: VecDeque<(String, i64, String, i64)> = VecDeque::new();
    queue.push_back((
        start.record.kind.clone(),
        start.callee_id,
        start.record.callee_port.clone(),
        0,
    ));
    let mut frames = Vec::new();
    let mut truncated = false;

    'walk: while let Some((kind, callee_id, callee_port, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        let hops: Vec<Hop> = next_stmt
            .query_map(params![kind, callee_id, callee_port], |row| hop_from_row(row, depth + 1))?
            .collect::<rusqlite::Result<_>>()?;
        for hop in hops {
            if !visited.insert(hop.record.id) {
                continue;
            }
            if visited.len() > MAX_GRAPH_VISITED {
                truncated = true;
                break 'walk;
            }
            queue.push_back((
                hop.record.kind.clone(),
                hop.callee_id,
                hop.record.callee_port.clone(),
                depth + 1,
            ));
            frames.push(hop.record);
        }
    }

    Ok(Some(Frontier {
        start: start.record,
        frames,
        truncated,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::{frame, issue};
    use crate::models::TraceKind;
    use crate::parser::ParsedRun;
    use crate::store::test_support::seeded_store;

    fn frame_id(conn: &Connection, caller: &str, callee: &str) -> i64 {
        conn.query_row(
            "SELECT t.id FROM trace_frames t \
             JOIN shared_texts a ON a.id = t.caller_id \
             JOIN shared_texts b ON b.id = t.callee_id \
             WHERE a.contents = ?1 AND b.contents = ?2 AND t.is_current = 1;",
            [caller, callee],
            |row| row.get(0),
        )
        .unwrap()
    }

    fn chain() -> ParsedRun {
        ParsedRun {
            issues: vec![issue("foo", 20, vec![], vec![("bar", "x")])],
            preconditions: vec![
                frame(TraceKind::Precondition, "bar", "x", "baz", "y", 3),
                frame(TraceKind::Precondition, "baz", "y", "bar", "x", 4),
                frame(TraceKind::Precondition, "baz", "y", "sql", "sink", 5),
            ],
            postconditions: vec![],
        }
    }

    #[test]
    fn test_walks_continuations_and_stops_on_cycles() {
        let (_dir, db) = seeded_store(&[chain()]);
        let conn = db.connect().unwrap();
        let root = frame_id(&conn, "foo", "bar");

        let frontier = frames_from_frontier(&conn, root, 10).unwrap().unwrap();
        assert_eq!(frontier.start.caller, "foo");
        let callees: Vec<(&str, i64)> = frontier
            .frames
            .iter()
            .map(|f| (f.callee.as_str(), f.depth))
            .collect();
        assert_eq!(callees.len(), 3);
        assert_eq!(callees[0], ("baz", 1));
        assert!(callees.contains(&("sql", 2)));
        assert!(callees.contains(&("bar", 2)));
        assert!(!frontier.truncated);
    }

    #[test]
    fn test_depth_bound() {
        let (_dir, db) = seeded_store(&[chain()]);
        let conn = db.connect().unwrap();
        let root = frame_id(&conn, "foo", "bar");
        let frontier = frames_from_frontier(&conn, root, 1).unwrap().unwrap();
        assert_eq!(frontier.frames.len(), 1);
    }

    #[test]
    fn test_missing_frame() {
        let (_dir, db) = seeded_store(&[chain()]);
        let conn = db.connect().unwrap();
        assert!(frames_from_frontier(&conn, 9999, 3).unwrap().is_none());
    }
}
