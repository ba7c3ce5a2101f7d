//! Primary-key stabilization across runs.
//!
//! Every entity in the current graph is matched by content hash against the
//! rows that were live after the previous run. A match keeps its key; a miss
//! gets a fresh key above the highest key the table has ever handed out.
//! Keys are never recycled, so a key always names the same content.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, info};

use crate::errors::TraceResult;
use crate::graph::{issue_content_hash, FrameIdx, TraceGraph};
use crate::models::{EntityTable, PrimaryKey};
use crate::pipeline::PipelineStep;
use crate::store::Database;
use crate::summary::RunSummary;

const STAGE: &str = "stabilize";

/// Live rows of one table after the previous run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableKeys {
    /// Content hash to key.
    pub live: HashMap<String, PrimaryKey>,
    /// Highest key ever allocated in this table, live or not.
    pub max_allocated: i64,
}

/// Key state of the store as seen before this run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PreviousKeys {
    pub shared_texts: TableKeys,
    pub trace_frames: TableKeys,
    pub issues: TableKeys,
    /// Id of the newest committed run, if any. The saver refuses to commit
    /// when another run landed in between.
    pub last_run_id: Option<i64>,
}

impl PreviousKeys {
    pub fn table_mut(&mut self, table: EntityTable) -> &mut TableKeys {
        match table {
            EntityTable::SharedTexts => &mut self.shared_texts,
            EntityTable::TraceFrames => &mut self.trace_frames,
            EntityTable::Issues => &mut self.issues,
        }
    }
}

/// What happened to one table's keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableDelta {
    pub added: BTreeSet<PrimaryKey>,
    pub removed: BTreeSet<PrimaryKey>,
    pub unchanged: BTreeSet<PrimaryKey>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyDelta {
    shared_texts: TableDelta,
    trace_frames: TableDelta,
    issues: TableDelta,
}

impl KeyDelta {
    pub fn table(&self, table: EntityTable) -> &TableDelta {
        match table {
            EntityTable::SharedTexts => &self.shared_texts,
            EntityTable::TraceFrames => &self.trace_frames,
            EntityTable::Issues => &self.issues,
        }
    }

    pub fn tables(&self) -> impl Iterator<Item = (EntityTable, &TableDelta)> {
        EntityTable::ALL.into_iter().map(move |t| (t, self.table(t)))
    }

    /// Highest key this run handed out for the first time, if any.
    pub fn max_key(&self, table: EntityTable) -> Option<i64> {
        self.table(table).added.iter().next_back().map(|k| k.0)
    }
}

/// Stabilized keys, index-aligned with the graph's arenas.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityKeys {
    pub shared_texts: Vec<PrimaryKey>,
    pub frames: Vec<PrimaryKey>,
    pub issues: Vec<PrimaryKey>,
}

/// Output of the stabilizer and input of the saver.
#[derive(Clone, Debug)]
pub struct StabilizedGraph {
    pub graph: TraceGraph,
    pub keys: EntityKeys,
    pub delta: KeyDelta,
    pub previous_run_id: Option<i64>,
}

fn assign(
    hashes: impl Iterator<Item = String>,
    previous: &TableKeys,
) -> (Vec<PrimaryKey>, TableDelta) {
    let mut next = previous.max_allocated;
    let mut delta = TableDelta::default();
    let mut assigned: HashMap<String, PrimaryKey> = HashMap::new();
    let mut keys = Vec::new();

    for hash in hashes {
        if let Some(key) = assigned.get(&hash) {
            keys.push(*key);
            continue;
        }
        let key = match previous.live.get(&hash) {
            Some(key) => {
                delta.unchanged.insert(*key);
                *key
            }
            None => {
                next += 1;
                let key = PrimaryKey(next);
                delta.added.insert(key);
                key
            }
        };
        assigned.insert(hash, key);
        keys.push(key);
    }

    delta.removed = previous
        .live
        .iter()
        .filter(|(hash, _)| !assigned.contains_key(*hash))
        .map(|(_, key)| *key)
        .collect();
    (keys, delta)
}

/// Hash-join the graph against the previous keys.
///
/// New keys follow arena order, which the builder makes canonical, so the
/// same graph against the same previous state always gets the same keys.
pub fn stabilize(graph: &TraceGraph, previous: &PreviousKeys) -> (EntityKeys, KeyDelta) {
    let (shared_texts, text_delta) = assign(
        graph.texts.iter().map(|t| t.content_hash()),
        &previous.shared_texts,
    );
    let (frames, frame_delta) = assign(
        (0..graph.frames.len()).map(|i| graph.frame_identity(FrameIdx(i)).content_hash()),
        &previous.trace_frames,
    );
    let (issues, issue_delta) = assign(
        graph.issues.iter().map(|i| issue_content_hash(&i.handle)),
        &previous.issues,
    );
    (
        EntityKeys {
            shared_texts,
            frames,
            issues,
        },
        KeyDelta {
            shared_texts: text_delta,
            trace_frames: frame_delta,
            issues: issue_delta,
        },
    )
}

/// Pipeline step: loads the previous key state from the store and keys the
/// graph against it.
#[derive(Clone, Debug)]
pub struct PrimaryKeyStabilizer {
    db: Database,
}

impl PrimaryKeyStabilizer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl PipelineStep<TraceGraph, StabilizedGraph, RunSummary> for PrimaryKeyStabilizer {
    fn name(&self) -> &'static str {
        STAGE
    }

    fn run(&mut self, graph: TraceGraph, summary: &mut RunSummary) -> TraceResult<StabilizedGraph> {
        let previous = self.db.load_previous_keys()?;
        debug!(
            live_texts = previous.shared_texts.live.len(),
            live_frames = previous.trace_frames.live.len(),
            live_issues = previous.issues.live.len(),
            "loaded previous keys"
        );
        let (keys, delta) = stabilize(&graph, &previous);
        summary.record_delta(&delta);
        for (table, sets) in delta.tables() {
            info!(
                table = table.table_name(),
                added = sets.added.len(),
                removed = sets.removed.len(),
                unchanged = sets.unchanged.len(),
                "stabilized keys"
            );
        }
        Ok(StabilizedGraph {
            graph,
            keys,
            delta,
            previous_run_id: previous.last_run_id,
        })
    }
}
