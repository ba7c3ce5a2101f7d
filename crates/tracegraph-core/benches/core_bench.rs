//! Criterion benchmarks for tracegraph-core.
//!
//! ## Benchmark groups
//!
//! 1. **schema**: DDL init + migration overhead.
//! 2. **parse**: Document decoding at various issue counts.
//! 3. **graph**: Build and trim on synthetic call chains.
//! 4. **stabilize**: Key assignment against an empty and a fully matching store.
//! 5. **analyze**: The whole pipeline into an on-disk store.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/tracegraph-core/Cargo.toml
//! # Run only the graph group:
//! cargo bench --manifest-path crates/tracegraph-core/Cargo.toml -- graph
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rusqlite::Connection;
use serde_json::json;

use tracegraph_core::graph::builder::build_trace_graph;
use tracegraph_core::graph::{issue_content_hash, FrameIdx};
use tracegraph_core::graph::trim::trim_trace_graph;
use tracegraph_core::models::{PrimaryKey, RunMetadata};
use tracegraph_core::parser::document::parse_document;
use tracegraph_core::parser::{AnalysisInputs, AnalysisOutput, ParsedRun};
use tracegraph_core::stabilizer::{stabilize, PreviousKeys, TableKeys};
use tracegraph_core::store::schema::{migrate_schema, SCHEMA_STATEMENTS};
use tracegraph_core::store::Database;
use tracegraph_core::summary::RunSummary;
use tracegraph_core::{analyze, AnalyzeConfig};

const SCALES: &[usize] = &[100, 1_000, 10_000];

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `n` issues, each with a sink chain of depth 4, plus as many unreachable
/// frames for the trimmer to drop.
fn synthetic_document(n: usize) -> String {
    let mut issues = Vec::with_capacity(n);
    let mut preconditions = Vec::with_capacity(n * 4);
    for i in 0..n {
        issues.push(json!({
            "code": 5000 + (i % 7),
            "callable": format!("mod{}.handler{i}", i % 50),
            "message": "tainted data reaches sink",
            "filename": format!("src/mod{}.py", i % 50),
            "line": i + 1,
            "sources": [{"callee": "request.get", "callee_port": "result", "filename": "src/http.py", "line": 1}],
            "sinks": [{"callee": format!("helper{i}.step0"), "callee_port": "formal(x)",
                       "filename": format!("src/mod{}.py", i % 50), "line": i + 1}]
        }));
        for depth in 0..3 {
            preconditions.push(json!({
                "caller": format!("helper{i}.step{depth}"), "caller_port": "formal(x)",
                "callee": format!("helper{i}.step{}", depth + 1), "callee_port": "formal(x)",
                "filename": "src/helpers.py", "line": depth + 10,
                "features": ["via:format", format!("depth:{depth}")]
            }));
        }
        preconditions.push(json!({
            "caller": format!("dead{i}"), "caller_port": "formal(y)",
            "callee": "db.execute", "callee_port": "sink",
            "filename": "src/dead.py", "line": i + 1
        }));
    }
    json!({"version": 1, "issues": issues, "preconditions": preconditions}).to_string()
}

fn synthetic_run(n: usize) -> ParsedRun {
    parse_document(&synthetic_document(n), "bench").unwrap()
}

fn setup_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
    for stmt in SCHEMA_STATEMENTS {
        conn.execute_batch(stmt).unwrap();
    }
    migrate_schema(&conn).unwrap();
    conn
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

fn bench_schema(c: &mut Criterion) {
    c.bench_function("schema_init_and_migrate", |b| {
        b.iter(|| black_box(setup_db()));
    });
    c.bench_function("schema_migration_noop_on_current", |b| {
        let conn = setup_db();
        b.iter(|| migrate_schema(black_box(&conn)).unwrap());
    });
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for scale in SCALES {
        let doc = synthetic_document(*scale);
        group.bench_with_input(BenchmarkId::new("document", scale), &doc, |b, doc| {
            b.iter(|| parse_document(black_box(doc), "bench").unwrap());
        });
    }
    group.finish();
}

fn bench_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph");
    for scale in SCALES {
        let run = synthetic_run(*scale);
        group.bench_with_input(BenchmarkId::new("build", scale), &run, |b, run| {
            b.iter(|| build_trace_graph(black_box(run)));
        });
        let graph = build_trace_graph(&run).0;
        group.bench_with_input(BenchmarkId::new("trim", scale), &graph, |b, graph| {
            b.iter(|| trim_trace_graph(black_box(graph.clone())));
        });
    }
    group.finish();
}

fn bench_stabilize(c: &mut Criterion) {
    let mut group = c.benchmark_group("stabilize");
    for scale in SCALES {
        let graph = trim_trace_graph(build_trace_graph(&synthetic_run(*scale)).0).0;
        let (keys, _) = stabilize(&graph, &PreviousKeys::default());

        // The store as it would look right after saving `graph`.
        let table = |hashes: Vec<String>, keys: &[PrimaryKey]| TableKeys {
            live: hashes.into_iter().zip(keys.iter().copied()).collect(),
            max_allocated: keys.len() as i64,
        };
        let matching = PreviousKeys {
            shared_texts: table(graph.texts.iter().map(|t| t.content_hash()).collect(), &keys.shared_texts),
            trace_frames: table(
                (0..graph.frames.len())
                    .map(|i| graph.frame_identity(FrameIdx(i)).content_hash())
                    .collect(),
                &keys.frames,
            ),
            issues: table(
                graph.issues.iter().map(|i| issue_content_hash(&i.handle)).collect(),
                &keys.issues,
            ),
            last_run_id: Some(1),
        };

        group.bench_with_input(BenchmarkId::new("first_run", scale), &graph, |b, graph| {
            b.iter(|| stabilize(black_box(graph), &PreviousKeys::default()));
        });
        group.bench_with_input(BenchmarkId::new("unchanged_rerun", scale), &graph, |b, graph| {
            b.iter(|| stabilize(black_box(graph), &matching));
        });
    }
    group.finish();
}

fn bench_analyze(c: &mut Criterion) {
    let mut group = c.benchmark_group("analyze");
    group.sample_size(10);
    for scale in &SCALES[..2] {
        let doc = synthetic_document(*scale);
        group.bench_with_input(BenchmarkId::new("fresh_store", scale), &doc, |b, doc| {
            b.iter_with_setup(
                || {
                    let dir = tempfile::tempdir().unwrap();
                    let db = Database::new(dir.path().join("bench.db")).unwrap();
                    (dir, db)
                },
                |(_dir, db)| {
                    let inputs = AnalysisInputs::new(AnalysisOutput::from_contents("bench", doc));
                    analyze(
                        &db,
                        inputs,
                        RunSummary::new(RunMetadata::default()),
                        AnalyzeConfig::default(),
                    )
                    .unwrap()
                },
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_schema,
    bench_parse,
    bench_graph,
    bench_stabilize,
    bench_analyze
);
criterion_main!(benches);
