//! Builds the per-run trace graph from parsed records.
//!
//! Strings are interned by content hash and frames deduplicated by their
//! identity tuple. The arena is laid out in sorted identity order, so the
//! result depends only on the set of parsed records, never on the order
//! shards or records arrived in.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::info;

use crate::errors::TraceResult;
use crate::graph::{FrameIdentity, FrameIdx, Issue, SharedText, TextIdx, TraceFrame, TraceGraph};
use crate::models::{Diagnostic, SharedTextKind};
use crate::parser::{ParsedFrame, ParsedRun};
use crate::pipeline::PipelineStep;
use crate::summary::RunSummary;

const STAGE: &str = "build";

#[derive(Default)]
struct Interner {
    by_hash: HashMap<String, SharedText>,
}

impl Interner {
    fn intern(&mut self, kind: SharedTextKind, contents: &str) {
        let text = SharedText::new(kind, contents);
        self.by_hash.entry(text.content_hash()).or_insert(text);
    }

    /// Sorted texts plus the lookup from content hash to arena index.
    fn finish(self) -> (Vec<SharedText>, HashMap<String, TextIdx>) {
        let mut texts: Vec<(String, SharedText)> = self.by_hash.into_iter().collect();
        texts.sort_by(|a, b| a.1.cmp(&b.1));
        let index = texts
            .iter()
            .enumerate()
            .map(|(i, (hash, _))| (hash.clone(), TextIdx(i)))
            .collect();
        (texts.into_iter().map(|(_, t)| t).collect(), index)
    }
}

struct PendingIssue {
    code: String,
    callable: String,
    filename: String,
    line: i64,
    messages: BTreeSet<String>,
    sources: BTreeSet<FrameIdentity>,
    sinks: BTreeSet<FrameIdentity>,
}

fn identity(frame: &ParsedFrame) -> FrameIdentity {
    FrameIdentity {
        kind: frame.kind,
        caller: frame.caller.clone(),
        callee: frame.callee.clone(),
        caller_port: frame.caller_port.clone(),
        callee_port: frame.callee_port.clone(),
        filename: frame.filename.clone(),
        line: frame.line,
    }
}

/// Build the graph. Also returns notes about merged duplicates.
pub fn build_trace_graph(run: &ParsedRun) -> (TraceGraph, Vec<Diagnostic>) {
    let mut diagnostics = Vec::new();
    let mut frames: BTreeMap<FrameIdentity, BTreeSet<String>> = BTreeMap::new();
    let mut issues: BTreeMap<String, PendingIssue> = BTreeMap::new();
    let mut duplicate_frames = 0usize;

    let mut add_frame = |frame: &ParsedFrame| -> FrameIdentity {
        let id = identity(frame);
        match frames.get_mut(&id) {
            Some(features) => {
                duplicate_frames += 1;
                features.extend(frame.features.iter().cloned());
            }
            None => {
                frames.insert(id.clone(), frame.features.iter().cloned().collect());
            }
        }
        id
    };

    for frame in run.preconditions.iter().chain(run.postconditions.iter()) {
        add_frame(frame);
    }
    for parsed in &run.issues {
        let sources: BTreeSet<FrameIdentity> = parsed.sources.iter().map(&mut add_frame).collect();
        let sinks: BTreeSet<FrameIdentity> = parsed.sinks.iter().map(&mut add_frame).collect();
        match issues.get_mut(&parsed.handle) {
            Some(pending) => {
                pending.messages.insert(parsed.message.clone());
                pending.sources.extend(sources);
                pending.sinks.extend(sinks);
            }
            None => {
                issues.insert(
                    parsed.handle.clone(),
                    PendingIssue {
                        code: parsed.code.clone(),
                        callable: parsed.callable.clone(),
                        filename: parsed.filename.clone(),
                        line: parsed.line,
                        messages: BTreeSet::from([parsed.message.clone()]),
                        sources,
                        sinks,
                    },
                );
            }
        }
    }
    if duplicate_frames > 0 {
        diagnostics.push(Diagnostic::info(
            STAGE,
            format!("merged {duplicate_frames} duplicate trace frames"),
        ));
    }
    let reported: usize = run.issues.len();
    if reported > issues.len() {
        diagnostics.push(Diagnostic::info(
            STAGE,
            format!("merged {} duplicate issues", reported - issues.len()),
        ));
    }

    let mut interner = Interner::default();
    for (id, features) in &frames {
        interner.intern(SharedTextKind::Callable, &id.caller);
        interner.intern(SharedTextKind::Callable, &id.callee);
        interner.intern(SharedTextKind::Filename, &id.filename);
        for feature in features {
            interner.intern(SharedTextKind::Feature, feature);
        }
    }
    for pending in issues.values() {
        interner.intern(SharedTextKind::Callable, &pending.callable);
        interner.intern(SharedTextKind::Filename, &pending.filename);
        // Sets are sorted; the smallest message wins on conflicts.
        let message = pending.messages.first().map(String::as_str).unwrap_or_default();
        interner.intern(SharedTextKind::Message, message);
    }
    let (texts, text_index) = interner.finish();
    let lookup = |kind: SharedTextKind, contents: &str| -> TextIdx {
        text_index[&SharedText::new(kind, contents).content_hash()]
    };

    let mut frame_index: HashMap<FrameIdentity, FrameIdx> = HashMap::with_capacity(frames.len());
    let mut arena_frames = Vec::with_capacity(frames.len());
    for (id, features) in frames {
        arena_frames.push(TraceFrame {
            kind: id.kind,
            caller: lookup(SharedTextKind::Callable, &id.caller),
            caller_port: id.caller_port.clone(),
            callee: lookup(SharedTextKind::Callable, &id.callee),
            callee_port: id.callee_port.clone(),
            filename: lookup(SharedTextKind::Filename, &id.filename),
            line: id.line,
            features: features
                .iter()
                .map(|f| lookup(SharedTextKind::Feature, f))
                .collect(),
        });
        frame_index.insert(id, FrameIdx(arena_frames.len() - 1));
    }

    let arena_issues = issues
        .into_iter()
        .map(|(handle, pending)| {
            let message = pending.messages.into_iter().next().unwrap_or_default();
            Issue {
                handle,
                code: pending.code,
                callable: lookup(SharedTextKind::Callable, &pending.callable),
                message: lookup(SharedTextKind::Message, &message),
                filename: lookup(SharedTextKind::Filename, &pending.filename),
                line: pending.line,
                source_roots: pending.sources.iter().map(|id| frame_index[id]).collect(),
                sink_roots: pending.sinks.iter().map(|id| frame_index[id]).collect(),
            }
        })
        .collect();

    (
        TraceGraph {
            texts,
            frames: arena_frames,
            issues: arena_issues,
        },
        diagnostics,
    )
}

/// Pipeline step wrapping [`build_trace_graph`].
#[derive(Clone, Debug, Default)]
pub struct TraceGraphBuilder;

impl PipelineStep<ParsedRun, TraceGraph, RunSummary> for TraceGraphBuilder {
    fn name(&self) -> &'static str {
        STAGE
    }

    fn run(&mut self, input: ParsedRun, summary: &mut RunSummary) -> TraceResult<TraceGraph> {
        let (graph, diagnostics) = build_trace_graph(&input);
        for diagnostic in diagnostics {
            summary.push_diagnostic(diagnostic);
        }
        info!(
            texts = graph.texts.len(),
            frames = graph.frames.len(),
            issues = graph.issues.len(),
            "built trace graph"
        );
        Ok(graph)
    }
}
