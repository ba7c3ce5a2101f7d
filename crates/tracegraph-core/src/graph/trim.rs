//! Prunes the trace graph to what reported issues can reach.

use tracing::info;

use crate::errors::TraceResult;
use crate::graph::{FrameIdx, TraceGraph};
use crate::models::Diagnostic;
use crate::pipeline::PipelineStep;
use crate::summary::RunSummary;

const STAGE: &str = "trim";

/// Mark every frame reachable from an issue root.
///
/// Source roots expand through postcondition continuations and sink roots
/// through precondition continuations; continuations always share the kind
/// of the frame they continue, so one walk covers both. The walk uses an
/// explicit stack and a visited bit per frame, so recursive call chains
/// terminate and deep chains cannot overflow the call stack.
pub fn reachable_frames(graph: &TraceGraph) -> Vec<bool> {
    let next = graph.continuations();
    let mut visited = vec![false; graph.frames.len()];
    let mut stack: Vec<FrameIdx> = graph
        .issues
        .iter()
        .flat_map(|issue| issue.source_roots.iter().chain(issue.sink_roots.iter()))
        .copied()
        .collect();

    while let Some(frame) = stack.pop() {
        if visited[frame.0] {
            continue;
        }
        visited[frame.0] = true;
        for follower in &next[frame.0] {
            if !visited[follower.0] {
                stack.push(*follower);
            }
        }
    }
    visited
}

/// Drop unreachable frames. Returns the trimmed graph and how many frames
/// were removed.
pub fn trim_trace_graph(graph: TraceGraph) -> (TraceGraph, usize) {
    let keep = reachable_frames(&graph);
    let removed = keep.iter().filter(|k| !**k).count();
    if removed == 0 {
        return (graph, 0);
    }
    (graph.retain_frames(&keep), removed)
}

/// Pipeline step wrapping [`trim_trace_graph`]. A no-op when the summary
/// asks to retain all models.
#[derive(Clone, Debug, Default)]
pub struct TrimTraceGraph;

impl PipelineStep<TraceGraph, TraceGraph, RunSummary> for TrimTraceGraph {
    fn name(&self) -> &'static str {
        STAGE
    }

    fn run(&mut self, graph: TraceGraph, summary: &mut RunSummary) -> TraceResult<TraceGraph> {
        if summary.retain_all_models {
            summary.push_diagnostic(Diagnostic::info(STAGE, "retaining all models; trimming skipped"));
            return Ok(graph);
        }
        let before = graph.frames.len();
        let (trimmed, removed) = trim_trace_graph(graph);
        summary.trimmed_frames += removed;
        info!(before, after = trimmed.frames.len(), removed, "trimmed trace graph");
        if removed > 0 {
            summary.push_diagnostic(Diagnostic::info(
                STAGE,
                format!("discarded {removed} of {before} trace frames unreachable from any issue"),
            ));
        }
        Ok(trimmed)
    }
}
