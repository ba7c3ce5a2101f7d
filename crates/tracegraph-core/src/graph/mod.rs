//! In-memory trace graph for one run.
//!
//! The graph is an arena: shared texts, frames and issues live in vectors
//! and refer to each other by index. Nodes are callables (shared texts of
//! kind `callable`), edges are trace frames. A frame B continues a frame A
//! when both have the same kind and B starts where A ends, i.e.
//! `(B.caller, B.caller_port) == (A.callee, A.callee_port)`.

pub mod builder;
pub mod trim;

use std::collections::{BTreeSet, HashMap};

use crate::models::{content_hash, SharedTextKind, TraceKind};

pub use builder::TraceGraphBuilder;
pub use trim::TrimTraceGraph;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextIdx(pub usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameIdx(pub usize);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SharedText {
    pub kind: SharedTextKind,
    pub contents: String,
}

impl SharedText {
    pub fn new(kind: SharedTextKind, contents: impl Into<String>) -> Self {
        Self {
            kind,
            contents: contents.into(),
        }
    }

    pub fn content_hash(&self) -> String {
        content_hash(&[self.kind.as_str(), &self.contents])
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceFrame {
    pub kind: TraceKind,
    pub caller: TextIdx,
    pub caller_port: String,
    pub callee: TextIdx,
    pub callee_port: String,
    pub filename: TextIdx,
    pub line: i64,
    /// Not part of the frame's identity.
    pub features: BTreeSet<TextIdx>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Issue {
    pub handle: String,
    pub code: String,
    pub callable: TextIdx,
    pub message: TextIdx,
    pub filename: TextIdx,
    pub line: i64,
    pub source_roots: Vec<FrameIdx>,
    pub sink_roots: Vec<FrameIdx>,
}

/// The identity tuple of a frame, resolved to text.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameIdentity {
    pub kind: TraceKind,
    pub caller: String,
    pub callee: String,
    pub caller_port: String,
    pub callee_port: String,
    pub filename: String,
    pub line: i64,
}

impl FrameIdentity {
    pub fn content_hash(&self) -> String {
        let line = self.line.to_string();
        content_hash(&[
            self.kind.as_str(),
            &self.caller,
            &self.callee,
            &self.caller_port,
            &self.callee_port,
            &self.filename,
            &line,
        ])
    }
}

pub fn issue_content_hash(handle: &str) -> String {
    content_hash(&[handle])
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceGraph {
    pub texts: Vec<SharedText>,
    pub frames: Vec<TraceFrame>,
    pub issues: Vec<Issue>,
}

impl TraceGraph {
    pub fn text_str(&self, idx: TextIdx) -> &str {
        &self.texts[idx.0].contents
    }

    pub fn frame(&self, idx: FrameIdx) -> &TraceFrame {
        &self.frames[idx.0]
    }

    pub fn frame_identity(&self, idx: FrameIdx) -> FrameIdentity {
        let frame = self.frame(idx);
        FrameIdentity {
            kind: frame.kind,
            caller: self.text_str(frame.caller).to_string(),
            callee: self.text_str(frame.callee).to_string(),
            caller_port: frame.caller_port.clone(),
            callee_port: frame.callee_port.clone(),
            filename: self.text_str(frame.filename).to_string(),
            line: frame.line,
        }
    }

    /// For every frame, the frames that continue it.
    pub fn continuations(&self) -> Vec<Vec<FrameIdx>> {
        let mut by_start: HashMap<(TraceKind, TextIdx, &str), Vec<FrameIdx>> = HashMap::new();
        for (i, frame) in self.frames.iter().enumerate() {
            by_start
                .entry((frame.kind, frame.caller, frame.caller_port.as_str()))
                .or_default()
                .push(FrameIdx(i));
        }
        self.frames
            .iter()
            .map(|frame| {
                by_start
                    .get(&(frame.kind, frame.callee, frame.callee_port.as_str()))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Keep only the frames flagged in `keep`, then drop texts nothing
    /// references any more. Indices are compacted; relative order is kept.
    pub fn retain_frames(self, keep: &[bool]) -> TraceGraph {
        let TraceGraph {
            texts,
            frames,
            issues,
        } = self;

        let mut frame_remap: Vec<Option<FrameIdx>> = vec![None; frames.len()];
        let mut kept_frames = Vec::new();
        for (i, frame) in frames.into_iter().enumerate() {
            if keep.get(i).copied().unwrap_or(false) {
                frame_remap[i] = Some(FrameIdx(kept_frames.len()));
                kept_frames.push(frame);
            }
        }
        let remap_roots = |roots: Vec<FrameIdx>| -> Vec<FrameIdx> {
            roots.into_iter().filter_map(|r| frame_remap[r.0]).collect()
        };
        let issues: Vec<Issue> = issues
            .into_iter()
            .map(|issue| Issue {
                source_roots: remap_roots(issue.source_roots),
                sink_roots: remap_roots(issue.sink_roots),
                ..issue
            })
            .collect();

        let mut used = vec![false; texts.len()];
        for frame in &kept_frames {
            used[frame.caller.0] = true;
            used[frame.callee.0] = true;
            used[frame.filename.0] = true;
            for feature in &frame.features {
                used[feature.0] = true;
            }
        }
        for issue in &issues {
            used[issue.callable.0] = true;
            used[issue.message.0] = true;
            used[issue.filename.0] = true;
        }

        let mut text_remap: Vec<Option<TextIdx>> = vec![None; texts.len()];
        let mut kept_texts = Vec::new();
        for (i, text) in texts.into_iter().enumerate() {
            if used[i] {
                text_remap[i] = Some(TextIdx(kept_texts.len()));
                kept_texts.push(text);
            }
        }
        // Every index below was marked used above.
        let t = |idx: TextIdx| text_remap[idx.0].unwrap_or(idx);

        let frames = kept_frames
            .into_iter()
            .map(|frame| TraceFrame {
                caller: t(frame.caller),
                callee: t(frame.callee),
                filename: t(frame.filename),
                features: frame.features.iter().map(|f| t(*f)).collect(),
                ..frame
            })
            .collect();
        let issues = issues
            .into_iter()
            .map(|issue| Issue {
                callable: t(issue.callable),
                message: t(issue.message),
                filename: t(issue.filename),
                ..issue
            })
            .collect();

        TraceGraph {
            texts: kept_texts,
            frames,
            issues,
        }
    }
}
