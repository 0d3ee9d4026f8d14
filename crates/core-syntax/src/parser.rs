//! The pluggable parser contract.
//!
//! The engine never parses anything itself: it feeds a [`Parser`] the
//! document (as a [`ParseInput`]), the reusable [`TreeFragment`]s from the
//! previous parse, and the ranges to cover, and then drives the returned
//! [`PartialParse`] in small steps. Suspension points exist only between
//! `advance` calls.

use core_text::Text;

use crate::context::{current_context, ReadySignal};
use crate::tree::{Tree, TreeFragment};

/// Read access to the document being parsed.
pub trait ParseInput: Send {
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// The chunk of text starting at `pos`. Chunk boundaries are
    /// implementation-defined; when `line_chunks` is true they fall on line
    /// breaks, and breaks are delivered as their own `"\n"` chunks.
    fn chunk(&self, pos: usize) -> String;
    fn line_chunks(&self) -> bool;
    fn read(&self, from: usize, to: usize) -> String;
}

/// A document-backed parse input with line-aligned chunks.
pub struct DocInput {
    doc: Text,
}

impl DocInput {
    pub fn new(doc: Text) -> DocInput {
        DocInput { doc }
    }

    pub fn doc(&self) -> &Text {
        &self.doc
    }
}

impl ParseInput for DocInput {
    fn len(&self) -> usize {
        self.doc.len()
    }

    fn chunk(&self, pos: usize) -> String {
        if pos >= self.doc.len() {
            return String::new();
        }
        match self.doc.line_at(pos) {
            Ok(line) => {
                if pos < line.to {
                    line.text.chars().skip(pos - line.from).collect()
                } else {
                    // Sitting on the line break.
                    "\n".to_string()
                }
            }
            Err(_) => String::new(),
        }
    }

    fn line_chunks(&self) -> bool {
        true
    }

    fn read(&self, from: usize, to: usize) -> String {
        self.doc.slice_string(from, to, None).unwrap_or_default()
    }
}

/// An in-progress parse. `advance` does a unit of work and returns the
/// finished tree once the parse is complete.
pub trait PartialParse: Send {
    /// Do a unit of work. Returns the completed tree when done.
    fn advance(&mut self) -> Option<Tree>;

    /// How far the parse has moved. The returned tree will cover at least
    /// `0..parsed_pos` (clipped to any `stop_at` bound).
    fn parsed_pos(&self) -> usize;

    /// Ask the parse to finish (and return a partial tree) as soon as it
    /// reaches `pos`. Can only decrease an earlier bound.
    fn stop_at(&mut self, pos: usize);

    /// The bound set by `stop_at`, if any.
    fn stopped_at(&self) -> Option<usize>;
}

/// A parser strategy. Implementations are shared between states and must be
/// cheap to clone behind an `Arc`.
pub trait Parser: Send + Sync {
    fn create_parse(
        &self,
        input: Box<dyn ParseInput>,
        fragments: &[TreeFragment],
        ranges: &[(usize, usize)],
    ) -> Box<dyn PartialParse>;
}

/// A placeholder parser for content that can't be parsed right now (for
/// example, a nested grammar still being loaded). It produces an empty tree
/// over its ranges, records them as skipped in the active parse context,
/// and, when a [`ReadySignal`] is given, asks the scheduler to come back
/// once it fires.
pub struct SkippingParser {
    until: Option<ReadySignal>,
}

impl SkippingParser {
    pub fn new(until: Option<ReadySignal>) -> SkippingParser {
        SkippingParser { until }
    }
}

struct SkippingParse {
    ranges: Vec<(usize, usize)>,
    until: Option<ReadySignal>,
    pos: usize,
    to: usize,
    stopped: Option<usize>,
}

impl PartialParse for SkippingParse {
    fn advance(&mut self) -> Option<Tree> {
        if let Some(cx) = current_context() {
            for &(from, to) in &self.ranges {
                cx.push_temp_skipped(from, to);
            }
            if let Some(signal) = self.until.take() {
                cx.schedule_on(signal);
            }
        }
        let from = self.ranges.first().map(|r| r.0).unwrap_or(0);
        self.pos = self.to;
        Some(Tree::new("", self.to - from, Vec::new()))
    }

    fn parsed_pos(&self) -> usize {
        self.pos
    }

    fn stop_at(&mut self, pos: usize) {
        self.stopped = Some(pos);
    }

    fn stopped_at(&self) -> Option<usize> {
        self.stopped
    }
}

impl Parser for SkippingParser {
    fn create_parse(
        &self,
        _input: Box<dyn ParseInput>,
        _fragments: &[TreeFragment],
        ranges: &[(usize, usize)],
    ) -> Box<dyn PartialParse> {
        let from = ranges.first().map(|r| r.0).unwrap_or(0);
        let to = ranges.last().map(|r| r.1).unwrap_or(0);
        Box::new(SkippingParse {
            ranges: ranges.to_vec(),
            until: self.until.clone(),
            pos: from,
            to,
            stopped: None,
        })
    }
}
