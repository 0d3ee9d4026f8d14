//! The slice of the decoration model the height map needs: replacements
//! (which collapse text, possibly as whole blocks) and widgets (which add
//! height, possibly as their own blocks). Drawing is someone else's job.

/// A height-relevant decoration.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoration {
    /// Hide `from..to`. A block replacement removes the covered line
    /// structure entirely and stands as one block of `widget_height`.
    Replace { block: bool, widget_height: f64 },
    /// A widget at a point (or spanning a collapsed range). Block widgets
    /// form their own vertical block; inline widgets contribute height and
    /// possibly extra line breaks to the line they sit in.
    Widget { block: bool, height: f64, breaks: usize, side: i32 },
}

impl Decoration {
    pub(crate) fn is_block(&self) -> bool {
        match self {
            Decoration::Replace { block, .. } => *block,
            Decoration::Widget { block, .. } => *block,
        }
    }

    pub(crate) fn widget_height(&self) -> f64 {
        match self {
            Decoration::Replace { widget_height, .. } => *widget_height,
            Decoration::Widget { height, .. } => *height,
        }
    }

    pub(crate) fn breaks(&self) -> usize {
        match self {
            Decoration::Replace { .. } => 0,
            Decoration::Widget { breaks, .. } => *breaks,
        }
    }

    /// The side a point widget attaches to (before or after the position).
    pub(crate) fn side(&self) -> i32 {
        match self {
            Decoration::Replace { .. } => 0,
            Decoration::Widget { side, .. } => *side,
        }
    }
}

/// One decorated range.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoRange {
    pub from: usize,
    pub to: usize,
    pub deco: Decoration,
}

/// A sorted set of decorated ranges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecorationSet {
    ranges: Vec<DecoRange>,
}

impl DecorationSet {
    pub fn of(mut ranges: Vec<DecoRange>) -> DecorationSet {
        ranges.sort_by_key(|r| (r.from, r.to));
        DecorationSet { ranges }
    }

    pub fn empty() -> DecorationSet {
        DecorationSet { ranges: Vec::new() }
    }

    pub fn ranges(&self) -> &[DecoRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Consumer side of the span iteration contract: uncovered stretches come
/// in as `span` calls, decorations as `point` calls, strictly in document
/// order.
pub trait SpanIterator {
    fn span(&mut self, from: usize, to: usize);
    fn point(&mut self, from: usize, to: usize, deco: &Decoration);
}

/// Iterate the given sets over `from..to`. Overlapping points are clipped
/// to the part not yet covered by an earlier one.
pub fn spans(sets: &[DecorationSet], from: usize, to: usize, iter: &mut dyn SpanIterator) {
    let mut points: Vec<&DecoRange> = sets
        .iter()
        .flat_map(|set| set.ranges.iter())
        .filter(|r| r.from < to && r.to >= from && (r.from != r.to || r.from >= from))
        .collect();
    points.sort_by_key(|r| (r.from, r.to));
    let mut pos = from;
    for range in points {
        let point_from = range.from.max(from).max(pos);
        let point_to = range.to.min(to);
        if point_to < point_from {
            continue;
        }
        if point_from > pos {
            iter.span(pos, point_from);
        }
        iter.point(point_from, point_to, &range.deco);
        pos = pos.max(point_to);
    }
    if pos < to {
        iter.span(pos, to);
    }
}
