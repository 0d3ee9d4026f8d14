//! The height map: a persistent balanced tree summarising per-block
//! vertical extents, so the layout engine can translate between document
//! positions and vertical pixel positions without measuring everything.
//!
//! Three leaf kinds exist: a gap (a run of plain lines estimated through
//! the oracle), a text block (one line, possibly with collapsed ranges and
//! widget-contributed height), and a block widget. Branch nodes carry an
//! optional implicit line break between their children and keep the
//! `size <= 2 * sibling.size` balance invariant. Node lengths always sum to
//! the document length (plus one per break between siblings).

use std::sync::Arc;

use core_state::ChangeSet;
use core_text::Text;
use tracing::trace;

use crate::decoration::{spans, Decoration, DecorationSet, SpanIterator};
use crate::oracle::{HeightOracle, MeasuredHeights};

/// How `line_at` interprets its argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    ByPos,
    ByHeight,
    /// Position query that only needs extents, not heights (used while the
    /// map is partially outdated).
    ByPosNoHeight,
}

/// The kind of block a query landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Widget,
}

/// One vertical block: a line or a block widget, with its extent and
/// vertical placement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockInfo {
    pub from: usize,
    pub length: usize,
    pub top: f64,
    pub height: f64,
    pub kind: BlockKind,
}

impl BlockInfo {
    pub fn to(&self) -> usize {
        self.from + self.length
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    fn join(&self, other: &BlockInfo) -> BlockInfo {
        BlockInfo {
            from: self.from,
            length: other.to() - self.from,
            top: self.top,
            height: other.bottom() - self.top,
            kind: BlockKind::Text,
        }
    }
}

/// A changed range in old (`a`) / new (`b`) document coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangedRange {
    pub from_a: usize,
    pub to_a: usize,
    pub from_b: usize,
    pub to_b: usize,
}

impl ChangedRange {
    pub fn from_changes(changes: &ChangeSet) -> Vec<ChangedRange> {
        let mut ranges = Vec::new();
        changes.iter_changed_ranges(false, |from_a, to_a, from_b, to_b| {
            ranges.push(ChangedRange { from_a, to_a, from_b, to_b });
        });
        ranges
    }
}

#[derive(Debug, Clone)]
pub struct TextBlock {
    pub(crate) len: usize,
    pub(crate) height: f64,
    pub(crate) outdated: bool,
    pub(crate) collapsed: usize,
    pub(crate) widget_height: f64,
    pub(crate) breaks: usize,
}

#[derive(Debug, Clone)]
pub struct Gap {
    pub(crate) len: usize,
    pub(crate) height: f64,
    pub(crate) outdated: bool,
}

#[derive(Debug, Clone)]
pub struct BlockWidget {
    pub(crate) len: usize,
    pub(crate) height: f64,
    pub(crate) outdated: bool,
}

#[derive(Debug)]
pub struct Branch {
    pub(crate) left: HeightMap,
    pub(crate) right: HeightMap,
    // 1 when an implicit line break separates the children.
    pub(crate) brk: usize,
    pub(crate) len: usize,
    pub(crate) height: f64,
    pub(crate) size: usize,
    pub(crate) outdated: bool,
}

/// The height map itself. Cloning is cheap (branches are shared).
#[derive(Debug, Clone)]
pub enum HeightMap {
    Text(TextBlock),
    Gap(Gap),
    Block(BlockWidget),
    Branch(Arc<Branch>),
}

fn text_block(len: usize) -> HeightMap {
    HeightMap::Text(TextBlock {
        len,
        height: 0.0,
        outdated: true,
        collapsed: 0,
        widget_height: 0.0,
        breaks: 0,
    })
}

fn gap(len: usize) -> HeightMap {
    HeightMap::Gap(Gap { len, height: 0.0, outdated: true })
}

fn balanced(left: HeightMap, brk: usize, right: HeightMap) -> HeightMap {
    if left.size() > 2 * right.size() || right.size() > 2 * left.size() {
        let mut nodes = vec![Some(left)];
        if brk > 0 {
            nodes.push(None);
        }
        nodes.push(Some(right));
        HeightMap::of(nodes)
    } else {
        branch(left, brk, right)
    }
}

fn branch(left: HeightMap, brk: usize, right: HeightMap) -> HeightMap {
    HeightMap::Branch(Arc::new(Branch {
        len: left.len() + brk + right.len(),
        height: left.height() + right.height(),
        size: left.size() + right.size(),
        outdated: left.outdated() || right.outdated(),
        left,
        right,
        brk,
    }))
}

impl HeightMap {
    /// An empty height map for a fresh (single empty line) document.
    pub fn empty() -> HeightMap {
        text_block(0)
    }

    pub fn len(&self) -> usize {
        match self {
            HeightMap::Text(n) => n.len,
            HeightMap::Gap(n) => n.len,
            HeightMap::Block(n) => n.len,
            HeightMap::Branch(n) => n.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn height(&self) -> f64 {
        match self {
            HeightMap::Text(n) => n.height,
            HeightMap::Gap(n) => n.height,
            HeightMap::Block(n) => n.height,
            HeightMap::Branch(n) => n.height,
        }
    }

    pub(crate) fn size(&self) -> usize {
        match self {
            HeightMap::Branch(n) => n.size,
            _ => 1,
        }
    }

    pub(crate) fn outdated(&self) -> bool {
        match self {
            HeightMap::Text(n) => n.outdated,
            HeightMap::Gap(n) => n.outdated,
            HeightMap::Block(n) => n.outdated,
            HeightMap::Branch(n) => n.outdated,
        }
    }

    /// Build a balanced tree from a node list. `None` entries stand for
    /// explicit line breaks between siblings.
    pub(crate) fn of(mut nodes: Vec<Option<HeightMap>>) -> HeightMap {
        if nodes.is_empty() {
            return HeightMap::empty();
        }
        if nodes.len() == 1 {
            return match nodes.pop() {
                Some(Some(node)) => node,
                _ => HeightMap::empty(),
            };
        }
        let mut i = 0usize;
        let mut j = nodes.len();
        let mut before = 0usize;
        let mut after = 0usize;
        loop {
            if i == j {
                if before > after * 2 {
                    // Split an oversized left neighbour to restore the
                    // size <= 2 * sibling.size invariant.
                    if let Some(Some(HeightMap::Branch(split))) = nodes.get(i - 1).cloned() {
                        i -= 1;
                        nodes.remove(i);
                        let mut insert = vec![Some(split.left.clone())];
                        if split.brk > 0 {
                            insert.push(None);
                        }
                        insert.push(Some(split.right.clone()));
                        let added = insert.len();
                        nodes.splice(i..i, insert);
                        j += added - 1;
                        before -= split.size;
                        continue;
                    }
                    break;
                } else if after > before * 2 {
                    if let Some(Some(HeightMap::Branch(split))) = nodes.get(j).cloned() {
                        nodes.remove(j);
                        let mut insert = vec![Some(split.left.clone())];
                        if split.brk > 0 {
                            insert.push(None);
                        }
                        insert.push(Some(split.right.clone()));
                        let added = insert.len();
                        nodes.splice(j..j, insert);
                        j += added;
                        after -= split.size;
                        continue;
                    }
                    break;
                } else {
                    break;
                }
            } else if before < after {
                if let Some(node) = &nodes[i] {
                    before += node.size();
                }
                i += 1;
            } else {
                j -= 1;
                if let Some(node) = &nodes[j] {
                    after += node.size();
                }
            }
        }
        let mut brk = 0;
        if i > 0 && nodes[i - 1].is_none() {
            brk = 1;
            i -= 1;
        } else if j < nodes.len() && nodes[j].is_none() {
            brk = 1;
            j += 1;
        }
        let right_nodes: Vec<Option<HeightMap>> = nodes.split_off(j);
        if brk == 1 && i < nodes.len() {
            nodes.truncate(i);
        }
        branch(HeightMap::of(nodes), brk, HeightMap::of(right_nodes))
    }

    fn decompose_left(&self, to: usize, result: &mut Vec<Option<HeightMap>>) {
        match self {
            HeightMap::Gap(node) => {
                result.push(Some(if to == node.len { self.clone() } else { gap(to) }));
            }
            HeightMap::Text(node) => {
                result.push(Some(if to >= node.len { self.clone() } else { text_block(to) }));
            }
            HeightMap::Block(_) => {
                result.push(Some(self.clone()));
            }
            HeightMap::Branch(node) => {
                let pos_in_left = node.left.len();
                if to <= pos_in_left {
                    node.left.decompose_left(to, result);
                    return;
                }
                result.push(Some(node.left.clone()));
                let mut boundary = pos_in_left;
                if node.brk > 0 {
                    boundary += 1;
                    if to >= boundary {
                        result.push(None);
                    }
                }
                if to > boundary {
                    node.right.decompose_left(to - boundary, result);
                }
            }
        }
    }

    fn decompose_right(&self, from: usize, result: &mut Vec<Option<HeightMap>>) {
        match self {
            HeightMap::Gap(node) => {
                result.push(Some(if from == 0 { self.clone() } else { gap(node.len - from) }));
            }
            HeightMap::Text(node) => {
                result.push(Some(if from == 0 {
                    self.clone()
                } else {
                    text_block(node.len.saturating_sub(from))
                }));
            }
            HeightMap::Block(_) => {
                result.push(Some(self.clone()));
            }
            HeightMap::Branch(node) => {
                let pos_in_left = node.left.len();
                let pos_in_right = pos_in_left + node.brk;
                if from >= pos_in_right {
                    node.right.decompose_right(from - pos_in_right, result);
                    return;
                }
                if from < pos_in_left {
                    node.left.decompose_right(from, result);
                }
                if node.brk > 0 && from < pos_in_right {
                    result.push(None);
                }
                result.push(Some(node.right.clone()));
            }
        }
    }

    /// Replace `from..to` with freshly built nodes, preserving balance.
    /// Boundaries always fall on line edges (`apply_changes` widens changed
    /// ranges), so leaves are only ever cut at their ends.
    pub(crate) fn replace(
        &self,
        from: usize,
        to: usize,
        mut nodes: Vec<Option<HeightMap>>,
    ) -> HeightMap {
        match self {
            HeightMap::Text(me) => {
                // A small same-line replacement keeps the known height.
                if nodes.len() == 1 {
                    if let Some(Some(HeightMap::Text(new_node))) = nodes.first() {
                        if (new_node.len as i64 - me.len as i64).abs() < 10 {
                            let mut new_node = new_node.clone();
                            new_node.height = me.height;
                            if !me.outdated {
                                new_node.outdated = false;
                            }
                            return HeightMap::Text(new_node);
                        }
                    }
                }
                self.generic_replace(from, to, nodes)
            }
            HeightMap::Gap(me) => {
                // Graft the untouched gap remainders onto the new nodes.
                let after = me.len.saturating_sub(to);
                if after > 0 {
                    match nodes.last() {
                        Some(Some(HeightMap::Gap(last))) => {
                            let merged = gap(last.len + after);
                            let idx = nodes.len() - 1;
                            nodes[idx] = Some(merged);
                        }
                        _ => {
                            nodes.push(None);
                            nodes.push(Some(gap(after - 1)));
                        }
                    }
                }
                if from > 0 {
                    match nodes.first() {
                        Some(Some(HeightMap::Gap(first))) => {
                            let merged = gap(first.len + from);
                            nodes[0] = Some(merged);
                        }
                        _ => {
                            nodes.insert(0, None);
                            nodes.insert(0, Some(gap(from - 1)));
                        }
                    }
                }
                HeightMap::of(nodes)
            }
            HeightMap::Branch(me) => {
                let right_start = me.left.len() + me.brk;
                if to < right_start {
                    return balanced(me.left.replace(from, to, nodes), me.brk, me.right.clone());
                }
                if from > me.left.len() {
                    return balanced(
                        me.left.clone(),
                        me.brk,
                        me.right.replace(from - right_start, to - right_start, nodes),
                    );
                }
                self.generic_replace(from, to, nodes)
            }
            HeightMap::Block(_) => self.generic_replace(from, to, nodes),
        }
    }

    fn generic_replace(
        &self,
        from: usize,
        to: usize,
        nodes: Vec<Option<HeightMap>>,
    ) -> HeightMap {
        let mut result: Vec<Option<HeightMap>> = Vec::new();
        if from > 0 {
            self.decompose_left(from, &mut result);
        }
        result.extend(nodes);
        if to < self.len() {
            self.decompose_right(to, &mut result);
        }
        normalize_nodes(&mut result);
        HeightMap::of(result)
    }

    /// The block (line or widget) around a position or at a height.
    pub fn line_at(
        &self,
        value: usize,
        height_value: f64,
        query: QueryType,
        oracle: &HeightOracle,
        top: f64,
        offset: usize,
    ) -> BlockInfo {
        match self {
            HeightMap::Text(node) => BlockInfo {
                from: offset,
                length: node.len,
                top,
                height: node.height,
                kind: BlockKind::Text,
            },
            HeightMap::Block(node) => BlockInfo {
                from: offset,
                length: node.len,
                top,
                height: node.height,
                kind: BlockKind::Widget,
            },
            HeightMap::Gap(node) => {
                if query == QueryType::ByHeight {
                    return self.block_at(height_value, oracle, top, offset);
                }
                if query == QueryType::ByPosNoHeight {
                    let line = match oracle.doc.line_at(value) {
                        Ok(line) => line,
                        Err(_) => {
                            return BlockInfo {
                                from: offset,
                                length: node.len,
                                top,
                                height: node.height,
                                kind: BlockKind::Text,
                            }
                        }
                    };
                    return BlockInfo {
                        from: line.from,
                        length: line.len(),
                        top: 0.0,
                        height: 0.0,
                        kind: BlockKind::Text,
                    };
                }
                let metrics = gap_metrics(node, oracle, offset);
                let line = match oracle.doc.line_at(value) {
                    Ok(line) => line,
                    Err(_) => {
                        return BlockInfo {
                            from: offset,
                            length: node.len,
                            top,
                            height: node.height,
                            kind: BlockKind::Text,
                        }
                    }
                };
                let line_height = metrics.per_line + line.len() as f64 * metrics.per_char;
                let lines_above = line.number.saturating_sub(metrics.first_line) as f64;
                let chars_above =
                    (line.from.saturating_sub(offset)) as f64 - lines_above;
                let line_top = top + metrics.per_line * lines_above + metrics.per_char * chars_above;
                BlockInfo {
                    from: line.from,
                    length: line.len(),
                    top: line_top.min(top + node.height - line_height).max(top),
                    height: line_height,
                    kind: BlockKind::Text,
                }
            }
            HeightMap::Branch(node) => {
                let right_top = top + node.left.height();
                let right_offset = offset + node.left.len() + node.brk;
                let go_left = match query {
                    QueryType::ByHeight => height_value < right_top,
                    _ => value < right_offset,
                };
                let base = if go_left {
                    node.left.line_at(value, height_value, query, oracle, top, offset)
                } else {
                    node.right.line_at(value, height_value, query, oracle, right_top, right_offset)
                };
                let separate = node.brk > 0
                    || if go_left { base.to() < right_offset } else { base.from > right_offset };
                if separate {
                    return base;
                }
                let sub_query = if query == QueryType::ByPosNoHeight {
                    QueryType::ByPosNoHeight
                } else {
                    QueryType::ByPos
                };
                if go_left {
                    let other = node.right.line_at(
                        right_offset,
                        0.0,
                        sub_query,
                        oracle,
                        right_top,
                        right_offset,
                    );
                    base.join(&other)
                } else {
                    let other =
                        node.left.line_at(right_offset, 0.0, sub_query, oracle, top, offset);
                    other.join(&base)
                }
            }
        }
    }

    /// The block at a vertical position.
    pub fn block_at(&self, height: f64, oracle: &HeightOracle, top: f64, offset: usize) -> BlockInfo {
        match self {
            HeightMap::Text(node) => BlockInfo {
                from: offset,
                length: node.len,
                top,
                height: node.height,
                kind: BlockKind::Text,
            },
            HeightMap::Block(node) => BlockInfo {
                from: offset,
                length: node.len,
                top,
                height: node.height,
                kind: BlockKind::Widget,
            },
            HeightMap::Gap(node) => {
                let metrics = gap_metrics(node, oracle, offset);
                let lines = metrics.last_line - metrics.first_line;
                let line_index = if metrics.per_line > 0.0 {
                    (((height - top) / metrics.per_line).floor().max(0.0) as usize).min(lines)
                } else {
                    0
                };
                match oracle.doc.line(metrics.first_line + line_index) {
                    Ok(line) => BlockInfo {
                        from: line.from,
                        length: line.len(),
                        top: top + metrics.per_line * line_index as f64,
                        height: metrics.per_line + line.len() as f64 * metrics.per_char,
                        kind: BlockKind::Text,
                    },
                    Err(_) => BlockInfo {
                        from: offset,
                        length: node.len,
                        top,
                        height: node.height,
                        kind: BlockKind::Text,
                    },
                }
            }
            HeightMap::Branch(node) => {
                let mid = top + node.left.height();
                if height < mid {
                    node.left.block_at(height, oracle, top, offset)
                } else {
                    node.right.block_at(height, oracle, mid, offset + node.left.len() + node.brk)
                }
            }
        }
    }

    /// Call `f` for every line block intersecting `from..to`.
    pub fn for_each_line(
        &self,
        from: usize,
        to: usize,
        oracle: &HeightOracle,
        top: f64,
        offset: usize,
        f: &mut dyn FnMut(BlockInfo),
    ) {
        match self {
            HeightMap::Text(node) => {
                if from <= offset + node.len && to >= offset {
                    f(BlockInfo {
                        from: offset,
                        length: node.len,
                        top,
                        height: node.height,
                        kind: BlockKind::Text,
                    });
                }
            }
            HeightMap::Block(node) => {
                if from <= offset + node.len && to >= offset {
                    f(BlockInfo {
                        from: offset,
                        length: node.len,
                        top,
                        height: node.height,
                        kind: BlockKind::Widget,
                    });
                }
            }
            HeightMap::Gap(node) => {
                let from = from.max(offset);
                let to = to.min(offset + node.len);
                if from > to {
                    return;
                }
                let metrics = gap_metrics(node, oracle, offset);
                let mut pos = from;
                let mut line_top = top;
                let mut first = true;
                while pos <= to {
                    let Ok(line) = oracle.doc.line_at(pos) else { break };
                    if first {
                        let lines_above = line.number.saturating_sub(metrics.first_line) as f64;
                        let chars_above =
                            (line.from.saturating_sub(offset)) as f64 - lines_above;
                        line_top += metrics.per_line * lines_above + metrics.per_char * chars_above;
                        first = false;
                    }
                    let line_height = metrics.per_line + line.len() as f64 * metrics.per_char;
                    f(BlockInfo {
                        from: line.from,
                        length: line.len(),
                        top: line_top,
                        height: line_height,
                        kind: BlockKind::Text,
                    });
                    line_top += line_height;
                    pos = line.to + 1;
                }
            }
            HeightMap::Branch(node) => {
                let right_start = offset + node.left.len() + node.brk;
                let right_top = top + node.left.height();
                if node.brk > 0 {
                    if from < right_start {
                        node.left.for_each_line(from, to, oracle, top, offset, f);
                    }
                    if to >= right_start {
                        node.right.for_each_line(from, to, oracle, right_top, right_start, f);
                    }
                } else {
                    // The line at the boundary spans both children.
                    let mid = self.line_at(right_start, 0.0, QueryType::ByPos, oracle, top, offset);
                    if from < mid.from {
                        node.left.for_each_line(from, mid.from.saturating_sub(1), oracle, top, offset, f);
                    }
                    if mid.to() >= from && mid.from <= to {
                        f(mid);
                    }
                    if to > mid.to() {
                        node.right.for_each_line(mid.to() + 1, to, oracle, right_top, right_start, f);
                    }
                }
            }
        }
    }

    /// Recompute heights top-down. Outdated nodes (and, with `force`,
    /// everything) get fresh estimates; `measured` values override
    /// estimates for the lines they cover.
    pub fn update_height(
        &self,
        oracle: &HeightOracle,
        offset: usize,
        force: bool,
        measured: &mut Option<MeasuredHeights>,
    ) -> HeightMap {
        match self {
            HeightMap::Text(node) => {
                let mut node = node.clone();
                let measured_height = match measured {
                    Some(m) if m.from <= offset && m.more() => Some(m.take()),
                    _ => None,
                };
                if let Some(height) = measured_height {
                    node.height = height + node.breaks as f64 * oracle.line_height;
                } else if force || node.outdated {
                    node.height = node.widget_height.max(oracle.height_for_line(
                        node.len.saturating_sub(node.collapsed),
                    )) + node.breaks as f64 * oracle.line_height;
                }
                node.outdated = false;
                HeightMap::Text(node)
            }
            HeightMap::Block(node) => {
                let mut node = node.clone();
                if force || node.outdated {
                    node.outdated = false;
                }
                HeightMap::Block(node)
            }
            HeightMap::Gap(node) => {
                let end = offset + node.len;
                if let Some(m) = measured {
                    if m.from <= end && m.more() {
                        return rebuild_measured_gap(node, oracle, offset, m);
                    }
                }
                let mut node = node.clone();
                if force || node.outdated {
                    node.height = oracle.height_for_gap(offset, offset + node.len);
                    node.outdated = false;
                }
                HeightMap::Gap(node)
            }
            HeightMap::Branch(node) => {
                let measured_intersects = match measured {
                    Some(m) => m.more() && m.from <= offset + node.len,
                    None => false,
                };
                if !(force || node.outdated || measured_intersects) {
                    return self.clone();
                }
                let left = node.left.update_height(oracle, offset, force, measured);
                let right = node.right.update_height(
                    oracle,
                    offset + left.len() + node.brk,
                    force,
                    measured,
                );
                branch(left, node.brk, right)
            }
        }
    }

    /// Update the map for document changes. Each changed range is widened
    /// to whole lines on both sides, rebuilt from the decoration sets, and
    /// spliced back in; heights are then refreshed top-down.
    pub fn apply_changes(
        &self,
        decorations: &[DecorationSet],
        old_doc: &Text,
        oracle: &HeightOracle,
        changes: &[ChangedRange],
    ) -> HeightMap {
        let mut me = self.clone();
        let mut old_oracle = oracle.clone();
        old_oracle.set_doc(old_doc.clone());
        let mut i = changes.len();
        while i > 0 {
            i -= 1;
            let change = changes[i];
            let (mut from_a, mut to_a) = (change.from_a, change.to_a);
            let (mut from_b, mut to_b) = (change.from_b, change.to_b);
            // Expand to the enclosing lines in the old document, so the
            // replacement keeps the line-block structure intact.
            let start = me.line_at(from_a, 0.0, QueryType::ByPosNoHeight, &old_oracle, 0.0, 0);
            let end = if start.to() >= to_a {
                start
            } else {
                me.line_at(to_a, 0.0, QueryType::ByPosNoHeight, &old_oracle, 0.0, 0)
            };
            to_b += end.to() - to_a;
            to_a = end.to();
            let mut start = start;
            while i > 0 && start.from <= changes[i - 1].to_a {
                from_a = changes[i - 1].from_a;
                from_b = changes[i - 1].from_b;
                i -= 1;
                if from_a < start.from {
                    start = me.line_at(from_a, 0.0, QueryType::ByPosNoHeight, &old_oracle, 0.0, 0);
                }
            }
            from_b = from_b.saturating_sub(from_a - start.from);
            from_a = start.from;
            let nodes = NodeBuilder::build(oracle, decorations, from_b, to_b);
            me = me.replace(from_a, to_a, nodes);
        }
        trace!(target: "layout.height", len = me.len(), "rebuilt");
        me.update_height(oracle, 0, false, &mut None)
    }
}

struct GapMetrics {
    first_line: usize,
    last_line: usize,
    per_line: f64,
    per_char: f64,
}

fn gap_metrics(node: &Gap, oracle: &HeightOracle, offset: usize) -> GapMetrics {
    let first_line = oracle.doc.line_at(offset).map(|l| l.number).unwrap_or(1);
    let last_line = oracle
        .doc
        .line_at(offset + node.len)
        .map(|l| l.number)
        .unwrap_or(first_line);
    let lines = (last_line - first_line + 1) as f64;
    if oracle.line_wrapping {
        let total_per_line = node.height.min(oracle.line_height * lines);
        let per_line = total_per_line / lines;
        let per_char = if node.len as f64 > lines * 5.0 {
            (node.height - total_per_line) / (node.len as f64 - lines * 5.0)
        } else {
            0.0
        };
        GapMetrics { first_line, last_line, per_line, per_char }
    } else {
        GapMetrics { first_line, last_line, per_line: node.height / lines, per_char: 0.0 }
    }
}

fn rebuild_measured_gap(
    node: &Gap,
    oracle: &HeightOracle,
    offset: usize,
    measured: &mut MeasuredHeights,
) -> HeightMap {
    // Gaps only ever cover plain text, so measured lines can be spliced in
    // as individual text blocks.
    let end = offset + node.len;
    let mut nodes: Vec<Option<HeightMap>> = Vec::new();
    if measured.from > offset {
        let lead = gap(measured.from - offset - 1);
        nodes.push(Some(lead.update_height(oracle, offset, false, &mut None)));
    }
    let mut pos = measured.from.max(offset);
    while pos <= end && measured.more() {
        let Ok(line) = oracle.doc.line_at(pos) else { break };
        if !nodes.is_empty() {
            nodes.push(None);
        }
        let height = measured.take();
        nodes.push(Some(HeightMap::Text(TextBlock {
            len: line.len(),
            height,
            outdated: false,
            collapsed: 0,
            widget_height: 0.0,
            breaks: 0,
        })));
        pos = line.to + 1;
    }
    if pos <= end {
        nodes.push(None);
        let tail = gap(end - pos);
        nodes.push(Some(tail.update_height(oracle, pos, false, &mut None)));
    }
    HeightMap::of(nodes)
}

/// Merge mergeable neighbours after a replace: adjacent gaps (with or
/// without a break between them) collapse into one gap.
fn normalize_nodes(nodes: &mut Vec<Option<HeightMap>>) {
    let mut i = 0;
    while i + 1 < nodes.len() {
        let merged = match (&nodes[i], &nodes[i + 1]) {
            (Some(HeightMap::Gap(a)), Some(HeightMap::Gap(b))) => Some((a.len + b.len, 2)),
            (Some(HeightMap::Gap(a)), None) if i + 2 < nodes.len() => {
                match &nodes[i + 2] {
                    Some(HeightMap::Gap(b)) => Some((a.len + 1 + b.len, 3)),
                    _ => None,
                }
            }
            _ => None,
        };
        match merged {
            Some((len, span)) => {
                nodes.splice(i..i + span, [Some(gap(len))]);
            }
            None => i += 1,
        }
    }
}

/// Builds replacement nodes for a rebuilt region by consuming decoration
/// spans and points in document order.
struct NodeBuilder<'a> {
    pos: usize,
    oracle: &'a HeightOracle,
    nodes: Vec<Option<HeightMap>>,
    line_start: Option<usize>,
    line_end: usize,
    written_to: usize,
    covered: bool,
}

impl<'a> NodeBuilder<'a> {
    fn build(
        oracle: &'a HeightOracle,
        decorations: &[DecorationSet],
        from: usize,
        to: usize,
    ) -> Vec<Option<HeightMap>> {
        let mut builder = NodeBuilder {
            pos: from,
            oracle,
            nodes: Vec::new(),
            line_start: None,
            line_end: 0,
            written_to: from,
            covered: false,
        };
        spans(decorations, from, to, &mut builder);
        builder.finish()
    }

    fn enter_line(&mut self) {
        if self.line_start.is_some() {
            return;
        }
        let Ok(line) = self.oracle.doc.line_at(self.pos) else { return };
        self.line_start = Some(line.from);
        self.line_end = line.to;
        if self.written_to < line.from {
            if self.written_to < line.from - 1 || matches!(self.nodes.last(), Some(None)) {
                self.nodes.push(Some(gap(line.from - 1 - self.written_to)));
            }
            self.nodes.push(None);
        }
        if self.pos > line.from {
            self.nodes.push(Some(text_block(self.pos - line.from)));
        }
        self.written_to = self.pos;
    }

    fn ensure_line(&mut self) -> &mut TextBlock {
        self.enter_line();
        if !matches!(self.nodes.last(), Some(Some(HeightMap::Text(_)))) {
            self.nodes.push(Some(text_block(0)));
        }
        match self.nodes.last_mut() {
            Some(Some(HeightMap::Text(node))) => node,
            _ => unreachable!("a text block was just pushed"),
        }
    }

    fn add_block(&mut self, len: usize, height: f64, covers_after: bool, attach_before: bool) {
        self.enter_line();
        if attach_before && !self.covered {
            self.ensure_line();
        }
        self.nodes.push(Some(HeightMap::Block(BlockWidget { len, height, outdated: false })));
        self.pos += len;
        self.written_to = self.pos;
        self.covered = covers_after;
    }
}

impl SpanIterator for NodeBuilder<'_> {
    fn span(&mut self, _from: usize, to: usize) {
        if self.line_start.is_some() {
            let end = to.min(self.line_end);
            if let Some(Some(HeightMap::Text(node))) = self.nodes.last_mut() {
                node.len += end - self.pos;
            } else if end > self.pos || !self.covered {
                self.nodes.push(Some(text_block(end - self.pos)));
            }
            self.covered = false;
            self.written_to = end;
            if to > end {
                self.nodes.push(None);
                self.written_to += 1;
                self.line_start = None;
            }
        }
        self.pos = to;
    }

    fn point(&mut self, from: usize, to: usize, deco: &Decoration) {
        let len = to - from;
        if deco.is_block() {
            self.add_block(len, deco.widget_height(), to == from && deco.side() > 0, deco.side() > 0);
        } else if len > 0 || deco.breaks() > 0 || deco.widget_height() > 0.0 {
            let height = deco.widget_height();
            let breaks = deco.breaks();
            let line = self.ensure_line();
            line.len += len;
            line.collapsed += len;
            line.widget_height = line.widget_height.max(height);
            line.breaks += breaks;
            self.pos += len;
            self.written_to = self.pos;
            self.covered = false;
        }
        if self.line_end < self.pos {
            self.line_end = self.oracle.doc.line_at(self.pos).map(|l| l.to).unwrap_or(self.pos);
        }
    }
}

impl NodeBuilder<'_> {
    fn finish(mut self) -> Vec<Option<HeightMap>> {
        let last_is_text = matches!(self.nodes.last(), Some(Some(HeightMap::Text(_))));
        if self.line_start.is_some() && !last_is_text && !self.covered {
            self.nodes.push(Some(text_block(0)));
        } else if self.written_to < self.pos || self.nodes.is_empty() {
            self.nodes.push(Some(gap(self.pos - self.written_to)));
        }
        self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoration::DecoRange;

    const EPSILON: f64 = 0.001;

    fn oracle(doc: &Text) -> HeightOracle {
        HeightOracle::new(doc.clone())
    }

    fn full_map(doc: &Text, oracle: &HeightOracle) -> HeightMap {
        HeightMap::empty().apply_changes(
            &[],
            &Text::empty(),
            oracle,
            &[ChangedRange { from_a: 0, to_a: 0, from_b: 0, to_b: doc.len() }],
        )
    }

    fn doc_of(lines: usize) -> Text {
        Text::of((0..lines).map(|i| format!("line {i}")).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn plain_document_height_is_lines_times_line_height() {
        let doc = doc_of(100);
        let oracle = oracle(&doc);
        let map = full_map(&doc, &oracle);
        assert_eq!(map.len(), doc.len());
        assert!((map.height() - 100.0 * oracle.line_height).abs() < EPSILON);
    }

    #[test]
    fn line_at_position_and_height_agree() {
        let doc = doc_of(50);
        let oracle = oracle(&doc);
        let map = full_map(&doc, &oracle);
        let line10 = doc.line(10).unwrap();
        let by_pos = map.line_at(line10.from, 0.0, QueryType::ByPos, &oracle, 0.0, 0);
        assert_eq!(by_pos.from, line10.from);
        assert!((by_pos.top - 9.0 * oracle.line_height).abs() < EPSILON);
        let by_height =
            map.line_at(0, by_pos.top + 1.0, QueryType::ByHeight, &oracle, 0.0, 0);
        assert_eq!(by_height.from, by_pos.from);
        let block = map.block_at(by_pos.top + 1.0, &oracle, 0.0, 0);
        assert_eq!(block.from, line10.from);
    }

    #[test]
    fn for_each_line_visits_each_line_once() {
        let doc = doc_of(20);
        let oracle = oracle(&doc);
        let map = full_map(&doc, &oracle);
        let mut seen = Vec::new();
        map.for_each_line(0, doc.len(), &oracle, 0.0, 0, &mut |block| {
            seen.push(block.from);
        });
        let expected: Vec<usize> = (1..=20).map(|n| doc.line(n).unwrap().from).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn lengths_sum_to_document_length_after_edits() {
        fn check(map: &HeightMap) {
            if let HeightMap::Branch(node) = map {
                assert_eq!(node.len, node.left.len() + node.brk + node.right.len());
                assert!(node.left.size() <= 2 * node.right.size().max(1));
                assert!(node.right.size() <= 2 * node.left.size().max(1));
                check(&node.left);
                check(&node.right);
            }
        }
        let doc = doc_of(200);
        let mut oracle = oracle(&doc);
        let mut map = full_map(&doc, &oracle);
        let mut current = doc;
        for i in 0..20 {
            let at = (i * 37) % (current.len() - 10);
            let new_doc = current.replace(at, at + 3, &Text::from("x\ny")).unwrap();
            let change = ChangedRange { from_a: at, to_a: at + 3, from_b: at, to_b: at + 3 };
            oracle.set_doc(new_doc.clone());
            map = map.apply_changes(&[], &current, &oracle, &[change]);
            current = new_doc;
            assert_eq!(map.len(), current.len(), "iteration {i}");
            check(&map);
        }
    }

    #[test]
    fn block_widget_contributes_its_own_height() {
        let doc = doc_of(10);
        let oracle = oracle(&doc);
        let line4 = doc.line(4).unwrap();
        let decos = DecorationSet::of(vec![DecoRange {
            from: line4.from,
            to: line4.from,
            deco: Decoration::Widget { block: true, height: 50.0, breaks: 0, side: -1 },
        }]);
        let map = HeightMap::empty().apply_changes(
            &[decos],
            &Text::empty(),
            &oracle,
            &[ChangedRange { from_a: 0, to_a: 0, from_b: 0, to_b: doc.len() }],
        );
        assert_eq!(map.len(), doc.len());
        assert!((map.height() - (10.0 * oracle.line_height + 50.0)).abs() < EPSILON);
        // Querying the line reports the widget joined above it.
        let pos = map.line_at(line4.from, 0.0, QueryType::ByPos, &oracle, 0.0, 0);
        assert!((pos.top - 3.0 * oracle.line_height).abs() < EPSILON);
        assert!((pos.height - (50.0 + oracle.line_height)).abs() < EPSILON);
        // By height, positions inside the widget resolve to the widget and
        // positions below it to the line.
        let in_widget = map.block_at(3.0 * oracle.line_height + 1.0, &oracle, 0.0, 0);
        assert_eq!(in_widget.kind, BlockKind::Widget);
        let below = map.block_at(3.0 * oracle.line_height + 51.0, &oracle, 0.0, 0);
        assert_eq!(below.from, line4.from);
        assert_eq!(below.kind, BlockKind::Text);
    }

    #[test]
    fn collapsed_range_shortens_a_line() {
        let doc = Text::from("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\nshort");
        let mut oracle = oracle(&doc);
        oracle.line_wrapping = true;
        let decos = DecorationSet::of(vec![DecoRange {
            from: 5,
            to: 35,
            deco: Decoration::Replace { block: false, widget_height: 0.0 },
        }]);
        let map = HeightMap::empty().apply_changes(
            &[decos.clone()],
            &Text::empty(),
            &oracle,
            &[ChangedRange { from_a: 0, to_a: 0, from_b: 0, to_b: doc.len() }],
        );
        let without = HeightMap::empty().apply_changes(
            &[],
            &Text::empty(),
            &oracle,
            &[ChangedRange { from_a: 0, to_a: 0, from_b: 0, to_b: doc.len() }],
        );
        // Collapsing 30 of 40 characters saves at least one wrapped row.
        assert!(map.height() < without.height());
        assert_eq!(map.len(), doc.len());
    }

    #[test]
    fn measured_heights_override_estimates() {
        let doc = doc_of(6);
        let oracle = oracle(&doc);
        let map = full_map(&doc, &oracle);
        let mut measured = Some(MeasuredHeights::new(0, vec![20.0, 21.0, 22.0, 23.0, 24.0, 25.0]));
        let updated = map.update_height(&oracle, 0, false, &mut measured);
        assert!((updated.height() - (20.0 + 21.0 + 22.0 + 23.0 + 24.0 + 25.0)).abs() < EPSILON);
        let first = updated.line_at(0, 0.0, QueryType::ByPos, &oracle, 0.0, 0);
        assert!((first.height - 20.0).abs() < EPSILON);
    }
}
