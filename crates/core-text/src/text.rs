use std::fmt;
use std::sync::Arc;

use crate::error::TextError;
use crate::iter::{Chunk, LineIter, TextIter, TextIterRange};

/// Character budget for a leaf (including the implicit break between lines).
pub(crate) const MAX_LEAF_LEN: usize = 512;
/// Maximum number of line strings stored in one leaf.
pub(crate) const MAX_LEAF_LINES: usize = 32;
/// Maximum number of children per branch node.
pub(crate) const BRANCH: usize = 32;

/// An immutable document. Cloning is O(1); all edits return a new `Text`
/// sharing unchanged subtrees with the original.
#[derive(Clone)]
pub enum Text {
    Leaf(Arc<Leaf>),
    Node(Arc<Node>),
}

/// A leaf: consecutive whole lines. `len` counts characters plus one per
/// break between the stored lines. A single line is never split across
/// leaves, which keeps line lookups and iteration simple.
pub struct Leaf {
    pub(crate) lines: Vec<String>,
    pub(crate) len: usize,
}

/// A branch node. Children are line-aligned: an implicit line break sits
/// between every pair of siblings, so `len` is the sum of child lengths plus
/// `children.len() - 1`.
pub struct Node {
    pub(crate) children: Vec<Text>,
    pub(crate) len: usize,
    pub(crate) lines: usize,
}

/// One line of a document, with its absolute extent. `from..to` excludes the
/// terminating line break; `number` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub from: usize,
    pub to: usize,
    pub number: usize,
    pub text: String,
}

impl Line {
    /// Length of the line in characters, excluding the break.
    pub fn len(&self) -> usize {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }
}

pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `idx`-th character of `s` (or `s.len()` when `idx`
/// equals the character count).
pub(crate) fn byte_of_char(s: &str, idx: usize) -> usize {
    if idx == 0 {
        return 0;
    }
    s.char_indices()
        .nth(idx)
        .map(|(b, _)| b)
        .unwrap_or(s.len())
}

/// Slice `s` by character offsets.
pub(crate) fn char_slice(s: &str, from: usize, to: usize) -> &str {
    &s[byte_of_char(s, from)..byte_of_char(s, to)]
}

fn leaf_from(lines: Vec<String>) -> Text {
    let len = lines.iter().map(|l| char_len(l)).sum::<usize>() + lines.len() - 1;
    Text::Leaf(Arc::new(Leaf { lines, len }))
}

/// The text between character offsets `from..to` of a leaf's line array,
/// expressed again as a line array. Boundary lines are trimmed; interior
/// breaks are preserved.
fn slice_lines(lines: &[String], from: usize, to: usize) -> Vec<String> {
    let mut result: Vec<String> = vec![String::new()];
    let mut pos = 0usize;
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            // Implicit break between lines occupies one character at `pos`.
            if pos >= from && pos < to {
                result.push(String::new());
            }
            pos += 1;
            if pos >= to {
                break;
            }
        }
        let llen = char_len(line);
        if pos + llen > from && pos < to && llen > 0 {
            let lo = from.saturating_sub(pos).min(llen);
            let hi = (to - pos).min(llen);
            if hi > lo {
                if let Some(last) = result.last_mut() {
                    last.push_str(char_slice(line, lo, hi));
                }
            }
        }
        pos += llen;
        if pos >= to {
            break;
        }
    }
    result
}

/// Join two line arrays such that the last line of `a` and the first line of
/// `b` become a single line (no break at the seam).
fn join_lines(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(a.len() + b.len() - 1);
    out.extend_from_slice(&a[..a.len() - 1]);
    let mut seam = a[a.len() - 1].clone();
    seam.push_str(&b[0]);
    out.push(seam);
    out.extend_from_slice(&b[1..]);
    out
}

/// Split a line array into leaves respecting the leaf budgets. A single line
/// longer than the character budget still becomes one leaf; lines are atomic.
fn split_leaves(lines: Vec<String>) -> Vec<Text> {
    let mut target = Vec::new();
    let mut part: Vec<String> = Vec::new();
    let mut len: usize = 0;
    for line in lines {
        if !part.is_empty() {
            len += 1;
        }
        len += char_len(&line);
        part.push(line);
        if part.len() >= MAX_LEAF_LINES || len >= MAX_LEAF_LEN {
            target.push(leaf_from(std::mem::take(&mut part)));
            len = 0;
        }
    }
    if !part.is_empty() || target.is_empty() {
        if part.is_empty() {
            part.push(String::new());
        }
        target.push(leaf_from(part));
    }
    target
}

/// Rebuild a balanced tree from a sequence of parts (leaves or shared
/// subtrees), joining them with implicit line breaks. Small runs of leaves
/// are merged; oversized nodes are split back into their children.
fn node_from(parts: Vec<Text>) -> Text {
    let total_lines: usize = parts.iter().map(Text::lines).sum();
    let total_len: usize =
        parts.iter().map(Text::len).sum::<usize>() + parts.len().saturating_sub(1);
    if total_lines <= MAX_LEAF_LINES && total_len <= MAX_LEAF_LEN {
        let mut flat = Vec::with_capacity(total_lines);
        for part in &parts {
            part.flatten_into(&mut flat);
        }
        return leaf_from(flat);
    }
    let chunk = usize::max(MAX_LEAF_LINES, total_lines >> 5);
    let mut builder = ChunkBuilder {
        chunk,
        max_chunk: chunk << 1,
        min_chunk: chunk >> 1,
        chunked: Vec::new(),
        current: Vec::new(),
        current_lines: 0,
    };
    for part in parts {
        builder.add(part);
    }
    builder.flush();
    let mut chunked = builder.chunked;
    if chunked.len() == 1 {
        return chunked.remove(0);
    }
    Text::Node(Arc::new(Node {
        len: total_len,
        lines: total_lines,
        children: chunked,
    }))
}

struct ChunkBuilder {
    chunk: usize,
    max_chunk: usize,
    min_chunk: usize,
    chunked: Vec<Text>,
    current: Vec<Text>,
    current_lines: usize,
}

impl ChunkBuilder {
    fn add(&mut self, child: Text) {
        if child.lines() > self.max_chunk {
            if let Text::Node(node) = &child {
                for sub in &node.children {
                    self.add(sub.clone());
                }
                return;
            }
        }
        if child.lines() > self.min_chunk
            && (self.current_lines > self.min_chunk || self.current_lines == 0)
        {
            // Big enough to stand on its own.
            self.flush();
            self.chunked.push(child);
            return;
        }
        // Merge small adjacent leaves so edits don't fragment the tree.
        if let (Text::Leaf(leaf), Some(Text::Leaf(last))) = (&child, self.current.last()) {
            if self.current_lines > 0
                && leaf.lines.len() + last.lines.len() <= MAX_LEAF_LINES
                && leaf.len + last.len + 1 <= MAX_LEAF_LEN
            {
                self.current_lines += leaf.lines.len();
                let mut lines = last.lines.clone();
                lines.extend(leaf.lines.iter().cloned());
                let merged = leaf_from(lines);
                let slot = self.current.len() - 1;
                self.current[slot] = merged;
                return;
            }
        }
        if self.current_lines + child.lines() > self.chunk {
            self.flush();
        }
        self.current_lines += child.lines();
        self.current.push(child);
    }

    fn flush(&mut self) {
        if self.current_lines == 0 {
            return;
        }
        let text = if self.current.len() == 1 {
            self.current.remove(0)
        } else if self.current.len() <= BRANCH {
            let children = std::mem::take(&mut self.current);
            let len =
                children.iter().map(Text::len).sum::<usize>() + children.len() - 1;
            let lines = children.iter().map(Text::lines).sum();
            Text::Node(Arc::new(Node { children, len, lines }))
        } else {
            node_from(std::mem::take(&mut self.current))
        };
        self.chunked.push(text);
        self.current.clear();
        self.current_lines = 0;
    }
}

const OPEN_FROM: u8 = 1;
const OPEN_TO: u8 = 2;

impl Text {
    /// The empty document: a single empty line.
    pub fn empty() -> Text {
        leaf_from(vec![String::new()])
    }

    /// Build a document from its lines. The lines themselves may not contain
    /// line breaks, and there must be at least one of them.
    pub fn of<S: Into<String>>(lines: Vec<S>) -> Result<Text, TextError> {
        if lines.is_empty() {
            return Err(TextError::NoLines);
        }
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        if lines.iter().any(|l| l.contains('\n')) {
            return Err(TextError::InlineBreak);
        }
        Ok(Self::from_lines(lines))
    }

    fn from_lines(lines: Vec<String>) -> Text {
        let mut leaves = split_leaves(lines);
        if leaves.len() == 1 {
            leaves.remove(0)
        } else {
            node_from(leaves)
        }
    }

    /// Length of the document in characters, line breaks included.
    pub fn len(&self) -> usize {
        match self {
            Text::Leaf(leaf) => leaf.len,
            Text::Node(node) => node.len,
        }
    }

    /// True when the document is a single empty line.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of lines. Always at least 1.
    pub fn lines(&self) -> usize {
        match self {
            Text::Leaf(leaf) => leaf.lines.len(),
            Text::Node(node) => node.lines,
        }
    }

    /// The children of a branch node, or `None` for a leaf. Exposed for
    /// structural tests.
    pub fn children(&self) -> Option<&[Text]> {
        match self {
            Text::Leaf(_) => None,
            Text::Node(node) => Some(&node.children),
        }
    }

    /// Whether two texts share the same root node. Used to observe
    /// structural sharing; content equality is `==`.
    pub fn same_node(&self, other: &Text) -> bool {
        match (self, other) {
            (Text::Leaf(a), Text::Leaf(b)) => Arc::ptr_eq(a, b),
            (Text::Node(a), Text::Node(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn flatten_into(&self, target: &mut Vec<String>) {
        match self {
            Text::Leaf(leaf) => target.extend(leaf.lines.iter().cloned()),
            Text::Node(node) => {
                for child in &node.children {
                    child.flatten_into(target);
                }
            }
        }
    }

    /// The 1-based `n`-th line.
    pub fn line(&self, n: usize) -> Result<Line, TextError> {
        if n < 1 || n > self.lines() {
            return Err(TextError::LineBounds { line: n, lines: self.lines() });
        }
        Ok(self.line_inner(n, 0, 1))
    }

    fn line_inner(&self, n: usize, pos: usize, first: usize) -> Line {
        match self {
            Text::Leaf(leaf) => {
                let mut p = pos;
                let mut num = first;
                for line in &leaf.lines {
                    let llen = char_len(line);
                    if num == n {
                        return Line { from: p, to: p + llen, number: n, text: line.clone() };
                    }
                    p += llen + 1;
                    num += 1;
                }
                unreachable!("line {n} not inside subtree starting at line {first}")
            }
            Text::Node(node) => {
                let mut p = pos;
                let mut num = first;
                for child in &node.children {
                    if num + child.lines() > n {
                        return child.line_inner(n, p, num);
                    }
                    num += child.lines();
                    p += child.len() + 1;
                }
                unreachable!("line {n} not inside subtree starting at line {first}")
            }
        }
    }

    /// The line around character position `pos`. A position sitting on a line
    /// break belongs to the line the break terminates.
    pub fn line_at(&self, pos: usize) -> Result<Line, TextError> {
        if pos > self.len() {
            return Err(TextError::Bounds { pos, len: self.len() });
        }
        Ok(self.line_at_inner(pos, 0, 1))
    }

    fn line_at_inner(&self, pos: usize, start: usize, first: usize) -> Line {
        match self {
            Text::Leaf(leaf) => {
                let mut p = start;
                let mut num = first;
                for line in &leaf.lines {
                    let llen = char_len(line);
                    if pos <= p + llen {
                        return Line { from: p, to: p + llen, number: num, text: line.clone() };
                    }
                    p += llen + 1;
                    num += 1;
                }
                unreachable!("position {pos} not inside subtree starting at {start}")
            }
            Text::Node(node) => {
                let mut p = start;
                let mut num = first;
                for child in &node.children {
                    if pos <= p + child.len() {
                        return child.line_at_inner(pos, p, num);
                    }
                    p += child.len() + 1;
                    num += child.lines();
                }
                unreachable!("position {pos} not inside subtree starting at {start}")
            }
        }
    }

    fn check_range(&self, from: usize, to: usize) -> Result<(), TextError> {
        if from > to {
            return Err(TextError::InvalidRange { from, to });
        }
        if to > self.len() {
            return Err(TextError::Bounds { pos: to, len: self.len() });
        }
        Ok(())
    }

    /// Replace `from..to` with another document, producing a new document.
    pub fn replace(&self, from: usize, to: usize, insert: &Text) -> Result<Text, TextError> {
        self.check_range(from, to)?;
        Ok(self.replace_inner(from, to, insert))
    }

    fn replace_inner(&self, from: usize, to: usize, insert: &Text) -> Text {
        let mut parts = Vec::new();
        self.decompose(0, from, &mut parts, OPEN_TO);
        if insert.len() > 0 {
            insert.decompose(0, insert.len(), &mut parts, OPEN_FROM | OPEN_TO);
        }
        self.decompose(to, self.len(), &mut parts, OPEN_FROM);
        node_from(parts)
    }

    /// Concatenate another document onto this one (with a line seam, not a
    /// break: the last line of `self` and the first line of `other` join).
    pub fn append(&self, other: &Text) -> Text {
        self.replace_inner(self.len(), self.len(), other)
    }

    /// The sub-document `from..to`.
    pub fn slice(&self, from: usize, to: usize) -> Result<Text, TextError> {
        self.check_range(from, to)?;
        let mut parts = Vec::new();
        self.decompose(from, to, &mut parts, 0);
        Ok(node_from(parts))
    }

    /// The content of `from..to` as a string, with breaks rendered as
    /// `line_sep` (default `"\n"`).
    pub fn slice_string(
        &self,
        from: usize,
        to: usize,
        line_sep: Option<&str>,
    ) -> Result<String, TextError> {
        self.check_range(from, to)?;
        let sep = line_sep.unwrap_or("\n");
        let mut out = String::new();
        let mut iter = self.iter_range(from, to);
        while let Some(chunk) = iter.next_chunk() {
            match chunk {
                Chunk::Content(s) => out.push_str(s),
                Chunk::Break => out.push_str(sep),
            }
        }
        Ok(out)
    }

    /// Decompose `from..to` into `target`. `OPEN_FROM` glues the first
    /// produced leaf onto the previous entry in `target` (no break at the
    /// seam); `OPEN_TO` forbids sharing the final boundary child so the last
    /// entry is always a leaf a later `OPEN_FROM` can merge with.
    fn decompose(&self, from: usize, to: usize, target: &mut Vec<Text>, open: u8) {
        match self {
            Text::Leaf(leaf) => {
                let whole = from == 0 && to >= leaf.len;
                if open & OPEN_FROM != 0 {
                    let prev = match target.pop() {
                        Some(Text::Leaf(prev)) => prev,
                        _ => unreachable!("open-from decompose must follow a leaf part"),
                    };
                    let tail;
                    let new_lines: &[String] = if whole {
                        &leaf.lines
                    } else {
                        tail = slice_lines(&leaf.lines, from, to);
                        &tail
                    };
                    let mut lines = join_lines(&prev.lines, new_lines);
                    if lines.len() <= MAX_LEAF_LINES {
                        target.push(leaf_from(lines));
                    } else {
                        let split = lines.split_off(lines.len() >> 1);
                        target.push(leaf_from(lines));
                        target.push(leaf_from(split));
                    }
                } else if whole {
                    target.push(self.clone());
                } else {
                    target.push(leaf_from(slice_lines(&leaf.lines, from, to)));
                }
            }
            Text::Node(node) => {
                let mut pos = 0usize;
                for child in &node.children {
                    let end = pos + child.len();
                    if from <= end && to >= pos {
                        let mut child_open = 0;
                        if pos <= from {
                            child_open |= open & OPEN_FROM;
                        }
                        if end >= to {
                            child_open |= open & OPEN_TO;
                        }
                        if pos >= from && end <= to && child_open == 0 {
                            target.push(child.clone());
                        } else {
                            child.decompose(
                                from.saturating_sub(pos),
                                to.saturating_sub(pos),
                                target,
                                child_open,
                            );
                        }
                    }
                    pos = end + 1;
                    if pos > to {
                        break;
                    }
                }
            }
        }
    }

    /// Iterate the document. `dir` is 1 for forward, -1 for backward.
    pub fn iter(&self, dir: i8) -> TextIter<'_> {
        TextIter::new(self, dir)
    }

    /// Iterate the characters inside `from..to`. When `from > to` the
    /// iteration runs backward.
    pub fn iter_range(&self, from: usize, to: usize) -> TextIterRange<'_> {
        TextIterRange::new(self, from, to)
    }

    /// Iterate lines as owned strings, over the given character range
    /// (defaulting to the whole document).
    pub fn iter_lines(&self, from: Option<usize>, to: Option<usize>) -> LineIter<'_> {
        let from = from.unwrap_or(0);
        let to = to.unwrap_or(self.len());
        LineIter::new(self.iter_range(from, to))
    }

    /// Collect the document's lines. Mostly for tests and serialization.
    pub fn to_lines(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.lines());
        self.flatten_into(&mut out);
        out
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Text {
        Text::from_lines(s.split('\n').map(String::from).collect())
    }
}

impl From<String> for Text {
    fn from(s: String) -> Text {
        Text::from(s.as_str())
    }
}

impl PartialEq for Text {
    fn eq(&self, other: &Text) -> bool {
        if self.same_node(other) {
            return true;
        }
        if self.len() != other.len() || self.lines() != other.lines() {
            return false;
        }
        // Content chunks are whole lines, so equal documents produce
        // identical chunk streams.
        let mut a = self.iter(1);
        let mut b = other.iter(1);
        loop {
            match (a.next_chunk(), b.next_chunk()) {
                (None, None) => return true,
                (Some(Chunk::Break), Some(Chunk::Break)) => {}
                (Some(Chunk::Content(x)), Some(Chunk::Content(y))) if x == y => {}
                _ => return false,
            }
        }
    }
}

impl Eq for Text {}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.iter(1);
        while let Some(chunk) = iter.next_chunk() {
            match chunk {
                Chunk::Content(s) => f.write_str(s)?,
                Chunk::Break => f.write_str("\n")?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Text({:?})", self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(s: &str) -> Text {
        Text::from(s)
    }

    #[test]
    fn empty_doc_has_one_line() {
        let t = Text::empty();
        assert_eq!(t.len(), 0);
        assert_eq!(t.lines(), 1);
        assert_eq!(t.to_string(), "");
    }

    #[test]
    fn of_rejects_breaks_and_empty() {
        assert_eq!(Text::of(Vec::<String>::new()), Err(TextError::NoLines));
        assert_eq!(Text::of(vec!["a\nb"]), Err(TextError::InlineBreak));
        let t = Text::of(vec!["one", "two"]).unwrap();
        assert_eq!(t.to_string(), "one\ntwo");
    }

    #[test]
    fn length_counts_breaks() {
        let t = doc("ab\ncd");
        assert_eq!(t.len(), 5);
        assert_eq!(t.lines(), 2);
    }

    #[test]
    fn line_lookup() {
        let t = doc("one\ntwo\nthree");
        let l2 = t.line(2).unwrap();
        assert_eq!((l2.from, l2.to, l2.text.as_str()), (4, 7, "two"));
        assert_eq!(t.line(4).unwrap_err(), TextError::LineBounds { line: 4, lines: 3 });
    }

    #[test]
    fn line_at_break_belongs_to_ending_line() {
        let t = doc("one\ntwo");
        assert_eq!(t.line_at(3).unwrap().number, 1);
        assert_eq!(t.line_at(4).unwrap().number, 2);
        assert_eq!(t.line_at(7).unwrap().number, 2);
        assert!(t.line_at(8).is_err());
    }

    #[test]
    fn replace_within_line() {
        let t = doc("hello");
        let r = t.replace(2, 4, &doc("w")).unwrap();
        assert_eq!(r.to_string(), "hewo");
        assert_eq!(r.len(), 4);
    }

    #[test]
    fn replace_across_lines() {
        let t = doc("one\ntwo\nthree");
        let r = t.replace(2, 9, &doc("X")).unwrap();
        assert_eq!(r.to_string(), "onXree");
        assert_eq!(r.lines(), 1);
    }

    #[test]
    fn replace_inserting_breaks() {
        let t = doc("ab");
        let r = t.replace(1, 1, &doc("x\ny")).unwrap();
        assert_eq!(r.to_string(), "ax\nyb");
        assert_eq!(r.lines(), 2);
    }

    #[test]
    fn delete_break_joins_lines() {
        let t = doc("ab\ncd");
        let r = t.replace(2, 3, &Text::empty()).unwrap();
        assert_eq!(r.to_string(), "abcd");
        assert_eq!(r.lines(), 1);
    }

    #[test]
    fn replace_whole_is_replacement() {
        let t = doc("some\ndocument");
        let other = doc("x\ny\nz");
        let r = t.replace(0, t.len(), &other).unwrap();
        assert_eq!(r, other);
    }

    #[test]
    fn slice_len_property() {
        let t = doc("one\ntwo\nthree\nfour");
        for (from, to) in [(0, 0), (0, 4), (2, 9), (5, 18), (4, 7)] {
            assert_eq!(t.slice(from, to).unwrap().len(), to - from, "{from}..{to}");
        }
        assert_eq!(t.slice(2, 9).unwrap().to_string(), "e\ntwo\nt");
    }

    #[test]
    fn slice_string_custom_separator() {
        let t = doc("a\nb\nc");
        assert_eq!(t.slice_string(0, t.len(), Some("|")).unwrap(), "a|b|c");
    }

    #[test]
    fn append_joins_on_a_seam() {
        let a = doc("one\ntw");
        let b = doc("o\nthree");
        assert_eq!(a.append(&b).to_string(), "one\ntwo\nthree");
    }

    #[test]
    fn bounds_errors() {
        let t = doc("abc");
        assert!(matches!(t.slice(1, 9), Err(TextError::Bounds { .. })));
        assert!(matches!(t.replace(2, 1, &Text::empty()), Err(TextError::InvalidRange { .. })));
    }

    #[test]
    fn unicode_offsets_are_characters() {
        let t = doc("aé漢\nz");
        assert_eq!(t.len(), 5);
        assert_eq!(t.slice_string(1, 3, None).unwrap(), "é漢");
        assert_eq!(t.line_at(4).unwrap().text, "z");
    }

    #[test]
    fn large_doc_builds_tree_and_shares_structure() {
        let lines: Vec<String> = (0..2000).map(|i| format!("line {i}")).collect();
        let t = Text::of(lines).unwrap();
        assert_eq!(t.lines(), 2000);
        let children = t.children().expect("large doc should be a branch");
        assert!(children.len() <= BRANCH);
        // Edit near the end; the first child must be shared untouched.
        let edited = t.replace(t.len() - 1, t.len(), &doc("X")).unwrap();
        let edited_children = edited.children().expect("still a branch");
        assert!(children[0].same_node(&edited_children[0]));
    }

    #[test]
    fn leaf_budgets_hold() {
        fn check(t: &Text) {
            match t {
                Text::Leaf(leaf) => {
                    assert!(leaf.lines.len() <= MAX_LEAF_LINES);
                }
                Text::Node(node) => {
                    assert!(node.children.len() <= BRANCH);
                    let sum: usize = node.children.iter().map(Text::len).sum::<usize>()
                        + node.children.len()
                        - 1;
                    assert_eq!(sum, node.len);
                    for child in &node.children {
                        check(child);
                    }
                }
            }
        }
        let lines: Vec<String> = (0..500).map(|i| format!("content of line number {i}")).collect();
        let mut t = Text::of(lines).unwrap();
        check(&t);
        for i in 0..40 {
            t = t.replace(i * 7, i * 7 + 1, &doc("yy")).unwrap();
            check(&t);
        }
    }

    #[test]
    fn eq_compares_content() {
        let a = doc("one\ntwo");
        let mut b = doc("one\nt");
        b = b.append(&doc("wo"));
        assert_eq!(a, b);
        assert_ne!(a, doc("one\ntwO"));
    }
}
