use crate::text::{byte_of_char, char_len, char_slice, Text};

/// One token of document iteration. Content chunks are always whole lines
/// (or trimmed ends of a line at a range boundary), so callers can detect
/// line boundaries without scanning for `\n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chunk<'a> {
    Content(&'a str),
    Break,
}

impl<'a> Chunk<'a> {
    /// Length of the token in characters (a break counts as one).
    pub fn len(&self) -> usize {
        match self {
            Chunk::Content(s) => char_len(s),
            Chunk::Break => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cursor over a whole document, yielding alternating content and break
/// tokens. The per-level offset packs the child index in the high bits and,
/// in the low bit, whether the next token at this level is content or the
/// break before/after it.
pub struct TextIter<'a> {
    dir: i8,
    done: bool,
    nodes: Vec<&'a Text>,
    offsets: Vec<usize>,
}

fn top_size(t: &Text) -> usize {
    match t {
        Text::Leaf(leaf) => leaf.lines.len(),
        Text::Node(node) => node.children.len(),
    }
}

impl<'a> TextIter<'a> {
    pub(crate) fn new(text: &'a Text, dir: i8) -> Self {
        debug_assert!(dir == 1 || dir == -1);
        let offsets = vec![if dir > 0 { 1 } else { top_size(text) << 1 }];
        TextIter { dir, done: false, nodes: vec![text], offsets }
    }

    /// Advance to the next token, first skipping `skip` characters.
    pub fn next_skip(&mut self, mut skip: usize) -> Option<Chunk<'a>> {
        if self.done {
            return None;
        }
        let dir = self.dir as isize;
        loop {
            let last = self.nodes.len() - 1;
            let top = self.nodes[last];
            let offset_value = self.offsets[last];
            let offset = offset_value >> 1;
            let size = top_size(top);
            if offset == if dir > 0 { size } else { 0 } {
                if last == 0 {
                    self.done = true;
                    return None;
                }
                if dir > 0 {
                    self.offsets[last - 1] += 1;
                }
                self.nodes.pop();
                self.offsets.pop();
            } else if (offset_value & 1) == if dir > 0 { 0 } else { 1 } {
                self.offsets[last] = (offset_value as isize + dir) as usize;
                if skip == 0 {
                    return Some(Chunk::Break);
                }
                skip -= 1;
            } else {
                match top {
                    Text::Leaf(leaf) => {
                        let index = if dir < 0 { offset - 1 } else { offset };
                        let line = &leaf.lines[index];
                        self.offsets[last] = (offset_value as isize + dir) as usize;
                        let llen = char_len(line);
                        if llen > skip {
                            let value = if skip == 0 {
                                line.as_str()
                            } else if dir > 0 {
                                &line[byte_of_char(line, skip)..]
                            } else {
                                char_slice(line, 0, llen - skip)
                            };
                            return Some(Chunk::Content(value));
                        }
                        skip -= llen;
                    }
                    Text::Node(node) => {
                        let index = if dir < 0 { offset - 1 } else { offset };
                        let child = &node.children[index];
                        if skip > child.len() {
                            skip -= child.len();
                            self.offsets[last] = (offset_value as isize + dir) as usize;
                        } else {
                            if dir < 0 {
                                self.offsets[last] -= 1;
                            }
                            self.nodes.push(child);
                            self.offsets.push(if dir > 0 { 1 } else { top_size(child) << 1 });
                        }
                    }
                }
            }
        }
    }

    pub fn next_chunk(&mut self) -> Option<Chunk<'a>> {
        self.next_skip(0)
    }
}

impl<'a> Iterator for TextIter<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        self.next_chunk()
    }
}

/// Cursor over a sub-range of a document. Constructed with `from > to` it
/// iterates backward.
pub struct TextIterRange<'a> {
    cursor: TextIter<'a>,
    pos: usize,
    from: usize,
    to: usize,
}

impl<'a> TextIterRange<'a> {
    pub(crate) fn new(text: &'a Text, start: usize, end: usize) -> Self {
        let backward = start > end;
        TextIterRange {
            cursor: TextIter::new(text, if backward { -1 } else { 1 }),
            pos: if backward { text.len() } else { 0 },
            from: start.min(end),
            to: start.max(end),
        }
    }

    /// The document position the cursor is currently at.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn next_chunk(&mut self) -> Option<Chunk<'a>> {
        let dir = self.cursor.dir as isize;
        if dir < 0 {
            if self.pos <= self.from {
                return None;
            }
        } else if self.pos >= self.to {
            return None;
        }
        // Skip the stretch outside the range on the first call.
        let skip = if dir < 0 {
            self.pos.saturating_sub(self.to)
        } else {
            self.from.saturating_sub(self.pos)
        };
        let limit = if dir < 0 {
            self.pos - skip - self.from
        } else {
            self.to - self.pos - skip
        };
        let chunk = self.cursor.next_skip(skip)?;
        let len = chunk.len();
        self.pos = (self.pos as isize + ((len + skip) as isize) * dir) as usize;
        if len <= limit {
            return Some(chunk);
        }
        // Trim the chunk at the range boundary.
        match chunk {
            Chunk::Break => Some(Chunk::Break),
            Chunk::Content(s) => {
                let trimmed = if dir < 0 {
                    char_slice(s, len - limit, len)
                } else {
                    char_slice(s, 0, limit)
                };
                self.pos = (self.pos as isize - ((len - limit) as isize) * dir) as usize;
                Some(Chunk::Content(trimmed))
            }
        }
    }
}

impl<'a> Iterator for TextIterRange<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        self.next_chunk()
    }
}

/// Iterate lines as owned strings. Breaks are folded away; consecutive
/// breaks and boundary conditions produce the expected empty lines.
pub struct LineIter<'a> {
    inner: TextIterRange<'a>,
    after_break: bool,
    done: bool,
}

impl<'a> LineIter<'a> {
    pub(crate) fn new(inner: TextIterRange<'a>) -> Self {
        LineIter { inner, after_break: true, done: false }
    }
}

impl<'a> Iterator for LineIter<'a> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.done {
            return None;
        }
        loop {
            match self.inner.next_chunk() {
                None => {
                    self.done = true;
                    if self.after_break {
                        return Some(String::new());
                    }
                    return None;
                }
                Some(Chunk::Break) => {
                    if self.after_break {
                        return Some(String::new());
                    }
                    self.after_break = true;
                }
                Some(Chunk::Content(s)) => {
                    self.after_break = false;
                    return Some(s.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(s: &str) -> Text {
        Text::from(s)
    }

    fn collect(t: &Text) -> Vec<String> {
        t.iter(1)
            .map(|c| match c {
                Chunk::Content(s) => s.to_string(),
                Chunk::Break => "\n".to_string(),
            })
            .collect()
    }

    #[test]
    fn alternates_content_and_breaks() {
        let t = doc("ab\ncd\nef");
        assert_eq!(collect(&t), ["ab", "\n", "cd", "\n", "ef"]);
    }

    #[test]
    fn backward_iteration_reverses_tokens() {
        let t = doc("ab\ncd");
        let tokens: Vec<_> = t.iter(-1).collect();
        assert_eq!(tokens, [Chunk::Content("cd"), Chunk::Break, Chunk::Content("ab")]);
    }

    #[test]
    fn skip_lands_mid_line() {
        let t = doc("hello\nworld");
        let mut it = t.iter(1);
        assert_eq!(it.next_skip(2), Some(Chunk::Content("llo")));
        assert_eq!(it.next_chunk(), Some(Chunk::Break));
        assert_eq!(it.next_chunk(), Some(Chunk::Content("world")));
        assert_eq!(it.next_chunk(), None);
    }

    #[test]
    fn range_iteration_trims_boundaries() {
        let t = doc("one\ntwo\nthree");
        let mut it = t.iter_range(2, 9);
        assert_eq!(it.next_chunk(), Some(Chunk::Content("e")));
        assert_eq!(it.next_chunk(), Some(Chunk::Break));
        assert_eq!(it.next_chunk(), Some(Chunk::Content("two")));
        assert_eq!(it.next_chunk(), Some(Chunk::Break));
        assert_eq!(it.next_chunk(), Some(Chunk::Content("t")));
        assert_eq!(it.next_chunk(), None);
    }

    #[test]
    fn backward_range_iteration() {
        let t = doc("one\ntwo");
        let tokens: Vec<_> = t.iter_range(6, 1).collect();
        assert_eq!(tokens, [Chunk::Content("tw"), Chunk::Break, Chunk::Content("ne")]);
    }

    #[test]
    fn line_iteration() {
        let t = doc("a\n\nb\n");
        let lines: Vec<_> = t.iter_lines(None, None).collect();
        assert_eq!(lines, ["a", "", "b", ""]);
    }

    #[test]
    fn line_iteration_over_range_starting_at_break() {
        let t = doc("ab\ncd");
        let lines: Vec<_> = t.iter_lines(Some(2), Some(5)).collect();
        assert_eq!(lines, ["", "cd"]);
    }

    #[test]
    fn iteration_spans_tree_nodes() {
        let lines: Vec<String> = (0..300).map(|i| format!("l{i}")).collect();
        let t = Text::of(lines).unwrap();
        let collected: Vec<_> = t.iter_lines(None, None).collect();
        assert_eq!(collected.len(), 300);
        assert_eq!(collected[0], "l0");
        assert_eq!(collected[299], "l299");
    }
}
