//! Syntax trees and reusable tree fragments.
//!
//! The tree type here is deliberately small: the engine treats trees as
//! opaque values produced by a pluggable parser, and only needs lengths,
//! node names, and cheap identity. Fragments record which parts of a
//! previous tree are still valid after edits, so an incremental parser can
//! skip re-parsing them.

use std::sync::Arc;

/// An immutable syntax tree (or subtree). Cloning shares the node.
#[derive(Clone)]
pub struct Tree {
    inner: Arc<TreeData>,
}

struct TreeData {
    kind: String,
    len: usize,
    children: Vec<(usize, Tree)>,
}

impl Tree {
    /// The empty tree.
    pub fn empty() -> Tree {
        Tree::new("", 0, Vec::new())
    }

    /// Build a node. `children` carry their start offset relative to this
    /// node.
    pub fn new(kind: impl Into<String>, len: usize, children: Vec<(usize, Tree)>) -> Tree {
        Tree { inner: Arc::new(TreeData { kind: kind.into(), len, children }) }
    }

    /// The node name of the root.
    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    pub fn children(&self) -> &[(usize, Tree)] {
        &self.inner.children
    }

    /// Whether two trees are the same node (identity, not structure).
    pub fn ptr_eq(&self, other: &Tree) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tree({:?}, len {})", self.inner.kind, self.inner.len)
    }
}

/// A changed range, in coordinates of the old (`a`) and new (`b`) document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangedRange {
    pub from_a: usize,
    pub to_a: usize,
    pub from_b: usize,
    pub to_b: usize,
}

/// A reusable piece of a previously-computed tree. `from..to` are positions
/// in the current document; `offset` is added to current-document positions
/// to translate them into positions inside `tree`.
#[derive(Clone)]
pub struct TreeFragment {
    pub from: usize,
    pub to: usize,
    pub tree: Tree,
    pub offset: isize,
    pub open_start: bool,
    pub open_end: bool,
}

impl std::fmt::Debug for TreeFragment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TreeFragment({}..{}, offset {})", self.from, self.to, self.offset)
    }
}

impl TreeFragment {
    /// Add a freshly-parsed tree (covering the document from 0) to a
    /// fragment set. `partial` marks a parse that was stopped early, leaving
    /// the fragment open at the end.
    pub fn add_tree(tree: &Tree, fragments: &[TreeFragment], partial: bool) -> Vec<TreeFragment> {
        let mut result = vec![TreeFragment {
            from: 0,
            to: tree.len(),
            tree: tree.clone(),
            offset: 0,
            open_start: false,
            open_end: partial,
        }];
        for fragment in fragments {
            if fragment.to > tree.len() {
                result.push(fragment.clone());
            }
        }
        result
    }

    /// Map a fragment set through document changes, dropping the parts the
    /// changes invalidated. `min_gap` suppresses fragments smaller than the
    /// gap between changes worth keeping.
    pub fn apply_changes(
        fragments: &[TreeFragment],
        changes: &[ChangedRange],
        min_gap: usize,
    ) -> Vec<TreeFragment> {
        if changes.is_empty() {
            return fragments.to_vec();
        }
        let mut result = Vec::new();
        let mut fi = 1usize;
        let mut next_f = fragments.first();
        let mut ci = 0usize;
        let mut pos = 0usize;
        let mut off = 0isize;
        loop {
            let next_c = changes.get(ci);
            let next_pos = next_c.map(|c| c.from_a).unwrap_or(usize::MAX / 2);
            if next_pos.saturating_sub(pos) >= min_gap {
                while let Some(fragment) = next_f {
                    if fragment.from >= next_pos {
                        break;
                    }
                    let mut cut = Some(fragment.clone());
                    if pos >= fragment.from || next_pos <= fragment.to || off != 0 {
                        let f_from =
                            (fragment.from.max(pos) as isize - off).max(0) as usize;
                        let f_to = (fragment.to.min(next_pos) as isize - off).max(0) as usize;
                        cut = if f_from >= f_to {
                            None
                        } else {
                            Some(TreeFragment {
                                from: f_from,
                                to: f_to,
                                tree: fragment.tree.clone(),
                                offset: fragment.offset + off,
                                open_start: ci > 0,
                                open_end: next_c.is_some(),
                            })
                        };
                    }
                    if let Some(cut) = cut {
                        result.push(cut);
                    }
                    if fragment.to > next_pos {
                        break;
                    }
                    next_f = fragments.get(fi);
                    fi += 1;
                }
            }
            let Some(change) = next_c else { break };
            ci += 1;
            pos = change.to_a;
            off += change.to_a as isize - change.to_b as isize;
        }
        result
    }

    /// Remove fragment coverage for `from..to`, so that the region will be
    /// re-parsed (used when a skipped region scrolls into view).
    pub fn cut(fragments: &[TreeFragment], from: usize, to: usize) -> Vec<TreeFragment> {
        Self::apply_changes(
            fragments,
            &[ChangedRange { from_a: from, to_a: to, from_b: from, to_b: to }],
            0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag_spans(fragments: &[TreeFragment]) -> Vec<(usize, usize)> {
        fragments.iter().map(|f| (f.from, f.to)).collect()
    }

    #[test]
    fn add_tree_covers_whole_document() {
        let tree = Tree::new("Document", 100, Vec::new());
        let fragments = TreeFragment::add_tree(&tree, &[], false);
        assert_eq!(frag_spans(&fragments), [(0, 100)]);
        assert!(!fragments[0].open_end);
        let partial = TreeFragment::add_tree(&tree, &[], true);
        assert!(partial[0].open_end);
    }

    #[test]
    fn apply_changes_splits_around_edit() {
        let tree = Tree::new("Document", 100, Vec::new());
        let fragments = TreeFragment::add_tree(&tree, &[], false);
        // Replace 40..50 by 3 characters (new doc is 93 long).
        let mapped = TreeFragment::apply_changes(
            &fragments,
            &[ChangedRange { from_a: 40, to_a: 50, from_b: 40, to_b: 43 }],
            0,
        );
        assert_eq!(frag_spans(&mapped), [(0, 40), (43, 93)]);
        assert_eq!(mapped[0].offset, 0);
        // Positions after the edit need +7 to address the old tree.
        assert_eq!(mapped[1].offset, 7);
        assert!(mapped[0].open_end);
        assert!(mapped[1].open_start);
    }

    #[test]
    fn min_gap_drops_slivers() {
        let tree = Tree::new("Document", 100, Vec::new());
        let fragments = TreeFragment::add_tree(&tree, &[], false);
        let mapped = TreeFragment::apply_changes(
            &fragments,
            &[
                ChangedRange { from_a: 10, to_a: 11, from_b: 10, to_b: 11 },
                ChangedRange { from_a: 15, to_a: 16, from_b: 15, to_b: 16 },
            ],
            128,
        );
        // The 4-character gap between the changes is not worth keeping.
        assert_eq!(frag_spans(&mapped), [(16, 100)]);
    }

    #[test]
    fn cut_removes_coverage() {
        let tree = Tree::new("Document", 100, Vec::new());
        let fragments = TreeFragment::add_tree(&tree, &[], false);
        let cut = TreeFragment::cut(&fragments, 20, 30);
        assert_eq!(frag_spans(&cut), [(0, 20), (30, 100)]);
    }
}
