//! Multi-range editor selections.

use serde_json::{json, Value};

use crate::change::ChangeDesc;
use crate::error::StateError;

const BIDI_MASK: u32 = 7;
const ASSOC_BEFORE: u32 = 8;
const ASSOC_AFTER: u32 = 16;
const INVERTED: u32 = 32;
const GOAL_SHIFT: u32 = 6;
const GOAL_UNSET: u32 = 0xff_ffff;

/// A single selection range, stored as `(from, to, flags)` with `from <= to`.
/// The flag word packs the bidi level (3 bits, 7 = unset), the association
/// side (2 bits), an inversion bit (anchor after head), and the goal column
/// used by vertical cursor motion (24 bits, all-ones = unset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRange {
    pub from: usize,
    pub to: usize,
    flags: u32,
}

impl SelectionRange {
    fn new(from: usize, to: usize, flags: u32) -> SelectionRange {
        SelectionRange { from, to, flags }
    }

    /// A cursor (empty range) at `pos`. `assoc` records which side the
    /// cursor sticks to when the position is ambiguous (line wrapping,
    /// replacements): negative for the character before, positive after.
    pub fn cursor(pos: usize, assoc: i32, bidi_level: Option<u8>, goal_column: Option<u32>) -> SelectionRange {
        let flags = (if assoc == 0 {
            0
        } else if assoc < 0 {
            ASSOC_BEFORE
        } else {
            ASSOC_AFTER
        }) | Self::bidi_flags(bidi_level)
            | (goal_column.unwrap_or(GOAL_UNSET).min(GOAL_UNSET) << GOAL_SHIFT);
        SelectionRange::new(pos, pos, flags)
    }

    /// A range between `anchor` and `head`. The head may precede the anchor;
    /// the stored extent is normalised with an inversion flag.
    pub fn range(anchor: usize, head: usize, goal_column: Option<u32>, bidi_level: Option<u8>) -> SelectionRange {
        let flags = (goal_column.unwrap_or(GOAL_UNSET).min(GOAL_UNSET) << GOAL_SHIFT)
            | Self::bidi_flags(bidi_level);
        if head < anchor {
            SelectionRange::new(head, anchor, INVERTED | flags)
        } else {
            SelectionRange::new(anchor, head, (if head > anchor { ASSOC_AFTER } else { 0 }) | flags)
        }
    }

    fn bidi_flags(level: Option<u8>) -> u32 {
        match level {
            None => 7,
            Some(level) => u32::from(level.min(6)) & BIDI_MASK,
        }
    }

    /// The side of the range that doesn't move when extending it.
    pub fn anchor(&self) -> usize {
        if self.flags & INVERTED != 0 { self.to } else { self.from }
    }

    /// The side that moves.
    pub fn head(&self) -> usize {
        if self.flags & INVERTED != 0 { self.from } else { self.to }
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    pub fn assoc(&self) -> i32 {
        if self.flags & ASSOC_BEFORE != 0 {
            -1
        } else if self.flags & ASSOC_AFTER != 0 {
            1
        } else {
            0
        }
    }

    pub fn bidi_level(&self) -> Option<u8> {
        let level = self.flags & BIDI_MASK;
        if level == 7 { None } else { Some(level as u8) }
    }

    pub fn goal_column(&self) -> Option<u32> {
        let goal = self.flags >> GOAL_SHIFT;
        if goal == GOAL_UNSET { None } else { Some(goal) }
    }

    /// Map the range through a change. An empty range stays empty, using
    /// `assoc`; otherwise `from` associates right and `to` left, so a range
    /// collapsing across a deletion becomes a cursor.
    pub fn map(&self, change: &ChangeDesc, assoc: i32) -> Result<SelectionRange, StateError> {
        let (from, to) = if self.is_empty() {
            let pos = change.map_pos(self.from, assoc)?;
            (pos, pos)
        } else {
            (change.map_pos(self.from, 1)?, change.map_pos(self.to, -1)?)
        };
        if from == self.from && to == self.to {
            Ok(*self)
        } else {
            Ok(SelectionRange::new(from.min(to), from.max(to), self.flags))
        }
    }

    pub fn to_json(&self) -> Value {
        json!({ "anchor": self.anchor(), "head": self.head() })
    }

    pub fn from_json(json: &Value) -> Result<SelectionRange, StateError> {
        let anchor = json
            .get("anchor")
            .and_then(Value::as_u64)
            .ok_or_else(|| StateError::SchemaViolation("invalid selection range".into()))?;
        let head = json
            .get("head")
            .and_then(Value::as_u64)
            .ok_or_else(|| StateError::SchemaViolation("invalid selection range".into()))?;
        Ok(SelectionRange::range(anchor as usize, head as usize, None, None))
    }
}

/// A non-empty, ordered set of selection ranges with one main range.
/// Invariants: ranges are sorted by `from`; non-empty ranges don't overlap
/// (empty ranges may touch a neighbour).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorSelection {
    ranges: Vec<SelectionRange>,
    main_index: usize,
}

impl EditorSelection {
    /// Build a selection, sorting and merging the given ranges as needed.
    pub fn create(ranges: Vec<SelectionRange>, main_index: usize) -> Result<EditorSelection, StateError> {
        if ranges.is_empty() {
            return Err(StateError::SchemaViolation("a selection needs at least one range".into()));
        }
        if main_index >= ranges.len() {
            return Err(StateError::SchemaViolation(format!(
                "main selection index {main_index} out of range"
            )));
        }
        let mut pos = 0usize;
        for (i, range) in ranges.iter().enumerate() {
            let misordered =
                if range.is_empty() { i > 0 && range.from <= pos } else { range.from < pos };
            if misordered {
                return Ok(Self::normalized(ranges, main_index));
            }
            pos = range.to;
        }
        Ok(EditorSelection { ranges, main_index })
    }

    /// A selection holding a single range.
    pub fn single(anchor: usize, head: usize) -> EditorSelection {
        EditorSelection {
            ranges: vec![SelectionRange::range(anchor, head, None, None)],
            main_index: 0,
        }
    }

    /// A selection holding a single cursor.
    pub fn cursor(pos: usize) -> EditorSelection {
        EditorSelection {
            ranges: vec![SelectionRange::cursor(pos, 0, None, None)],
            main_index: 0,
        }
    }

    fn normalized(mut ranges: Vec<SelectionRange>, main_index: usize) -> EditorSelection {
        let main = ranges[main_index];
        ranges.sort_by_key(|r| r.from);
        let mut main_index = ranges.iter().position(|r| *r == main).unwrap_or(0);
        let mut i = 1;
        while i < ranges.len() {
            let range = ranges[i];
            let prev = ranges[i - 1];
            let overlap =
                if range.is_empty() { range.from <= prev.to } else { range.from < prev.to };
            if overlap {
                let from = prev.from;
                let to = range.to.max(prev.to);
                if i <= main_index {
                    main_index -= 1;
                }
                ranges[i - 1] = if range.anchor() > range.head() {
                    SelectionRange::range(to, from, None, None)
                } else {
                    SelectionRange::range(from, to, None, None)
                };
                ranges.remove(i);
            } else {
                i += 1;
            }
        }
        EditorSelection { ranges, main_index }
    }

    pub fn ranges(&self) -> &[SelectionRange] {
        &self.ranges
    }

    pub fn main_index(&self) -> usize {
        self.main_index
    }

    pub fn main(&self) -> &SelectionRange {
        &self.ranges[self.main_index]
    }

    /// A copy of this selection holding only the main range.
    pub fn as_single(&self) -> EditorSelection {
        if self.ranges.len() == 1 {
            self.clone()
        } else {
            EditorSelection { ranges: vec![*self.main()], main_index: 0 }
        }
    }

    /// Map every range through a change.
    pub fn map(&self, change: &ChangeDesc, assoc: i32) -> Result<EditorSelection, StateError> {
        if change.is_empty() {
            return Ok(self.clone());
        }
        let mut mapped = Vec::with_capacity(self.ranges.len());
        for range in &self.ranges {
            mapped.push(range.map(change, assoc)?);
        }
        Self::create(mapped, self.main_index)
    }

    /// Replace the range at `which`, re-normalising.
    pub fn replace_range(&self, range: SelectionRange, which: usize) -> Result<EditorSelection, StateError> {
        let mut ranges = self.ranges.clone();
        ranges[which] = range;
        Self::create(ranges, self.main_index)
    }

    /// Check every range against a document length.
    pub fn assert_valid(&self, doc_len: usize) -> Result<(), StateError> {
        for range in &self.ranges {
            if range.to > doc_len {
                return Err(StateError::Bounds(format!(
                    "selection range {}..{} outside of document (length {doc_len})",
                    range.from, range.to
                )));
            }
        }
        Ok(())
    }

    /// JSON form: `{ranges: [{anchor, head}…], main}`. Association and goal
    /// column are not serialised.
    pub fn to_json(&self) -> Value {
        json!({
            "ranges": self.ranges.iter().map(SelectionRange::to_json).collect::<Vec<_>>(),
            "main": self.main_index,
        })
    }

    pub fn from_json(json: &Value) -> Result<EditorSelection, StateError> {
        let ranges = json
            .get("ranges")
            .and_then(Value::as_array)
            .ok_or_else(|| StateError::SchemaViolation("invalid selection".into()))?;
        let main = json
            .get("main")
            .and_then(Value::as_u64)
            .ok_or_else(|| StateError::SchemaViolation("invalid selection".into()))?
            as usize;
        let ranges = ranges
            .iter()
            .map(SelectionRange::from_json)
            .collect::<Result<Vec<_>, _>>()?;
        Self::create(ranges, main)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeSet, ChangeSpec};

    fn range(anchor: usize, head: usize) -> SelectionRange {
        SelectionRange::range(anchor, head, None, None)
    }

    #[test]
    fn range_normalises_inversion() {
        let r = range(5, 2);
        assert_eq!((r.from, r.to), (2, 5));
        assert_eq!((r.anchor(), r.head()), (5, 2));
    }

    #[test]
    fn cursor_packs_metadata() {
        let c = SelectionRange::cursor(3, -1, Some(2), Some(10));
        assert!(c.is_empty());
        assert_eq!(c.assoc(), -1);
        assert_eq!(c.bidi_level(), Some(2));
        assert_eq!(c.goal_column(), Some(10));
        let plain = SelectionRange::cursor(3, 0, None, None);
        assert_eq!(plain.assoc(), 0);
        assert_eq!(plain.bidi_level(), None);
        assert_eq!(plain.goal_column(), None);
    }

    #[test]
    fn create_rejects_empty() {
        assert!(matches!(
            EditorSelection::create(vec![], 0),
            Err(StateError::SchemaViolation(_))
        ));
    }

    #[test]
    fn create_sorts_and_merges() {
        let sel = EditorSelection::create(
            vec![range(8, 10), range(0, 3), range(2, 5)],
            0,
        )
        .unwrap();
        let spans: Vec<_> = sel.ranges().iter().map(|r| (r.from, r.to)).collect();
        assert_eq!(spans, [(0, 5), (8, 10)]);
        // The main range (8..10) is tracked through the reorder.
        assert_eq!((sel.main().from, sel.main().to), (8, 10));
    }

    #[test]
    fn merge_preserves_inversion_of_later_range() {
        let sel = EditorSelection::create(vec![range(0, 4), range(6, 2)], 0).unwrap();
        assert_eq!(sel.ranges().len(), 1);
        let merged = sel.ranges()[0];
        assert_eq!((merged.from, merged.to), (0, 6));
        assert!(merged.anchor() > merged.head());
    }

    #[test]
    fn empty_ranges_may_touch() {
        let sel = EditorSelection::create(
            vec![SelectionRange::cursor(0, 0, None, None), range(2, 4), SelectionRange::cursor(5, 0, None, None)],
            0,
        )
        .unwrap();
        assert_eq!(sel.ranges().len(), 3);
    }

    #[test]
    fn map_collapses_over_deletion() {
        let change = ChangeSet::of(&ChangeSpec::delete(2, 6), 8).unwrap();
        let sel = EditorSelection::create(vec![range(3, 5)], 0).unwrap();
        let mapped = sel.map(&change.desc(), -1).unwrap();
        let r = mapped.ranges()[0];
        assert!(r.is_empty());
        assert_eq!(r.from, 2);
    }

    #[test]
    fn map_keeps_surrounding_range() {
        let change = ChangeSet::of(&ChangeSpec::insert(4, core_text::Text::from("xx")), 8).unwrap();
        let sel = EditorSelection::create(vec![range(2, 6)], 0).unwrap();
        let mapped = sel.map(&change.desc(), -1).unwrap();
        let r = mapped.ranges()[0];
        assert_eq!((r.from, r.to), (2, 8));
    }

    #[test]
    fn as_single_keeps_main() {
        let sel = EditorSelection::create(vec![range(0, 1), range(4, 6)], 1).unwrap();
        let single = sel.as_single();
        assert_eq!(single.ranges().len(), 1);
        assert_eq!((single.main().from, single.main().to), (4, 6));
    }

    #[test]
    fn json_round_trip_drops_assoc_and_goal() {
        let sel = EditorSelection::create(
            vec![SelectionRange::cursor(1, -1, None, Some(7)), range(3, 8)],
            1,
        )
        .unwrap();
        let back = EditorSelection::from_json(&sel.to_json()).unwrap();
        assert_eq!(back.ranges().len(), 2);
        assert_eq!(back.main_index(), 1);
        assert_eq!(back.ranges()[0].goal_column(), None);
        assert_eq!((back.ranges()[1].anchor(), back.ranges()[1].head()), (3, 8));
    }
}
