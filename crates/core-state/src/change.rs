//! Change descriptions and change sets.
//!
//! A change is encoded as a run of sections over the old document: either a
//! stretch of untouched characters or a replacement of `len` old characters
//! by `ins` new ones. `ChangeDesc` stores only the section geometry;
//! `ChangeSet` additionally carries the inserted text and can be applied to
//! a document. The algebra — composition, cross-mapping, inversion, position
//! mapping — is what undo, concurrent-edit tolerance, and every kind of
//! position bookkeeping in the editor are built on.

use core_text::Text;
use serde_json::Value;

use crate::error::StateError;

/// One section: `len` old characters that are either kept (`ins == -1`) or
/// replaced by `ins >= 0` new characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Section {
    pub(crate) len: usize,
    pub(crate) ins: i64,
}

/// How a deleted-over position should be reported by `map_pos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapMode {
    /// Map to a valid new position, even when deleted over.
    #[default]
    Simple,
    /// Return `None` for positions strictly inside a deletion.
    TrackDel,
    /// Return `None` when the character before the position is deleted.
    TrackBefore,
    /// Return `None` when the character after the position is deleted.
    TrackAfter,
}

/// Result of asking whether a change touches a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Touched {
    No,
    Yes,
    /// The range is entirely covered by a single replacement.
    Cover,
}

fn add_section(sections: &mut Vec<Section>, len: usize, ins: i64, force_join: bool) {
    if len == 0 && ins <= 0 {
        return;
    }
    let Some(last) = sections.last_mut() else {
        sections.push(Section { len, ins });
        return;
    };
    if ins <= 0 && ins == last.ins {
        last.len += len;
    } else if len == 0 && last.len == 0 {
        last.ins += ins;
    } else if force_join {
        // Both pieces belong to the same logical replacement, subdivided by
        // a walk over two section streams.
        last.len += len;
        last.ins += ins;
    } else {
        sections.push(Section { len, ins });
    }
}

fn add_insert(values: &mut Vec<Text>, section_index: usize, value: &Text) {
    if value.len() == 0 {
        return;
    }
    if section_index < values.len() {
        let last = values.len() - 1;
        values[last] = values[last].append(value);
    } else {
        while values.len() < section_index {
            values.push(Text::empty());
        }
        values.push(value.clone());
    }
}

/// Cursor over a section list, able to step through sections piecewise.
/// `len` tracks the remaining old-side extent, `ins` the remaining
/// replacement extent (`-1` kept, `-2` exhausted), `off` how far into the
/// current section the cursor has moved.
struct SectionIter<'a> {
    sections: &'a [Section],
    inserted: &'a [Text],
    i: usize,
    len: usize,
    ins: i64,
    off: usize,
}

impl<'a> SectionIter<'a> {
    fn new(sections: &'a [Section], inserted: &'a [Text]) -> Self {
        let mut iter = SectionIter { sections, inserted, i: 0, len: 0, ins: -2, off: 0 };
        iter.next_section();
        iter
    }

    fn next_section(&mut self) {
        if let Some(section) = self.sections.get(self.i) {
            self.i += 1;
            self.len = section.len;
            self.ins = section.ins;
        } else {
            self.len = 0;
            self.ins = -2;
        }
        self.off = 0;
    }

    fn done(&self) -> bool {
        self.ins == -2
    }

    /// Remaining new-side extent of the current section.
    fn len2(&self) -> usize {
        if self.ins < 0 { self.len } else { self.ins as usize }
    }

    fn text(&self) -> Text {
        self.inserted.get(self.i - 1).cloned().unwrap_or_else(Text::empty)
    }

    fn text_bit(&self, len: usize) -> Text {
        let text = self.text();
        text.slice(self.off, self.off + len)
            .expect("piecewise walk stays inside the inserted text")
    }

    /// Move `len` characters along the old side of the current section.
    fn forward(&mut self, len: usize) {
        if len == self.len {
            self.next_section();
        } else {
            self.len -= len;
            self.off += len;
        }
    }

    /// Move `len` characters along the new side of the current section.
    fn forward2(&mut self, len: usize) {
        if self.ins == -1 {
            self.forward(len);
        } else if len as i64 == self.ins {
            self.next_section();
        } else {
            self.ins -= len as i64;
            self.off += len;
        }
    }
}

fn mismatched() -> StateError {
    StateError::Bounds("mismatched change set lengths".into())
}

/// Compose `a` then `b` into a single section list. Walks both streams,
/// subdividing at the finer boundary; `a`'s insertions participate in `b`'s
/// deletions where they overlap.
fn compose_sections(
    a_sections: &[Section],
    a_inserted: &[Text],
    b_sections: &[Section],
    b_inserted: &[Text],
    with_text: bool,
) -> Result<(Vec<Section>, Vec<Text>), StateError> {
    let mut sections: Vec<Section> = Vec::new();
    let mut inserted: Vec<Text> = Vec::new();
    let mut a = SectionIter::new(a_sections, a_inserted);
    let mut b = SectionIter::new(b_sections, b_inserted);
    let mut open = false;
    loop {
        if a.done() && b.done() {
            return Ok((sections, inserted));
        } else if a.ins == 0 {
            // A deletion in `a` is invisible to `b`.
            add_section(&mut sections, a.len, 0, open);
            let len = a.len;
            a.forward(len);
        } else if b.len == 0 && !b.done() {
            // An insertion in `b` lands between `a`'s output characters.
            add_section(&mut sections, 0, b.ins, open);
            if with_text && b.ins > 0 {
                add_insert(&mut inserted, sections.len() - 1, &b.text());
            }
            b.next_section();
        } else if a.done() || b.done() {
            return Err(mismatched());
        } else {
            let len = a.len2().min(b.len);
            if a.ins == -1 {
                let ins_b = if b.ins == -1 {
                    -1
                } else if b.off > 0 {
                    0
                } else {
                    b.ins
                };
                add_section(&mut sections, len, ins_b, open);
                if with_text && ins_b > 0 {
                    add_insert(&mut inserted, sections.len() - 1, &b.text());
                }
            } else if b.ins == -1 {
                add_section(
                    &mut sections,
                    if a.off > 0 { 0 } else { a.len },
                    len as i64,
                    open,
                );
                if with_text {
                    add_insert(&mut inserted, sections.len() - 1, &a.text_bit(len));
                }
            } else {
                add_section(
                    &mut sections,
                    if a.off > 0 { 0 } else { a.len },
                    if b.off > 0 { 0 } else { b.ins },
                    open,
                );
                if with_text && b.off == 0 && b.ins > 0 {
                    add_insert(&mut inserted, sections.len() - 1, &b.text());
                }
            }
            open = a.ins > len as i64 || (b.ins >= 0 && b.len > len);
            a.forward2(len);
            b.forward(len);
        }
    }
}

/// Map `a` over `b` (both starting from the same document), producing `a'`
/// such that `a'` applies to `b`'s output document. `before` biases how
/// insertions at identical positions interleave.
fn map_sections(
    a_sections: &[Section],
    a_inserted: &[Text],
    b_sections: &[Section],
    before: bool,
    with_text: bool,
) -> Result<(Vec<Section>, Vec<Text>), StateError> {
    let mut sections: Vec<Section> = Vec::new();
    let mut inserted: Vec<Text> = Vec::new();
    let mut a = SectionIter::new(a_sections, a_inserted);
    let mut b = SectionIter::new(b_sections, &[]);
    // Marks the section of `a` whose insertion has already been emitted,
    // for changes that get subdivided by `b`.
    let mut emitted: i64 = -1;
    loop {
        if (a.done() && b.len > 0) || (b.done() && a.len > 0) {
            return Err(mismatched());
        }
        if a.done() && b.done() {
            return Ok((sections, inserted));
        }
        if a.ins == -1 && b.ins == -1 {
            let len = a.len.min(b.len);
            add_section(&mut sections, len, -1, false);
            a.forward(len);
            b.forward(len);
        } else if b.ins >= 0
            && (a.ins < 0
                || emitted == a.i as i64
                || (a.off == 0 && (b.len < a.len || (b.len == a.len && !before))))
        {
            // `b`'s change wins this stretch: its insertion becomes kept
            // text, and `a` sections inside its deleted range turn into
            // bare insertions.
            let mut len = b.len;
            add_section(&mut sections, b.ins as usize, -1, false);
            while len > 0 {
                if a.done() {
                    return Err(mismatched());
                }
                let piece = a.len.min(len);
                if a.ins >= 0 && emitted < a.i as i64 && a.len <= piece {
                    add_section(&mut sections, 0, a.ins, false);
                    if with_text && a.ins > 0 {
                        add_insert(&mut inserted, sections.len() - 1, &a.text());
                    }
                    emitted = a.i as i64;
                }
                a.forward(piece);
                len -= piece;
            }
            b.next_section();
        } else if a.ins >= 0 {
            // `a`'s change survives; its old-side extent shrinks by whatever
            // `b` deleted underneath it.
            let mut len = 0usize;
            let mut left = a.len;
            while left > 0 {
                if b.ins == -1 {
                    let piece = left.min(b.len);
                    len += piece;
                    left -= piece;
                    b.forward(piece);
                } else if b.ins == 0 && b.len < left {
                    left -= b.len;
                    b.next_section();
                } else {
                    break;
                }
            }
            let ins = if emitted < a.i as i64 { a.ins } else { 0 };
            add_section(&mut sections, len, ins, false);
            if with_text && ins > 0 {
                add_insert(&mut inserted, sections.len() - 1, &a.text());
            }
            emitted = a.i as i64;
            let consumed = a.len - left;
            a.forward(consumed);
        } else {
            return Err(mismatched());
        }
    }
}

fn sections_len(sections: &[Section]) -> usize {
    sections.iter().map(|s| s.len).sum()
}

fn sections_new_len(sections: &[Section]) -> usize {
    sections
        .iter()
        .map(|s| if s.ins < 0 { s.len } else { s.ins as usize })
        .sum()
}

fn map_pos_in(
    sections: &[Section],
    pos: usize,
    assoc: i32,
    mode: MapMode,
) -> Result<Option<usize>, StateError> {
    let mut pos_a = 0usize;
    let mut pos_b = 0usize;
    for section in sections {
        let end_a = pos_a + section.len;
        if section.ins < 0 {
            if end_a > pos {
                return Ok(Some(pos_b + (pos - pos_a)));
            }
            pos_b += section.len;
        } else {
            let ins = section.ins as usize;
            if mode != MapMode::Simple
                && end_a >= pos
                && ((mode == MapMode::TrackDel && pos_a < pos && end_a > pos)
                    || (mode == MapMode::TrackBefore && pos_a < pos)
                    || (mode == MapMode::TrackAfter && end_a > pos))
            {
                return Ok(None);
            }
            if end_a > pos || (end_a == pos && assoc < 0 && section.len == 0) {
                return Ok(Some(if pos == pos_a || assoc < 0 { pos_b } else { pos_b + ins }));
            }
            pos_b += ins;
        }
        pos_a = end_a;
    }
    if pos > pos_a {
        return Err(StateError::Bounds(format!(
            "position {pos} is out of range for change of length {pos_a}"
        )));
    }
    Ok(Some(pos_b))
}

fn touches_in(sections: &[Section], from: usize, to: usize) -> Touched {
    let mut pos = 0usize;
    for section in sections {
        if pos > to {
            break;
        }
        let end = pos + section.len;
        if section.ins >= 0 && pos <= to && end >= from {
            return if pos < from && end > to { Touched::Cover } else { Touched::Yes };
        }
        pos = end;
    }
    Touched::No
}

fn iter_changes_in(
    sections: &[Section],
    inserted: &[Text],
    individual: bool,
    f: &mut dyn FnMut(usize, usize, usize, usize, &Text),
) {
    let mut pos_a = 0usize;
    let mut pos_b = 0usize;
    let mut i = 0usize;
    while i < sections.len() {
        let mut len = sections[i].len;
        let mut ins = sections[i].ins;
        i += 1;
        if ins < 0 {
            pos_a += len;
            pos_b += len;
        } else {
            let (from_a, from_b) = (pos_a, pos_b);
            let mut text = Text::empty();
            loop {
                pos_a += len;
                pos_b += ins as usize;
                if ins > 0 {
                    if let Some(t) = inserted.get(i - 1) {
                        text = text.append(t);
                    }
                }
                if individual || i == sections.len() || sections[i].ins < 0 {
                    break;
                }
                len = sections[i].len;
                ins = sections[i].ins;
                i += 1;
            }
            f(from_a, pos_a, from_b, pos_b, &text);
        }
    }
}

fn iter_gaps_in(sections: &[Section], f: &mut dyn FnMut(usize, usize, usize)) {
    let mut pos_a = 0usize;
    let mut pos_b = 0usize;
    for section in sections {
        if section.ins < 0 {
            f(pos_a, pos_b, section.len);
            pos_b += section.len;
        } else {
            pos_b += section.ins as usize;
        }
        pos_a += section.len;
    }
}

fn sections_to_json(sections: &[Section], inserted: Option<&[Text]>) -> Value {
    let mut parts = Vec::new();
    for (i, section) in sections.iter().enumerate() {
        if section.ins < 0 {
            parts.push(Value::from(section.len as u64));
        } else {
            let mut entry = vec![Value::from(section.len as u64)];
            if section.ins > 0 {
                match inserted {
                    Some(texts) => {
                        let text = texts.get(i).cloned().unwrap_or_else(Text::empty);
                        entry.extend(text.to_lines().into_iter().map(Value::from));
                    }
                    None => entry.push(Value::from(section.ins as u64)),
                }
            }
            parts.push(Value::Array(entry));
        }
    }
    Value::Array(parts)
}

/// A change description: section geometry without the inserted text. Enough
/// to map positions and other changes, too little to apply to a document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChangeDesc {
    pub(crate) sections: Vec<Section>,
}

impl ChangeDesc {
    /// Length of the document this change applies to.
    pub fn len(&self) -> usize {
        sections_len(&self.sections)
    }

    /// Length of the document produced by this change.
    pub fn new_len(&self) -> usize {
        sections_new_len(&self.sections)
    }

    /// True when the change doesn't modify anything.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() || (self.sections.len() == 1 && self.sections[0].ins < 0)
    }

    /// Iterate the untouched stretches between changes, as
    /// `(pos_a, pos_b, length)`.
    pub fn iter_gaps(&self, mut f: impl FnMut(usize, usize, usize)) {
        iter_gaps_in(&self.sections, &mut f);
    }

    /// Iterate changed ranges as `(from_a, to_a, from_b, to_b)`. Adjacent
    /// replacements are merged unless `individual` is set.
    pub fn iter_changed_ranges(&self, individual: bool, mut f: impl FnMut(usize, usize, usize, usize)) {
        iter_changes_in(&self.sections, &[], individual, &mut |fa, ta, fb, tb, _| {
            f(fa, ta, fb, tb)
        });
    }

    /// Compose with another description, producing the description of
    /// "apply `self`, then `other`".
    pub fn compose_desc(&self, other: &ChangeDesc) -> Result<ChangeDesc, StateError> {
        if self.is_empty() {
            return Ok(other.clone());
        }
        if other.is_empty() {
            return Ok(self.clone());
        }
        if self.new_len() != other.len() {
            return Err(mismatched());
        }
        let (sections, _) =
            compose_sections(&self.sections, &[], &other.sections, &[], false)?;
        Ok(ChangeDesc { sections })
    }

    /// Map this description over `other` (both starting from the same
    /// document). With `before`, this change's insertions at shared
    /// positions land before `other`'s.
    pub fn map_desc(&self, other: &ChangeDesc, before: bool) -> Result<ChangeDesc, StateError> {
        if other.is_empty() {
            return Ok(self.clone());
        }
        let (sections, _) =
            map_sections(&self.sections, &[], &other.sections, before, false)?;
        Ok(ChangeDesc { sections })
    }

    /// The description that undoes this one (geometry only).
    pub fn inverted_desc(&self) -> ChangeDesc {
        let sections = self
            .sections
            .iter()
            .map(|s| {
                if s.ins < 0 {
                    *s
                } else {
                    Section { len: s.ins as usize, ins: s.len as i64 }
                }
            })
            .collect();
        ChangeDesc { sections }
    }

    /// Map a position through the change. `assoc < 0` associates the
    /// position with the character before it, `> 0` with the one after.
    pub fn map_pos(&self, pos: usize, assoc: i32) -> Result<usize, StateError> {
        match map_pos_in(&self.sections, pos, assoc, MapMode::Simple)? {
            Some(mapped) => Ok(mapped),
            None => unreachable!("simple mapping always yields a position"),
        }
    }

    /// Map a position with a deletion-tracking mode.
    pub fn map_pos_mode(
        &self,
        pos: usize,
        assoc: i32,
        mode: MapMode,
    ) -> Result<Option<usize>, StateError> {
        map_pos_in(&self.sections, pos, assoc, mode)
    }

    /// Whether the change touches (or entirely covers) the given range.
    pub fn touches_range(&self, from: usize, to: usize) -> Touched {
        touches_in(&self.sections, from, to)
    }

    pub fn to_json(&self) -> Value {
        sections_to_json(&self.sections, None)
    }

    pub fn from_json(json: &Value) -> Result<ChangeDesc, StateError> {
        let parts = json
            .as_array()
            .ok_or_else(|| StateError::SchemaViolation("invalid change description".into()))?;
        let mut sections = Vec::new();
        for part in parts {
            match part {
                Value::Number(n) => {
                    let len = n
                        .as_u64()
                        .ok_or_else(|| StateError::SchemaViolation("negative section".into()))?;
                    add_section(&mut sections, len as usize, -1, false);
                }
                Value::Array(entry) => {
                    let len = entry
                        .first()
                        .and_then(Value::as_u64)
                        .ok_or_else(|| StateError::SchemaViolation("invalid section".into()))?;
                    let ins = entry.get(1).and_then(Value::as_u64).unwrap_or(0);
                    add_section(&mut sections, len as usize, ins as i64, false);
                }
                _ => return Err(StateError::SchemaViolation("invalid section".into())),
            }
        }
        Ok(ChangeDesc { sections })
    }
}

/// A change set: a change description plus the inserted text, invertible and
/// applicable to a document of the right length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChangeSet {
    pub(crate) sections: Vec<Section>,
    pub(crate) inserted: Vec<Text>,
}

/// User-facing description of an edit, normalised by [`ChangeSet::of`].
#[derive(Debug, Clone)]
pub enum ChangeSpec {
    /// Replace `from..to` by the given text.
    Range { from: usize, to: usize, insert: Text },
    /// An already-normalised change set (must match the document length).
    Set(ChangeSet),
    /// Several changes, all addressed in the same original document.
    Group(Vec<ChangeSpec>),
}

impl ChangeSpec {
    pub fn insert(from: usize, text: impl Into<Text>) -> ChangeSpec {
        ChangeSpec::Range { from, to: from, insert: text.into() }
    }

    pub fn delete(from: usize, to: usize) -> ChangeSpec {
        ChangeSpec::Range { from, to, insert: Text::empty() }
    }

    pub fn replace(from: usize, to: usize, text: impl Into<Text>) -> ChangeSpec {
        ChangeSpec::Range { from, to, insert: text.into() }
    }
}

impl From<Vec<ChangeSpec>> for ChangeSpec {
    fn from(specs: Vec<ChangeSpec>) -> ChangeSpec {
        ChangeSpec::Group(specs)
    }
}

impl From<ChangeSet> for ChangeSpec {
    fn from(set: ChangeSet) -> ChangeSpec {
        ChangeSpec::Set(set)
    }
}

impl ChangeSet {
    /// The change set that leaves a document of the given length alone.
    pub fn empty(len: usize) -> ChangeSet {
        ChangeSet {
            sections: if len > 0 { vec![Section { len, ins: -1 }] } else { Vec::new() },
            inserted: Vec::new(),
        }
    }

    /// Normalise a change spec against a document of length `length`.
    /// Overlapping or out-of-order ranges are combined by sequential
    /// composition; sections come out sorted, non-overlapping, and coalesced.
    pub fn of(spec: &ChangeSpec, length: usize) -> Result<ChangeSet, StateError> {
        let mut sections: Vec<Section> = Vec::new();
        let mut inserted: Vec<Text> = Vec::new();
        let mut pos = 0usize;
        let mut total: Option<ChangeSet> = None;

        fn flush(
            sections: &mut Vec<Section>,
            inserted: &mut Vec<Text>,
            pos: &mut usize,
            total: &mut Option<ChangeSet>,
            length: usize,
            force: bool,
        ) -> Result<(), StateError> {
            if !force && sections.is_empty() {
                return Ok(());
            }
            if *pos < length {
                add_section(sections, length - *pos, -1, false);
            }
            let set = ChangeSet {
                sections: std::mem::take(sections),
                inserted: std::mem::take(inserted),
            };
            *total = Some(match total.take() {
                None => set,
                Some(prev) => prev.compose(&set.map(&prev.desc(), false)?)?,
            });
            *pos = 0;
            Ok(())
        }

        fn process(
            spec: &ChangeSpec,
            sections: &mut Vec<Section>,
            inserted: &mut Vec<Text>,
            pos: &mut usize,
            total: &mut Option<ChangeSet>,
            length: usize,
        ) -> Result<(), StateError> {
            match spec {
                ChangeSpec::Group(specs) => {
                    for sub in specs {
                        process(sub, sections, inserted, pos, total, length)?;
                    }
                }
                ChangeSpec::Set(set) => {
                    if set.len() != length {
                        return Err(mismatched());
                    }
                    flush(sections, inserted, pos, total, length, false)?;
                    *total = Some(match total.take() {
                        None => set.clone(),
                        Some(prev) => {
                            let mapped = set.map(&prev.desc(), false)?;
                            prev.compose(&mapped)?
                        }
                    });
                }
                ChangeSpec::Range { from, to, insert } => {
                    let (from, to) = (*from, *to);
                    if from > to || to > length {
                        return Err(StateError::Bounds(format!(
                            "invalid change range {from} to {to} (in document of length {length})"
                        )));
                    }
                    let ins_len = insert.len();
                    if from == to && ins_len == 0 {
                        return Ok(());
                    }
                    if from < *pos {
                        flush(sections, inserted, pos, total, length, false)?;
                    }
                    if from > *pos {
                        add_section(sections, from - *pos, -1, false);
                    }
                    add_section(sections, to - from, ins_len as i64, false);
                    add_insert(inserted, sections.len() - 1, insert);
                    *pos = to;
                }
            }
            Ok(())
        }

        process(spec, &mut sections, &mut inserted, &mut pos, &mut total, length)?;
        let force = total.is_none();
        flush(&mut sections, &mut inserted, &mut pos, &mut total, length, force)?;
        match total {
            Some(set) => Ok(set),
            None => unreachable!("flush(force) always produces a set"),
        }
    }

    /// The geometry of this change, without the inserted text.
    pub fn desc(&self) -> ChangeDesc {
        ChangeDesc { sections: self.sections.clone() }
    }

    pub fn len(&self) -> usize {
        sections_len(&self.sections)
    }

    pub fn new_len(&self) -> usize {
        sections_new_len(&self.sections)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty() || (self.sections.len() == 1 && self.sections[0].ins < 0)
    }

    /// Apply to a document of matching length.
    pub fn apply(&self, doc: &Text) -> Result<Text, StateError> {
        if self.len() != doc.len() {
            return Err(StateError::Bounds(format!(
                "applying change set of length {} to document of length {}",
                self.len(),
                doc.len()
            )));
        }
        let mut result = doc.clone();
        let mut error = None;
        iter_changes_in(&self.sections, &self.inserted, false, &mut |from_a, to_a, from_b, _to_b, text| {
            if error.is_some() {
                return;
            }
            match result.replace(from_b, from_b + (to_a - from_a), text) {
                Ok(next) => result = next,
                Err(err) => error = Some(err),
            }
        });
        match error {
            Some(err) => Err(err.into()),
            None => Ok(result),
        }
    }

    /// Iterate individual changes as `(from_a, to_a, from_b, to_b, inserted)`.
    pub fn iter_changes(&self, individual: bool, mut f: impl FnMut(usize, usize, usize, usize, &Text)) {
        iter_changes_in(&self.sections, &self.inserted, individual, &mut f);
    }

    pub fn iter_gaps(&self, mut f: impl FnMut(usize, usize, usize)) {
        iter_gaps_in(&self.sections, &mut f);
    }

    pub fn iter_changed_ranges(&self, individual: bool, mut f: impl FnMut(usize, usize, usize, usize)) {
        iter_changes_in(&self.sections, &self.inserted, individual, &mut |fa, ta, fb, tb, _| {
            f(fa, ta, fb, tb)
        });
    }

    /// The change set that undoes this one. `doc` must be the document this
    /// set was applied to (it supplies the deleted text).
    pub fn invert(&self, doc: &Text) -> Result<ChangeSet, StateError> {
        if self.len() != doc.len() {
            return Err(mismatched());
        }
        let mut sections = self.sections.clone();
        let mut inserted: Vec<Text> = Vec::new();
        let mut pos = 0usize;
        for (i, section) in self.sections.iter().enumerate() {
            if section.ins >= 0 {
                sections[i] = Section { len: section.ins as usize, ins: section.len as i64 };
                while inserted.len() < i {
                    inserted.push(Text::empty());
                }
                inserted.push(if section.len > 0 {
                    doc.slice(pos, pos + section.len)?
                } else {
                    Text::empty()
                });
            }
            pos += section.len;
        }
        Ok(ChangeSet { sections, inserted })
    }

    /// Compose with a change set that applies to this set's output document.
    pub fn compose(&self, other: &ChangeSet) -> Result<ChangeSet, StateError> {
        if self.is_empty() {
            return Ok(other.clone());
        }
        if other.is_empty() {
            return Ok(self.clone());
        }
        if self.new_len() != other.len() {
            return Err(mismatched());
        }
        let (sections, inserted) = compose_sections(
            &self.sections,
            &self.inserted,
            &other.sections,
            &other.inserted,
            true,
        )?;
        Ok(ChangeSet { sections, inserted })
    }

    /// Map over another change (both starting from the same document), so
    /// that `self.map(other)` applies to the document `other` produced.
    pub fn map(&self, other: &ChangeDesc, before: bool) -> Result<ChangeSet, StateError> {
        if other.is_empty() {
            return Ok(self.clone());
        }
        let (sections, inserted) =
            map_sections(&self.sections, &self.inserted, &other.sections, before, true)?;
        Ok(ChangeSet { sections, inserted })
    }

    pub fn map_pos(&self, pos: usize, assoc: i32) -> Result<usize, StateError> {
        match map_pos_in(&self.sections, pos, assoc, MapMode::Simple)? {
            Some(mapped) => Ok(mapped),
            None => unreachable!("simple mapping always yields a position"),
        }
    }

    pub fn map_pos_mode(
        &self,
        pos: usize,
        assoc: i32,
        mode: MapMode,
    ) -> Result<Option<usize>, StateError> {
        map_pos_in(&self.sections, pos, assoc, mode)
    }

    pub fn touches_range(&self, from: usize, to: usize) -> Touched {
        touches_in(&self.sections, from, to)
    }

    /// Split this set by a mask of allowed ranges (`[from, to, from, to …]`,
    /// sorted). Returns the changes inside the mask and, as a description,
    /// the suppressed remainder.
    pub fn filter(&self, ranges: &[usize]) -> (ChangeSet, ChangeDesc) {
        let mut result_sections: Vec<Section> = Vec::new();
        let mut result_inserted: Vec<Text> = Vec::new();
        let mut filtered_sections: Vec<Section> = Vec::new();
        let mut iter = SectionIter::new(&self.sections, &self.inserted);
        let mut i = 0usize;
        let mut pos = 0usize;
        'done: loop {
            let next = if i < ranges.len() {
                let v = ranges[i];
                i += 1;
                v
            } else {
                usize::MAX / 2
            };
            while pos < next || (pos == next && iter.len == 0) {
                if iter.done() {
                    break 'done;
                }
                // Outside the mask: the change is suppressed.
                let len = iter.len.min(next - pos);
                add_section(&mut result_sections, len, -1, false);
                let ins =
                    if iter.ins == -1 { -1 } else if iter.off > 0 { 0 } else { iter.ins };
                add_section(&mut filtered_sections, len, ins, false);
                iter.forward(len);
                pos += len;
            }
            let end = if i < ranges.len() {
                let v = ranges[i];
                i += 1;
                v
            } else {
                usize::MAX / 2
            };
            while pos < end || (pos == end && iter.len == 0) {
                if iter.done() {
                    break 'done;
                }
                // Inside the mask: the change is kept.
                let len = iter.len.min(end - pos);
                let ins =
                    if iter.ins == -1 { -1 } else if iter.off > 0 { 0 } else { iter.ins };
                add_section(&mut result_sections, len, ins, false);
                if ins > 0 {
                    add_insert(&mut result_inserted, result_sections.len() - 1, &iter.text());
                }
                add_section(&mut filtered_sections, len, -1, false);
                iter.forward(len);
                pos += len;
            }
        }
        (
            ChangeSet { sections: result_sections, inserted: result_inserted },
            ChangeDesc { sections: filtered_sections },
        )
    }

    pub fn to_json(&self) -> Value {
        sections_to_json(&self.sections, Some(&self.inserted))
    }

    pub fn from_json(json: &Value) -> Result<ChangeSet, StateError> {
        let parts = json
            .as_array()
            .ok_or_else(|| StateError::SchemaViolation("invalid change set".into()))?;
        let mut sections = Vec::new();
        let mut inserted = Vec::new();
        for part in parts {
            match part {
                Value::Number(n) => {
                    let len = n
                        .as_u64()
                        .ok_or_else(|| StateError::SchemaViolation("negative section".into()))?;
                    add_section(&mut sections, len as usize, -1, false);
                }
                Value::Array(entry) => {
                    let len = entry
                        .first()
                        .and_then(Value::as_u64)
                        .ok_or_else(|| StateError::SchemaViolation("invalid section".into()))?
                        as usize;
                    if entry.len() == 1 {
                        add_section(&mut sections, len, 0, false);
                    } else {
                        let mut lines = Vec::with_capacity(entry.len() - 1);
                        for line in &entry[1..] {
                            lines.push(
                                line.as_str()
                                    .ok_or_else(|| {
                                        StateError::SchemaViolation("invalid inserted line".into())
                                    })?
                                    .to_string(),
                            );
                        }
                        let text = Text::of(lines)
                            .map_err(|err| StateError::SchemaViolation(err.to_string()))?;
                        add_section(&mut sections, len, text.len() as i64, false);
                        add_insert(&mut inserted, sections.len() - 1, &text);
                    }
                }
                _ => return Err(StateError::SchemaViolation("invalid section".into())),
            }
        }
        Ok(ChangeSet { sections, inserted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(s: &str) -> Text {
        Text::from(s)
    }

    fn mk(spec: ChangeSpec, len: usize) -> ChangeSet {
        ChangeSet::of(&spec, len).unwrap()
    }

    #[test]
    fn of_normalises_and_applies() {
        let d = doc("hello");
        let set = mk(
            ChangeSpec::Group(vec![
                ChangeSpec::replace(2, 4, doc("w")),
                ChangeSpec::insert(5, doc("!")),
            ]),
            5,
        );
        assert_eq!(set.len(), 5);
        assert_eq!(set.new_len(), 5);
        assert_eq!(set.apply(&d).unwrap().to_string(), "hewo!");
    }

    #[test]
    fn of_handles_out_of_order_ranges() {
        let d = doc("abcdef");
        let set = mk(
            ChangeSpec::Group(vec![ChangeSpec::delete(4, 5), ChangeSpec::delete(0, 1)]),
            6,
        );
        assert_eq!(set.apply(&d).unwrap().to_string(), "bcdf");
    }

    #[test]
    fn apply_length_property() {
        let d = doc("one\ntwo\nthree");
        let set = mk(ChangeSpec::replace(4, 7, doc("2")), d.len());
        let applied = set.apply(&d).unwrap();
        assert_eq!(applied.len(), set.new_len());
        assert_eq!(applied.to_string(), "one\n2\nthree");
    }

    #[test]
    fn invert_round_trip() {
        let d = doc("one\ntwo\nthree");
        for spec in [
            ChangeSpec::replace(0, 3, doc("ONE")),
            ChangeSpec::delete(3, 8),
            ChangeSpec::insert(13, doc("\nfour")),
            ChangeSpec::Group(vec![
                ChangeSpec::replace(1, 2, doc("xx")),
                ChangeSpec::delete(9, 12),
            ]),
        ] {
            let set = mk(spec, d.len());
            let applied = set.apply(&d).unwrap();
            let inverted = set.invert(&d).unwrap();
            assert_eq!(inverted.apply(&applied).unwrap(), d);
        }
    }

    #[test]
    fn compose_matches_sequential_application() {
        let d = doc("abcdef");
        let a = mk(ChangeSpec::replace(1, 3, doc("XY")), 6);
        let b = mk(ChangeSpec::delete(0, 2), a.new_len());
        let composed = a.compose(&b).unwrap();
        assert_eq!(
            composed.apply(&d).unwrap(),
            b.apply(&a.apply(&d).unwrap()).unwrap()
        );
    }

    #[test]
    fn compose_is_associative() {
        let d = doc("abcdefgh");
        let a = mk(ChangeSpec::replace(2, 4, doc("12")), 8);
        let b = mk(ChangeSpec::insert(0, doc("->")), a.new_len());
        let c = mk(ChangeSpec::delete(5, 9), b.new_len());
        let left = a.compose(&b).unwrap().compose(&c).unwrap();
        let right = a.compose(&b.compose(&c).unwrap()).unwrap();
        assert_eq!(left, right);
        assert_eq!(left.apply(&d).unwrap(), right.apply(&d).unwrap());
    }

    #[test]
    fn map_confluence_diamond() {
        // a.map(b).compose(b) and b.map(a, true).compose(a) must converge.
        let d = doc("one two three");
        let a = mk(ChangeSpec::replace(0, 3, doc("1")), d.len());
        let b = mk(ChangeSpec::replace(8, 13, doc("3")), d.len());
        let left = b.compose(&a.map(&b.desc(), false).unwrap()).unwrap();
        let right = a.compose(&b.map(&a.desc(), true).unwrap()).unwrap();
        assert_eq!(left.apply(&d).unwrap(), right.apply(&d).unwrap());
        assert_eq!(left.apply(&d).unwrap().to_string(), "1 two 3");
    }

    #[test]
    fn map_insertion_order_bias() {
        let d = doc("ab");
        let a = mk(ChangeSpec::insert(1, doc("A")), 2);
        let b = mk(ChangeSpec::insert(1, doc("B")), 2);
        // Without `before`, a's insertion maps after b's.
        let after = b.compose(&a.map(&b.desc(), false).unwrap()).unwrap();
        assert_eq!(after.apply(&d).unwrap().to_string(), "aBAb");
        let before = b.compose(&a.map(&b.desc(), true).unwrap()).unwrap();
        assert_eq!(before.apply(&d).unwrap().to_string(), "aABb");
    }

    #[test]
    fn map_pos_assoc_at_replacement() {
        let set = mk(ChangeSpec::replace(2, 4, doc("xyz")), 6);
        assert_eq!(set.map_pos(2, -1).unwrap(), 2);
        assert_eq!(set.map_pos(2, 1).unwrap(), 2);
        assert_eq!(set.map_pos(3, -1).unwrap(), 2);
        assert_eq!(set.map_pos(3, 1).unwrap(), 5);
        assert_eq!(set.map_pos(4, -1).unwrap(), 2);
        assert_eq!(set.map_pos(4, 1).unwrap(), 5);
        assert_eq!(set.map_pos(6, 1).unwrap(), 7);
    }

    #[test]
    fn map_pos_tracking_modes() {
        let del = mk(ChangeSpec::delete(2, 5), 8);
        assert_eq!(del.map_pos_mode(3, -1, MapMode::TrackDel).unwrap(), None);
        assert_eq!(del.map_pos_mode(2, -1, MapMode::TrackDel).unwrap(), Some(2));
        assert_eq!(del.map_pos_mode(5, -1, MapMode::TrackDel).unwrap(), Some(2));
        assert_eq!(del.map_pos_mode(5, -1, MapMode::TrackBefore).unwrap(), None);
        assert_eq!(del.map_pos_mode(2, -1, MapMode::TrackBefore).unwrap(), Some(2));
        assert_eq!(del.map_pos_mode(2, 1, MapMode::TrackAfter).unwrap(), None);
        assert_eq!(del.map_pos_mode(5, 1, MapMode::TrackAfter).unwrap(), Some(2));
    }

    #[test]
    fn map_pos_out_of_range_is_bounds_error() {
        let set = ChangeSet::empty(4);
        assert!(matches!(set.map_pos(9, 1), Err(StateError::Bounds(_))));
    }

    #[test]
    fn touches_range_reports_cover() {
        let set = mk(ChangeSpec::replace(2, 8, doc("x")), 10);
        assert_eq!(set.touches_range(3, 4), Touched::Cover);
        assert_eq!(set.touches_range(1, 3), Touched::Yes);
        assert_eq!(set.touches_range(9, 10), Touched::No);
    }

    #[test]
    fn filter_keeps_changes_inside_ranges() {
        let d = doc("onetwo");
        let set = mk(ChangeSpec::delete(0, 6), 6);
        let (kept, suppressed) = set.filter(&[0, 2, 4, 6]);
        // Only the deletions inside [0,2) and [4,6) survive.
        assert_eq!(kept.apply(&d).unwrap().to_string(), "et");
        assert_eq!(kept.new_len(), 2);
        // The suppressed remainder still applies to the original document.
        assert_eq!(suppressed.len(), 6);
        assert_eq!(suppressed.new_len(), 4);
    }

    #[test]
    fn iter_changes_reports_coordinates() {
        let set = mk(
            ChangeSpec::Group(vec![
                ChangeSpec::replace(1, 2, doc("XY")),
                ChangeSpec::delete(4, 5),
            ]),
            6,
        );
        let mut seen = Vec::new();
        set.iter_changes(false, |fa, ta, fb, tb, text| {
            seen.push((fa, ta, fb, tb, text.to_string()));
        });
        assert_eq!(seen, vec![(1, 2, 1, 3, "XY".to_string()), (4, 5, 5, 5, String::new())]);
    }

    #[test]
    fn empty_set_is_identity() {
        let d = doc("abc");
        let set = ChangeSet::empty(3);
        assert!(set.is_empty());
        assert_eq!(set.apply(&d).unwrap(), d);
        assert_eq!(set.map_pos(2, 1).unwrap(), 2);
    }

    #[test]
    fn json_round_trip() {
        let set = mk(
            ChangeSpec::Group(vec![
                ChangeSpec::replace(1, 3, doc("a\nb")),
                ChangeSpec::delete(4, 5),
            ]),
            6,
        );
        let json = set.to_json();
        let back = ChangeSet::from_json(&json).unwrap();
        assert_eq!(set, back);
        let desc_json = set.desc().to_json();
        let desc = ChangeDesc::from_json(&desc_json).unwrap();
        assert_eq!(desc, set.desc());
    }

    #[test]
    fn inverted_desc_swaps_extents() {
        let set = mk(ChangeSpec::replace(2, 4, doc("xyz")), 6);
        let inv = set.desc().inverted_desc();
        assert_eq!(inv.len(), set.new_len());
        assert_eq!(inv.new_len(), set.len());
    }
}
