use thiserror::Error;

/// Errors raised by text operations. All of them are domain (bounds) errors;
/// the document itself can never be in an invalid state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TextError {
    /// A position lies outside the document.
    #[error("position {pos} out of bounds (document length {len})")]
    Bounds { pos: usize, len: usize },
    /// A range was given with `from > to`.
    #[error("invalid range {from}..{to}")]
    InvalidRange { from: usize, to: usize },
    /// A 1-based line number lies outside the document.
    #[error("line {line} out of bounds (document has {lines} lines)")]
    LineBounds { line: usize, lines: usize },
    /// `Text::of` was handed a line containing a line break.
    #[error("document lines may not contain line breaks")]
    InlineBreak,
    /// `Text::of` was handed an empty list; a document has at least one line.
    #[error("a document must have at least one line")]
    NoLines,
}
