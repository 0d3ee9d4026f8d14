//! Immutable, line-aware document text.
//!
//! The document is stored as a persistent balanced tree. Leaves hold a small
//! array of line strings; branch nodes hold up to 32 children whose lengths
//! sum to the parent's length (plus one per implicit line break between
//! siblings). Editing never mutates a node: `replace` rebuilds only the spine
//! from the root to the touched leaves and shares every other subtree with
//! the old document, so keeping many document versions alive is cheap.
//!
//! Positions are 0-based character offsets (Unicode scalar values), with line
//! breaks counting as a single character. Line numbers are 1-based.

mod error;
mod iter;
mod text;

pub use error::TextError;
pub use iter::{Chunk, LineIter, TextIter, TextIterRange};
pub use text::{Line, Text};
