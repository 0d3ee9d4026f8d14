//! Block-level vertical layout summary for the editor core.
//!
//! The height map tracks an estimated (or measured) height for every
//! visual block in the document and answers the two questions a viewport
//! needs: "what is at this vertical position?" and "where does this
//! document position sit vertically?". It reacts to document changes and
//! to the height-relevant subset of decorations; drawing and measuring
//! stay in the renderer.

mod decoration;
mod heightmap;
mod oracle;
mod scaler;

pub use decoration::{spans, DecoRange, Decoration, DecorationSet, SpanIterator};
pub use heightmap::{BlockInfo, BlockKind, ChangedRange, HeightMap, QueryType};
pub use oracle::{HeightOracle, MeasuredHeights};
pub use scaler::{Scaler, ViewportBandPublic, MAX_NATIVE_HEIGHT};
