//! Incremental background parsing kept in sync with the editor state.
//!
//! A pluggable [`Parser`] produces [`Tree`]s; this crate owns the
//! scheduling: budgeted cooperative work slices, viewport-biased parse
//! order, fragment reuse across edits, and the state field that exposes the
//! current tree. The parser itself (a grammar, a hand-written scanner,
//! whatever) is a collaborator supplied by the host.

mod context;
mod language;
mod parser;
mod tree;
pub mod work;

pub use context::{current_context, ParseContext, ReadySignal};
pub use language::{
    ensure_syntax_tree, indent_unit, language, language_state_field, syntax_tree,
    syntax_tree_available, Language, LanguageState,
};
pub use parser::{DocInput, ParseInput, Parser, PartialParse, SkippingParser};
pub use tree::{ChangedRange, Tree, TreeFragment};
pub use work::{
    IdleScheduler, ManualIdle, ParseWorker, TimerIdle, WorkerMetricsSnapshot,
};
