//! Editor state core: change algebra, selections, the extension system, and
//! the transaction pipeline.
//!
//! Everything here is immutable and single-threaded-cooperative. A
//! [`EditorState`] owns a document, a selection, and one value per
//! configured slot (fields and facet outputs); applying a [`Transaction`]
//! produces a fresh state that shares all unchanged structure with its
//! predecessor. The extension resolver turns a nested extension tree into a
//! flat, addressable slot layout exactly once per configuration, so the
//! per-transaction work is bounded by the slots whose dependencies actually
//! changed.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

mod change;
mod config;
mod effect;
mod error;
mod extension;
mod facet;
mod field;
mod selection;
mod state;
mod transaction;

pub use change::{ChangeDesc, ChangeSet, ChangeSpec, MapMode, Touched};
pub use core_text::Text;
pub use effect::{Annotation, AnnotationType, StateEffect, StateEffectType};
pub use error::StateError;
pub use extension::{Compartment, Extension, Prec};
pub use facet::{Dep, Facet, FacetConfig};
pub use field::{FieldConfig, FieldHandle, StateField};
pub use selection::{EditorSelection, SelectionRange};
pub use state::{
    allow_multiple_selections, change_filter, exception_sink, language_data, language_data_at,
    line_separator, phrases, read_only, report_exception, tab_size, transaction_extender,
    transaction_filter, EditorState, ExceptionSink, LanguageDataProvider, RangeChange,
    StateConfig,
};
pub use transaction::{
    add_to_history_annotation, append_config_effect, reconfigure_effect, remote_annotation,
    time_annotation, user_event_annotation, ChangeFilter, CompartmentContent, FilterResult,
    Transaction, TransactionExtender, TransactionFilter, TransactionSpec, TrFilterResult,
};

/// Type-erased slot value. Typed access goes through the `Facet`,
/// `StateField`, `AnnotationType`, and `StateEffectType` handles.
pub(crate) type DynValue = Arc<dyn Any + Send + Sync>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for fields, facets, providers, annotations, effects,
/// and compartments. Creation from multiple threads is safe; everything
/// else in this crate assumes single-threaded use per state family.
pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}
