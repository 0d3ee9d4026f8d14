//! Transactions: immutable descriptions of one step from a state to the
//! next, plus the pipeline that resolves user-supplied specs into them.

use std::cell::RefCell;
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use core_text::Text;

use crate::change::{ChangeDesc, ChangeSet, ChangeSpec};
use crate::effect::{Annotation, AnnotationType, StateEffect, StateEffectType};
use crate::error::StateError;
use crate::extension::{Compartment, Extension};
use crate::selection::EditorSelection;
use crate::state::{change_filter, transaction_extender, transaction_filter, EditorState};

/// What a change filter decides about a transaction's changes.
pub enum FilterResult {
    /// Let the changes through.
    Accept,
    /// Drop all changes. Once any filter rejects, later filters are not
    /// consulted and cannot revive the changes.
    Reject,
    /// Suppress changes inside the given ranges (`[from, to, from, to …]`,
    /// sorted). Masks from several filters accumulate by union.
    Suppress(Vec<usize>),
}

pub type ChangeFilter = Arc<dyn Fn(&Transaction) -> FilterResult + Send + Sync>;

/// What a transaction filter does with a transaction.
pub enum TrFilterResult {
    /// Keep the transaction as is.
    Keep,
    /// Replace it with the given specs, which are re-resolved with
    /// filtering disabled (so a filter can't loop forever).
    Replace(Vec<TransactionSpec>),
}

pub type TransactionFilter = Arc<dyn Fn(&Transaction) -> TrFilterResult + Send + Sync>;

/// Transaction extenders run after filters and may add effects and
/// annotations (other spec fields are ignored).
pub type TransactionExtender = Arc<dyn Fn(&Transaction) -> Option<TransactionSpec> + Send + Sync>;

/// A user-level description of a transaction. Positions in `changes` refer
/// to the start document; positions in `selection` and in position-carrying
/// effects refer to the document after the changes. `sequential` makes a
/// later spec in the same update address the document produced by the
/// earlier specs instead of the original.
#[derive(Default, Clone)]
pub struct TransactionSpec {
    pub changes: Option<ChangeSpec>,
    pub selection: Option<EditorSelection>,
    pub effects: Vec<StateEffect>,
    pub annotations: Vec<Annotation>,
    pub user_event: Option<String>,
    pub scroll_into_view: bool,
    pub disable_filters: bool,
    pub sequential: bool,
}

impl TransactionSpec {
    pub fn changes(changes: ChangeSpec) -> TransactionSpec {
        TransactionSpec { changes: Some(changes), ..Default::default() }
    }

    pub fn selection(selection: EditorSelection) -> TransactionSpec {
        TransactionSpec { selection: Some(selection), ..Default::default() }
    }

    pub fn effects(effects: Vec<StateEffect>) -> TransactionSpec {
        TransactionSpec { effects, ..Default::default() }
    }
}

pub(crate) struct TrInner {
    start_state: EditorState,
    changes: ChangeSet,
    selection: Option<EditorSelection>,
    effects: Vec<StateEffect>,
    annotations: Vec<Annotation>,
    scroll_into_view: bool,
    doc: RefCell<Option<Text>>,
    state: RefCell<Option<EditorState>>,
}

/// A resolved transaction. Cheap to clone; `state()` computes (and caches)
/// the resulting editor state.
#[derive(Clone)]
pub struct Transaction {
    pub(crate) inner: Arc<TrInner>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction").field("changes", &self.inner.changes).finish()
    }
}

/// Timestamp annotation (milliseconds since the epoch), added automatically.
pub fn time_annotation() -> &'static AnnotationType<u64> {
    static TYPE: OnceLock<AnnotationType<u64>> = OnceLock::new();
    TYPE.get_or_init(AnnotationType::define)
}

/// User-event annotation: a dot-separated hierarchical tag such as
/// `"input.type"` or `"select.pointer"`.
pub fn user_event_annotation() -> &'static AnnotationType<String> {
    static TYPE: OnceLock<AnnotationType<String>> = OnceLock::new();
    TYPE.get_or_init(AnnotationType::define)
}

/// Whether this transaction should be added to the undo history.
pub fn add_to_history_annotation() -> &'static AnnotationType<bool> {
    static TYPE: OnceLock<AnnotationType<bool>> = OnceLock::new();
    TYPE.get_or_init(AnnotationType::define)
}

/// Marks transactions that were produced by a remote peer.
pub fn remote_annotation() -> &'static AnnotationType<bool> {
    static TYPE: OnceLock<AnnotationType<bool>> = OnceLock::new();
    TYPE.get_or_init(AnnotationType::define)
}

/// Replaces the state's entire base configuration.
pub fn reconfigure_effect() -> &'static StateEffectType<Extension> {
    static TYPE: OnceLock<StateEffectType<Extension>> = OnceLock::new();
    TYPE.get_or_init(StateEffectType::define)
}

/// Appends extensions to the state's configuration.
pub fn append_config_effect() -> &'static StateEffectType<Extension> {
    static TYPE: OnceLock<StateEffectType<Extension>> = OnceLock::new();
    TYPE.get_or_init(StateEffectType::define)
}

/// Payload of a compartment reconfiguration.
#[derive(Clone)]
pub struct CompartmentContent {
    pub compartment: Compartment,
    pub extension: Extension,
}

pub(crate) fn compartment_reconfigure_effect() -> &'static StateEffectType<CompartmentContent> {
    static TYPE: OnceLock<StateEffectType<CompartmentContent>> = OnceLock::new();
    TYPE.get_or_init(StateEffectType::define)
}

impl Compartment {
    /// An effect that replaces this compartment's content.
    pub fn reconfigure(&self, ext: impl Into<Extension>) -> StateEffect {
        compartment_reconfigure_effect()
            .of(CompartmentContent { compartment: self.clone(), extension: ext.into() })
    }

    /// The compartment's current content in a state's configuration.
    pub fn get(&self, state: &EditorState) -> Option<Extension> {
        state
            .configuration()
            .compartments
            .iter()
            .find(|(c, _)| c == self)
            .map(|(_, ext)| ext.clone())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Transaction {
    pub(crate) fn create(
        start_state: EditorState,
        changes: ChangeSet,
        selection: Option<EditorSelection>,
        effects: Vec<StateEffect>,
        mut annotations: Vec<Annotation>,
        scroll_into_view: bool,
    ) -> Transaction {
        if !annotations.iter().any(|a| a.is(time_annotation())) {
            annotations.push(time_annotation().of(now_ms()));
        }
        Transaction {
            inner: Arc::new(TrInner {
                start_state,
                changes,
                selection,
                effects,
                annotations,
                scroll_into_view,
                doc: RefCell::new(None),
                state: RefCell::new(None),
            }),
        }
    }

    pub fn start_state(&self) -> &EditorState {
        &self.inner.start_state
    }

    pub fn changes(&self) -> &ChangeSet {
        &self.inner.changes
    }

    pub fn doc_changed(&self) -> bool {
        !self.inner.changes.is_empty()
    }

    /// The selection this transaction explicitly sets, if any.
    pub fn selection_set(&self) -> bool {
        self.inner.selection.is_some()
    }

    pub(crate) fn selection_spec(&self) -> Option<&EditorSelection> {
        self.inner.selection.as_ref()
    }

    pub fn effects(&self) -> &[StateEffect] {
        &self.inner.effects
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.inner.annotations
    }

    pub fn scroll_into_view(&self) -> bool {
        self.inner.scroll_into_view
    }

    pub fn annotation<T: Send + Sync + 'static>(&self, ty: &AnnotationType<T>) -> Option<Arc<T>> {
        self.inner.annotations.iter().find_map(|a| a.value(ty))
    }

    /// Whether the user-event annotation matches `event` or a sub-event of
    /// it (`"select"` matches `"select.pointer"`).
    pub fn is_user_event(&self, event: &str) -> bool {
        match self.annotation(user_event_annotation()) {
            None => false,
            Some(tag) => {
                tag.as_str() == event
                    || (tag.len() > event.len()
                        && tag.starts_with(event)
                        && tag.as_bytes()[event.len()] == b'.')
            }
        }
    }

    /// The document produced by this transaction's changes (cached).
    pub fn new_doc(&self) -> Text {
        if let Some(doc) = self.inner.doc.borrow().as_ref() {
            return doc.clone();
        }
        let doc = match self.inner.changes.apply(self.inner.start_state.doc()) {
            Ok(doc) => doc,
            Err(err) => unreachable!("resolved changes apply to the start document: {err}"),
        };
        *self.inner.doc.borrow_mut() = Some(doc.clone());
        doc
    }

    /// The selection after this transaction: the explicit one, or the start
    /// selection mapped through the changes.
    pub fn new_selection(&self) -> EditorSelection {
        match &self.inner.selection {
            Some(selection) => selection.clone(),
            None => match self.inner.start_state.selection().map(&self.inner.changes.desc(), -1) {
                Ok(selection) => selection,
                Err(err) => unreachable!("start selection maps through own changes: {err}"),
            },
        }
    }

    /// Whether applying this transaction reconfigures the state.
    pub fn reconfigured(&self) -> bool {
        self.inner.effects.iter().any(|e| {
            e.is(reconfigure_effect())
                || e.is(append_config_effect())
                || e.is(compartment_reconfigure_effect())
        })
    }

    /// The state this transaction produces (computed once, then cached).
    ///
    /// Panics when the configuration contains a cyclic slot dependency;
    /// use [`Transaction::try_state`] to observe that as an error.
    pub fn state(&self) -> EditorState {
        match self.try_state() {
            Ok(state) => state,
            Err(err) => panic!("{err}"),
        }
    }

    pub fn try_state(&self) -> Result<EditorState, StateError> {
        if let Some(state) = self.inner.state.borrow().as_ref() {
            return Ok(state.clone());
        }
        let state = EditorState::apply_transaction(self)?;
        *self.inner.state.borrow_mut() = Some(state.clone());
        Ok(state)
    }

    /// Make the under-construction result state reachable through
    /// [`Transaction::state`] while slot update functions run, the same way
    /// the start state is already reachable.
    pub(crate) fn cache_state(&self, state: &EditorState) {
        *self.inner.state.borrow_mut() = Some(state.clone());
    }

    pub(crate) fn clear_cached_state(&self) {
        *self.inner.state.borrow_mut() = None;
    }
}

struct Resolved {
    changes: ChangeSet,
    selection: Option<EditorSelection>,
    effects: Vec<StateEffect>,
    annotations: Vec<Annotation>,
    scroll_into_view: bool,
}

fn resolve_spec(spec: &TransactionSpec, doc_len: usize) -> Result<Resolved, StateError> {
    let changes = match &spec.changes {
        Some(changes) => ChangeSet::of(changes, doc_len)?,
        None => ChangeSet::empty(doc_len),
    };
    if let Some(selection) = &spec.selection {
        selection.assert_valid(changes.new_len())?;
    }
    let mut annotations = spec.annotations.clone();
    if let Some(user_event) = &spec.user_event {
        annotations.push(user_event_annotation().of(user_event.clone()));
    }
    Ok(Resolved {
        changes,
        selection: spec.selection.clone(),
        effects: spec.effects.clone(),
        annotations,
        scroll_into_view: spec.scroll_into_view,
    })
}

fn merge_resolved(a: Resolved, b: Resolved, sequential: bool) -> Result<Resolved, StateError> {
    let (map_for_a, map_for_b, changes);
    if sequential {
        map_for_a = b.changes.desc();
        map_for_b = ChangeDesc::default();
        changes = a.changes.compose(&b.changes)?;
    } else {
        let mapped_b = b.changes.map(&a.changes.desc(), false)?;
        map_for_b = a.changes.desc().map_desc(&b.changes.desc(), true)?;
        changes = a.changes.compose(&mapped_b)?;
        map_for_a = mapped_b.desc();
    }
    let selection = match (&b.selection, &a.selection) {
        (Some(sel), _) => Some(sel.map(&map_for_b, -1)?),
        (None, Some(sel)) => Some(sel.map(&map_for_a, -1)?),
        (None, None) => None,
    };
    let mut effects = StateEffect::map_effects(&a.effects, &map_for_a);
    effects.extend(StateEffect::map_effects(&b.effects, &map_for_b));
    let mut annotations = a.annotations;
    annotations.extend(b.annotations);
    Ok(Resolved {
        changes,
        selection,
        effects,
        annotations,
        scroll_into_view: a.scroll_into_view || b.scroll_into_view,
    })
}

/// Merge two sorted range masks by union.
fn join_ranges(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut result: Vec<usize> = Vec::new();
    let (mut ia, mut ib) = (0, 0);
    loop {
        let (from, to);
        if ia < a.len() && (ib == b.len() || b[ib] >= a[ia]) {
            from = a[ia];
            to = a[ia + 1];
            ia += 2;
        } else if ib < b.len() {
            from = b[ib];
            to = b[ib + 1];
            ib += 2;
        } else {
            return result;
        }
        if result.is_empty() || result[result.len() - 1] < from {
            result.push(from);
            result.push(to);
        } else {
            let last = result.len() - 1;
            if result[last] < to {
                result[last] = to;
            }
        }
    }
}

/// The ranges of `0..len` not covered by the sorted mask.
fn complement_ranges(mask: &[usize], len: usize) -> Vec<usize> {
    let mut result = Vec::new();
    let mut pos = 0usize;
    let mut i = 0;
    while i + 1 < mask.len() {
        let (from, to) = (mask[i], mask[i + 1]);
        i += 2;
        if from > pos {
            result.push(pos);
            result.push(from);
        }
        pos = pos.max(to);
    }
    if pos < len || result.is_empty() {
        result.push(pos.min(len));
        result.push(len);
    }
    result
}

fn filter_transaction(tr: Transaction) -> Result<Transaction, StateError> {
    let state = tr.start_state().clone();

    // Change filters, in facet order. A `Reject` is final: later filters
    // can neither revive nor further restrict the changes.
    let mut mask: Option<Vec<usize>> = None;
    let mut rejected = false;
    for filter in state.facet(change_filter()).iter() {
        match filter(&tr) {
            FilterResult::Accept => {}
            FilterResult::Reject => {
                rejected = true;
                break;
            }
            FilterResult::Suppress(ranges) => {
                mask = Some(match mask {
                    None => ranges,
                    Some(prev) => join_ranges(&prev, &ranges),
                });
            }
        }
    }
    let mut tr = tr;
    if rejected || mask.is_some() {
        let (changes, back);
        if rejected {
            back = tr.changes().desc().inverted_desc();
            changes = ChangeSet::empty(state.doc().len());
        } else {
            let mask = mask.unwrap_or_default();
            let allowed = complement_ranges(&mask, state.doc().len());
            let (kept, suppressed) = tr.changes().filter(&allowed);
            back = suppressed.map_desc(&kept.desc(), false)?.inverted_desc();
            changes = kept;
        }
        let selection = match tr.selection_spec() {
            Some(selection) => Some(selection.map(&back, -1)?),
            None => None,
        };
        let effects = StateEffect::map_effects(tr.effects(), &back);
        let annotations = tr.annotations().to_vec();
        let scroll = tr.scroll_into_view();
        tr = Transaction::create(state.clone(), changes, selection, effects, annotations, scroll);
    }

    // Transaction filters, in reverse facet order (highest precedence
    // runs last and gets the final word).
    let filters = state.facet(transaction_filter());
    for filter in filters.iter().rev() {
        match filter(&tr) {
            TrFilterResult::Keep => {}
            TrFilterResult::Replace(specs) => {
                tr = resolve_transaction(&state, &specs, false)?;
            }
        }
    }
    Ok(tr)
}

fn extend_transaction(tr: Transaction) -> Result<Transaction, StateError> {
    let state = tr.start_state().clone();
    let extenders = state.facet(transaction_extender());
    let mut effects = tr.effects().to_vec();
    let mut annotations = tr.annotations().to_vec();
    let mut scroll = tr.scroll_into_view();
    let mut extended = false;
    for extender in extenders.iter().rev() {
        if let Some(spec) = extender(&tr) {
            // Extenders contribute effects and annotations only.
            let resolved = resolve_spec(&spec, tr.changes().new_len())?;
            effects.extend(resolved.effects);
            annotations.extend(resolved.annotations);
            scroll |= resolved.scroll_into_view;
            extended = true;
        }
    }
    if !extended {
        return Ok(tr);
    }
    Ok(Transaction::create(
        state,
        tr.changes().clone(),
        tr.selection_spec().cloned(),
        effects,
        annotations,
        scroll,
    ))
}

pub(crate) fn resolve_transaction(
    state: &EditorState,
    specs: &[TransactionSpec],
    filter: bool,
) -> Result<Transaction, StateError> {
    let mut filter = filter;
    let default_spec = TransactionSpec::default();
    let first = specs.first().unwrap_or(&default_spec);
    if first.disable_filters {
        filter = false;
    }
    let mut resolved = resolve_spec(first, state.doc().len())?;
    for spec in specs.iter().skip(1) {
        if spec.disable_filters {
            filter = false;
        }
        let doc_len =
            if spec.sequential { resolved.changes.new_len() } else { state.doc().len() };
        let next = resolve_spec(spec, doc_len)?;
        resolved = merge_resolved(resolved, next, spec.sequential)?;
    }
    let tr = Transaction::create(
        state.clone(),
        resolved.changes,
        resolved.selection,
        resolved.effects,
        resolved.annotations,
        resolved.scroll_into_view,
    );
    extend_transaction(if filter { filter_transaction(tr)? } else { tr })
}
