//! The editor state: an immutable snapshot of document, selection, and every
//! extension-derived value, plus the machinery that computes slot values
//! when a state is created, updated, or reconfigured.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use core_text::Text;
use serde_json::{json, Value};
use tracing::warn;

use crate::change::{ChangeSet, ChangeSpec};
use crate::config::{
    Configuration, DynSlot, SLOT_CHANGED, SLOT_COMPUTED, SLOT_COMPUTING,
};
use crate::effect::StateEffect;
use crate::error::StateError;
use crate::extension::Extension;
use crate::facet::{Facet, FacetConfig, FacetInner, ProviderKind};
use crate::field::{init_with_value, FieldHandle, StateField};
use crate::selection::{EditorSelection, SelectionRange};
use crate::transaction::{
    append_config_effect, compartment_reconfigure_effect, reconfigure_effect,
    resolve_transaction, ChangeFilter, Transaction, TransactionExtender, TransactionFilter,
    TransactionSpec,
};
use crate::DynValue;

#[derive(Clone)]
pub(crate) enum ComputePhase {
    Create,
    Update(Transaction),
    Reconfigure(EditorState),
}

pub(crate) struct StateInner {
    config: Arc<Configuration>,
    doc: Text,
    selection: EditorSelection,
    values: RefCell<Vec<Option<DynValue>>>,
    status: RefCell<Vec<u8>>,
    phase: RefCell<Option<ComputePhase>>,
}

/// An immutable editor state. Cloning shares the snapshot; all updates go
/// through [`EditorState::update`] and produce new states.
#[derive(Clone)]
pub struct EditorState {
    pub(crate) inner: Arc<StateInner>,
}

impl std::fmt::Debug for EditorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EditorState").field("doc_len", &self.inner.doc.len()).finish()
    }
}

/// Input to [`EditorState::create`].
#[derive(Default)]
pub struct StateConfig {
    pub doc: Option<Text>,
    pub selection: Option<EditorSelection>,
    pub extensions: Vec<Extension>,
}

fn get_addr(state: &EditorState, addr: usize) -> DynValue {
    if addr & 1 == 1 {
        state.inner.config.static_values[addr >> 1].clone()
    } else {
        match &state.inner.values.borrow()[addr >> 1] {
            Some(value) => value.clone(),
            None => unreachable!("dynamic slot read before it was computed"),
        }
    }
}

fn set_value(state: &EditorState, idx: usize, value: DynValue) {
    state.inner.values.borrow_mut()[idx] = Some(value);
}

fn get_value(state: &EditorState, idx: usize) -> Option<DynValue> {
    state.inner.values.borrow()[idx].clone()
}

/// Make sure the slot behind `addr` is computed for the current phase.
/// Returns the slot status (including the `SLOT_CHANGED` bit).
pub(crate) fn ensure_addr(state: &EditorState, addr: usize) -> Result<u8, StateError> {
    if addr & 1 == 1 {
        return Ok(SLOT_COMPUTED);
    }
    let idx = addr >> 1;
    let status = state.inner.status.borrow()[idx];
    if status & SLOT_COMPUTING != 0 {
        return Err(StateError::Configuration(
            "cyclic dependency between fields and facets".into(),
        ));
    }
    if status & SLOT_COMPUTED != 0 {
        return Ok(status);
    }
    state.inner.status.borrow_mut()[idx] = SLOT_COMPUTING;
    let changed = run_slot(state, idx)?;
    let final_status = SLOT_COMPUTED | changed;
    state.inner.status.borrow_mut()[idx] = final_status;
    Ok(final_status)
}

fn ensure_all(state: &EditorState, addrs: &[usize]) -> Result<bool, StateError> {
    let mut changed = false;
    for &addr in addrs {
        if ensure_addr(state, addr)? & SLOT_CHANGED != 0 {
            changed = true;
        }
    }
    Ok(changed)
}

fn provider_compute(state: &EditorState, provider: &crate::facet::ProviderInner) -> DynValue {
    match &provider.kind {
        ProviderKind::Single { get, .. } => get(state),
        ProviderKind::Multi { get, .. } => Arc::new(get(state)) as DynValue,
        ProviderKind::Static(value) => value.clone(),
    }
}

fn provider_value_eq(
    facet: &FacetInner,
    multi: bool,
    a: &DynValue,
    b: &DynValue,
) -> bool {
    if !multi {
        return (facet.compare_input)(a, b);
    }
    match (a.downcast_ref::<Vec<DynValue>>(), b.downcast_ref::<Vec<DynValue>>()) {
        (Some(a), Some(b)) => {
            a.len() == b.len()
                && a.iter().zip(b).all(|(x, y)| (facet.compare_input)(x, y))
        }
        _ => false,
    }
}

fn combined_get(
    state: &EditorState,
    facet: &FacetInner,
    provider_addrs: &[usize],
    provider_multi: &[bool],
) -> DynValue {
    let mut values: Vec<DynValue> = Vec::new();
    for (&addr, &multi) in provider_addrs.iter().zip(provider_multi) {
        let value = get_addr(state, addr);
        if multi {
            match value.downcast_ref::<Vec<DynValue>>() {
                Some(list) => values.extend(list.iter().cloned()),
                None => unreachable!("multi provider slot holds a value list"),
            }
        } else {
            values.push(value);
        }
    }
    (facet.combine)(&values)
}

fn run_slot(state: &EditorState, idx: usize) -> Result<u8, StateError> {
    let config = state.inner.config.clone();
    let phase = match state.inner.phase.borrow().clone() {
        Some(phase) => phase,
        None => unreachable!("slots are fully computed outside of state construction"),
    };
    match &config.dynamic_slots[idx] {
        DynSlot::Field(field) => match &phase {
            ComputePhase::Create => {
                let value = (field.create)(state);
                set_value(state, idx, value);
                Ok(SLOT_CHANGED)
            }
            ComputePhase::Update(tr) => {
                let old = match get_value(state, idx) {
                    Some(value) => value,
                    None => unreachable!("field value carried over from previous state"),
                };
                let new = (field.update)(&old, tr);
                if (field.compare)(&old, &new) {
                    Ok(0)
                } else {
                    set_value(state, idx, new);
                    Ok(SLOT_CHANGED)
                }
            }
            ComputePhase::Reconfigure(old_state) => {
                match old_state.field_value_by_id(field.id) {
                    Some(old_value) => {
                        set_value(state, idx, old_value);
                        Ok(0)
                    }
                    None => {
                        let value = (field.create)(state);
                        set_value(state, idx, value);
                        Ok(SLOT_CHANGED)
                    }
                }
            }
        },
        DynSlot::Provider { provider, dep_doc, dep_sel, dep_addrs, multi } => match &phase {
            ComputePhase::Create => {
                let value = provider_compute(state, provider);
                set_value(state, idx, value);
                Ok(SLOT_CHANGED)
            }
            ComputePhase::Update(tr) => {
                let deps_changed = (*dep_doc && tr.doc_changed())
                    || (*dep_sel && (tr.doc_changed() || tr.selection_set()))
                    || ensure_all(state, dep_addrs)?;
                if deps_changed {
                    let new = provider_compute(state, provider);
                    let old = match get_value(state, idx) {
                        Some(value) => value,
                        None => unreachable!("provider value carried over from previous state"),
                    };
                    if !provider_value_eq(&provider.facet, *multi, &new, &old) {
                        set_value(state, idx, new);
                        return Ok(SLOT_CHANGED);
                    }
                }
                Ok(0)
            }
            ComputePhase::Reconfigure(old_state) => {
                if let Some(old_addr) = old_state.configuration().addr_of(provider.id) {
                    let old_value = get_addr(old_state, old_addr);
                    let deps = match &provider.kind {
                        ProviderKind::Single { deps, .. } | ProviderKind::Multi { deps, .. } => {
                            deps.as_slice()
                        }
                        ProviderKind::Static(_) => &[],
                    };
                    let mut deps_same = true;
                    for dep in deps {
                        match dep {
                            crate::facet::Dep::Doc | crate::facet::Dep::Selection => {}
                            crate::facet::Dep::Facet(id) => {
                                let old = old_state.facet_value_by_id(*id);
                                let new = state.facet_value_by_id_ensured(*id)?;
                                let same = match (old, new) {
                                    (None, None) => true,
                                    (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
                                    _ => false,
                                };
                                if !same {
                                    deps_same = false;
                                    break;
                                }
                            }
                            crate::facet::Dep::Field(id) => {
                                let old = old_state.field_value_by_id(*id);
                                let new = state.field_value_by_id_ensured(*id)?;
                                let same = match (old, new) {
                                    (None, None) => true,
                                    (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
                                    _ => false,
                                };
                                if !same {
                                    deps_same = false;
                                    break;
                                }
                            }
                        }
                    }
                    if deps_same {
                        set_value(state, idx, old_value);
                        return Ok(0);
                    }
                    let new = provider_compute(state, provider);
                    if provider_value_eq(&provider.facet, *multi, &new, &old_value) {
                        set_value(state, idx, old_value);
                        return Ok(0);
                    }
                    set_value(state, idx, new);
                    Ok(SLOT_CHANGED)
                } else {
                    let value = provider_compute(state, provider);
                    set_value(state, idx, value);
                    Ok(SLOT_CHANGED)
                }
            }
        },
        DynSlot::Combined { facet, providers, provider_addrs, provider_multi, dynamic_addrs } => {
            match &phase {
                ComputePhase::Create => {
                    for &addr in provider_addrs {
                        ensure_addr(state, addr)?;
                    }
                    let value = combined_get(state, facet, provider_addrs, provider_multi);
                    set_value(state, idx, value);
                    Ok(SLOT_CHANGED)
                }
                ComputePhase::Update(_) => {
                    if !ensure_all(state, dynamic_addrs)? {
                        return Ok(0);
                    }
                    let value = combined_get(state, facet, provider_addrs, provider_multi);
                    let old = match get_value(state, idx) {
                        Some(value) => value,
                        None => unreachable!("facet value carried over from previous state"),
                    };
                    if (facet.compare)(&value, &old) {
                        return Ok(0);
                    }
                    set_value(state, idx, value);
                    Ok(SLOT_CHANGED)
                }
                ComputePhase::Reconfigure(old_state) => {
                    let deps_changed = ensure_all(state, provider_addrs)?;
                    let old_providers = old_state.configuration().facets.get(&facet.id);
                    let old_value = old_state.facet_dyn_computed(facet);
                    if let Some(old_providers) = old_providers {
                        let same = old_providers.len() == providers.len()
                            && old_providers
                                .iter()
                                .zip(providers)
                                .all(|(a, b)| Arc::ptr_eq(a, b));
                        if !deps_changed && same {
                            set_value(state, idx, old_value);
                            return Ok(0);
                        }
                    }
                    let value = combined_get(state, facet, provider_addrs, provider_multi);
                    if (facet.compare)(&value, &old_value) {
                        set_value(state, idx, old_value);
                        return Ok(0);
                    }
                    set_value(state, idx, value);
                    Ok(SLOT_CHANGED)
                }
            }
        }
    }
}

impl EditorState {
    /// Build a fresh state from a configuration.
    pub fn create(config: StateConfig) -> Result<EditorState, StateError> {
        let configuration =
            Configuration::resolve(Extension::from(config.extensions), &[], None)?;
        let doc = config.doc.unwrap_or_else(Text::empty);
        let mut selection = config.selection.unwrap_or_else(|| EditorSelection::cursor(0));
        selection.assert_valid(doc.len())?;
        if !static_facet_bool(&configuration, allow_multiple_selections()) {
            selection = selection.as_single();
        }
        Self::new_computed(Arc::new(configuration), doc, selection, None, ComputePhase::Create)
    }

    fn new_computed(
        config: Arc<Configuration>,
        doc: Text,
        selection: EditorSelection,
        start_values: Option<Vec<Option<DynValue>>>,
        phase: ComputePhase,
    ) -> Result<EditorState, StateError> {
        let slots = config.dynamic_slots.len();
        let values = start_values.unwrap_or_else(|| vec![None; slots]);
        debug_assert_eq!(values.len(), slots);
        let update_tr = match &phase {
            ComputePhase::Update(tr) => Some(tr.clone()),
            _ => None,
        };
        let state = EditorState {
            inner: Arc::new(StateInner {
                config,
                doc,
                selection,
                values: RefCell::new(values),
                status: RefCell::new(vec![0; slots]),
                phase: RefCell::new(Some(phase)),
            }),
        };
        if let Some(tr) = &update_tr {
            tr.cache_state(&state);
        }
        for idx in 0..slots {
            if let Err(err) = ensure_addr(&state, idx << 1) {
                if let Some(tr) = &update_tr {
                    tr.clear_cached_state();
                }
                return Err(err);
            }
        }
        *state.inner.phase.borrow_mut() = None;
        Ok(state)
    }

    /// Apply a resolved transaction, producing the next state.
    pub(crate) fn apply_transaction(tr: &Transaction) -> Result<EditorState, StateError> {
        let start = tr.start_state();
        let mut conf = Some(start.inner.config.clone());
        let mut base = start.inner.config.base.clone();
        let mut compartments = start.inner.config.compartments.clone();
        for effect in tr.effects() {
            if let Some(content) = effect.value(compartment_reconfigure_effect()) {
                match compartments.iter_mut().find(|(c, _)| *c == content.compartment) {
                    Some(entry) => entry.1 = content.extension.clone(),
                    None => compartments.push((content.compartment.clone(), content.extension.clone())),
                }
                conf = None;
            } else if let Some(ext) = effect.value(reconfigure_effect()) {
                base = (*ext).clone();
                conf = None;
            } else if let Some(ext) = effect.value(append_config_effect()) {
                base = Extension::from(vec![base, (*ext).clone()]);
                conf = None;
            }
        }
        let (config, start_values) = match conf {
            Some(config) => (config, start.inner.values.borrow().clone()),
            None => {
                let config =
                    Arc::new(Configuration::resolve(base, &compartments, Some(start))?);
                let intermediate = Self::new_computed(
                    config.clone(),
                    start.doc().clone(),
                    start.selection().clone(),
                    None,
                    ComputePhase::Reconfigure(start.clone()),
                )?;
                let values = intermediate.inner.values.borrow().clone();
                (config, values)
            }
        };
        let selection = if *start.facet(allow_multiple_selections()) {
            tr.new_selection()
        } else {
            tr.new_selection().as_single()
        };
        Self::new_computed(
            config,
            tr.new_doc(),
            selection,
            Some(start_values),
            ComputePhase::Update(tr.clone()),
        )
    }

    pub fn doc(&self) -> &Text {
        &self.inner.doc
    }

    pub fn selection(&self) -> &EditorSelection {
        &self.inner.selection
    }

    pub(crate) fn configuration(&self) -> &Configuration {
        &self.inner.config
    }

    /// The current value of a facet. For facets absent from the
    /// configuration this is the facet's default (its combine function
    /// applied to no inputs).
    ///
    /// Panics on a cyclic slot dependency, which can only happen while the
    /// state is being constructed from a miswired configuration.
    pub fn facet<I: Send + Sync + 'static, O: Send + Sync + 'static>(
        &self,
        facet: &Facet<I, O>,
    ) -> Arc<O> {
        match self.facet_dyn(&facet.inner) {
            Ok(value) => facet.read(value),
            Err(err) => panic!("{err}"),
        }
    }

    pub(crate) fn facet_dyn(&self, facet: &Arc<FacetInner>) -> Result<DynValue, StateError> {
        match self.inner.config.addr_of(facet.id) {
            None => Ok(facet.default.clone()),
            Some(addr) => {
                if self.inner.phase.borrow().is_some() {
                    ensure_addr(self, addr)?;
                }
                Ok(get_addr(self, addr))
            }
        }
    }

    /// Facet value on a fully-computed state (used by the resolver when it
    /// carries values across a reconfiguration).
    pub(crate) fn facet_dyn_computed(&self, facet: &FacetInner) -> DynValue {
        match self.inner.config.addr_of(facet.id) {
            None => facet.default.clone(),
            Some(addr) => get_addr(self, addr),
        }
    }

    pub(crate) fn facet_value_by_id(&self, id: u64) -> Option<DynValue> {
        self.inner.config.addr_of(id).map(|addr| get_addr(self, addr))
    }

    pub(crate) fn facet_value_by_id_ensured(&self, id: u64) -> Result<Option<DynValue>, StateError> {
        match self.inner.config.addr_of(id) {
            None => Ok(None),
            Some(addr) => {
                if self.inner.phase.borrow().is_some() {
                    ensure_addr(self, addr)?;
                }
                Ok(Some(get_addr(self, addr)))
            }
        }
    }

    pub(crate) fn field_value_by_id(&self, id: u64) -> Option<DynValue> {
        let addr = self.inner.config.addr_of(id)?;
        Some(get_addr(self, addr))
    }

    pub(crate) fn field_value_by_id_ensured(&self, id: u64) -> Result<Option<DynValue>, StateError> {
        self.facet_value_by_id_ensured(id)
    }

    /// The value of a state field. Panics when the field is not part of
    /// this state's configuration; see [`EditorState::try_field`].
    pub fn field<V: Send + Sync + 'static>(&self, field: &StateField<V>) -> Arc<V> {
        match self.try_field(field) {
            Some(value) => value,
            None => panic!("field is not present in this configuration"),
        }
    }

    pub fn try_field<V: Send + Sync + 'static>(&self, field: &StateField<V>) -> Option<Arc<V>> {
        let addr = self.inner.config.addr_of(field.id())?;
        if self.inner.phase.borrow().is_some() {
            match ensure_addr(self, addr) {
                Ok(_) => {}
                Err(err) => panic!("{err}"),
            }
        }
        Some(field.read(&get_addr(self, addr)))
    }

    /// Start building a transaction from one or more specs.
    pub fn update(&self, specs: Vec<TransactionSpec>) -> Result<Transaction, StateError> {
        resolve_transaction(self, &specs, true)
    }

    /// Normalise a change spec against this state's document.
    pub fn changes(&self, spec: &ChangeSpec) -> Result<ChangeSet, StateError> {
        ChangeSet::of(spec, self.doc().len())
    }

    /// Split a string into a `Text`, honouring the line-separator facet.
    pub fn to_text(&self, content: &str) -> Text {
        match self.facet(line_separator()).as_ref() {
            Some(sep) => {
                match Text::of(content.split(sep.as_str()).collect::<Vec<_>>()) {
                    Ok(text) => text,
                    Err(_) => Text::from(content),
                }
            }
            None => Text::from(content),
        }
    }

    pub fn slice_doc(&self, from: Option<usize>, to: Option<usize>) -> Result<String, StateError> {
        let from = from.unwrap_or(0);
        let to = to.unwrap_or_else(|| self.doc().len());
        Ok(self.doc().slice_string(from, to, None)?)
    }

    pub fn tab_size(&self) -> u32 {
        *self.facet(tab_size())
    }

    pub fn line_break(&self) -> String {
        self.facet(line_separator()).as_ref().clone().unwrap_or_else(|| "\n".to_string())
    }

    pub fn read_only(&self) -> bool {
        *self.facet(read_only())
    }

    /// Look up a translation for `phrase` in the phrases facet.
    pub fn phrase(&self, phrase: &str) -> String {
        self.facet(phrases())
            .get(phrase)
            .cloned()
            .unwrap_or_else(|| phrase.to_string())
    }

    /// Run `f` over every selection range, merging the produced changes and
    /// ranges into a single transaction spec (the way multi-cursor editing
    /// commands are written).
    pub fn change_by_range(
        &self,
        mut f: impl FnMut(&EditorState, &SelectionRange) -> Result<RangeChange, StateError>,
    ) -> Result<TransactionSpec, StateError> {
        let sel = self.selection();
        let first = f(self, &sel.ranges()[0])?;
        let mut changes = match first.changes {
            Some(spec) => self.changes(&spec)?,
            None => ChangeSet::empty(self.doc().len()),
        };
        let mut ranges = vec![first.range];
        let mut effects = first.effects;
        for range in sel.ranges().iter().skip(1) {
            let result = f(self, range)?;
            let new_changes = match result.changes {
                Some(spec) => self.changes(&spec)?,
                None => ChangeSet::empty(self.doc().len()),
            };
            let new_mapped = new_changes.map(&changes.desc(), false)?;
            for existing in ranges.iter_mut() {
                *existing = existing.map(&new_mapped.desc(), -1)?;
            }
            let map_by = changes.desc().map_desc(&new_changes.desc(), true)?;
            ranges.push(result.range.map(&map_by, -1)?);
            changes = changes.compose(&new_mapped)?;
            effects = StateEffect::map_effects(&effects, &new_mapped.desc());
            effects.extend(StateEffect::map_effects(&result.effects, &map_by));
        }
        Ok(TransactionSpec {
            changes: Some(ChangeSpec::Set(changes)),
            selection: Some(EditorSelection::create(ranges, sel.main_index())?),
            effects,
            ..Default::default()
        })
    }

    /// Replace every selection range with the given text, leaving a cursor
    /// at the end of each insertion.
    pub fn replace_selection(&self, text: impl Into<Text>) -> Result<TransactionSpec, StateError> {
        let text = text.into();
        self.change_by_range(move |_, range| {
            Ok(RangeChange {
                changes: Some(ChangeSpec::replace(range.from, range.to, text.clone())),
                range: SelectionRange::cursor(range.from + text.len(), 0, None, None),
                effects: Vec::new(),
            })
        })
    }

    /// Serialise to JSON: `{doc, selection, <name>: fieldJson…}` for every
    /// named field (which must be part of the configuration and carry a
    /// JSON codec).
    pub fn to_json(&self, fields: &[(&str, FieldHandle)]) -> Result<Value, StateError> {
        let mut result = json!({
            "doc": self.doc().to_string(),
            "selection": self.selection().to_json(),
        });
        for (name, handle) in fields {
            let value = self.field_value_by_id(handle.inner.id).ok_or_else(|| {
                StateError::Configuration(format!("field {name:?} is not in this configuration"))
            })?;
            let codec = handle.inner.to_json.as_ref().ok_or_else(|| {
                StateError::Configuration(format!("field {name:?} has no JSON codec"))
            })?;
            result[*name] = codec(&value);
        }
        Ok(result)
    }

    /// Reconstitute a state from its JSON form. Fields named in `fields`
    /// take their initial value from the serialisation instead of their
    /// create function.
    pub fn from_json(
        json: &Value,
        config: StateConfig,
        fields: &[(&str, FieldHandle)],
    ) -> Result<EditorState, StateError> {
        let doc = json
            .get("doc")
            .and_then(Value::as_str)
            .ok_or_else(|| StateError::SchemaViolation("state JSON is missing \"doc\"".into()))?;
        let selection = match json.get("selection") {
            Some(sel) => Some(EditorSelection::from_json(sel)?),
            None => None,
        };
        let mut extensions = Vec::new();
        for (name, handle) in fields {
            if let Some(value) = json.get(*name) {
                let codec = handle.inner.from_json.as_ref().ok_or_else(|| {
                    StateError::Configuration(format!("field {name:?} has no JSON codec"))
                })?;
                let decoded = codec(value)?;
                // Init extensions go first so they win the identity dedup
                // against the plain field in the base extensions.
                extensions.push(init_with_value(handle, decoded));
            }
        }
        extensions.extend(config.extensions);
        EditorState::create(StateConfig {
            doc: Some(Text::from(doc)),
            selection: config.selection.or(selection),
            extensions,
        })
    }
}

/// One range's contribution to [`EditorState::change_by_range`].
pub struct RangeChange {
    pub changes: Option<ChangeSpec>,
    pub range: SelectionRange,
    pub effects: Vec<StateEffect>,
}

/// Read a boolean facet's static value straight off a configuration, before
/// any state exists. Dynamically-provided values count as unset here.
fn static_facet_bool(config: &Configuration, facet: &Facet<bool, bool>) -> bool {
    match config.addr_of(facet.id()) {
        None => *facet.read(facet.default_value()),
        Some(addr) if addr & 1 == 1 => *facet.read(config.static_values[addr >> 1].clone()),
        Some(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Built-in facets
// ---------------------------------------------------------------------------

/// Whether the editor accepts selections with multiple ranges.
pub fn allow_multiple_selections() -> &'static Facet<bool, bool> {
    static FACET: OnceLock<Facet<bool, bool>> = OnceLock::new();
    FACET.get_or_init(|| {
        Facet::define(
            FacetConfig::new(|values: &[&bool]| values.iter().any(|v| **v)).compare(|a, b| a == b),
        )
    })
}

/// The width of a tab character. Combine: first value, default 4.
pub fn tab_size() -> &'static Facet<u32, u32> {
    static FACET: OnceLock<Facet<u32, u32>> = OnceLock::new();
    FACET.get_or_init(|| {
        Facet::define(
            FacetConfig::new(|values: &[&u32]| values.first().map(|v| **v).unwrap_or(4))
                .compare(|a, b| a == b),
        )
    })
}

/// An explicit line separator for string conversion. Combine: first value.
pub fn line_separator() -> &'static Facet<String, Option<String>> {
    static FACET: OnceLock<Facet<String, Option<String>>> = OnceLock::new();
    FACET.get_or_init(|| {
        Facet::define(
            FacetConfig::new(|values: &[&String]| values.first().map(|v| (*v).clone()))
                .compare(|a, b| a == b)
                .static_only(),
        )
    })
}

/// Marks the state read-only (consulted by commands, not enforced here).
pub fn read_only() -> &'static Facet<bool, bool> {
    static FACET: OnceLock<Facet<bool, bool>> = OnceLock::new();
    FACET.get_or_init(|| {
        Facet::define(
            FacetConfig::new(|values: &[&bool]| values.iter().any(|v| **v)).compare(|a, b| a == b),
        )
    })
}

/// Translation table. Later entries win on key collision.
pub fn phrases() -> &'static Facet<HashMap<String, String>, HashMap<String, String>> {
    static FACET: OnceLock<Facet<HashMap<String, String>, HashMap<String, String>>> =
        OnceLock::new();
    FACET.get_or_init(|| {
        Facet::define(
            FacetConfig::new(|values: &[&HashMap<String, String>]| {
                let mut merged = HashMap::new();
                for table in values {
                    for (k, v) in table.iter() {
                        merged.insert(k.clone(), v.clone());
                    }
                }
                merged
            })
            .compare(|a, b| a == b),
        )
    })
}

/// A provider of language-specific metadata at a document position.
pub type LanguageDataProvider =
    Arc<dyn Fn(&EditorState, usize) -> Vec<Arc<Value>> + Send + Sync>;

/// Registered language-data providers, queried by `language_data_at`.
pub fn language_data() -> &'static Facet<LanguageDataProvider, Vec<LanguageDataProvider>> {
    static FACET: OnceLock<Facet<LanguageDataProvider, Vec<LanguageDataProvider>>> =
        OnceLock::new();
    FACET.get_or_init(|| {
        Facet::define(FacetConfig::new(|values: &[&LanguageDataProvider]| {
            values.iter().map(|v| (*v).clone()).collect()
        }))
    })
}

/// Collect the values under `name` from every language-data object that
/// applies at `pos`, highest precedence first.
pub fn language_data_at(state: &EditorState, pos: usize, name: &str) -> Vec<Arc<Value>> {
    let mut out = Vec::new();
    for provider in state.facet(language_data()).iter() {
        for object in provider(state, pos) {
            if let Some(value) = object.get(name) {
                out.push(Arc::new(value.clone()));
            }
        }
    }
    out
}

/// Change filters; consulted in facet order before a transaction is applied.
pub fn change_filter() -> &'static Facet<ChangeFilter, Vec<ChangeFilter>> {
    static FACET: OnceLock<Facet<ChangeFilter, Vec<ChangeFilter>>> = OnceLock::new();
    FACET.get_or_init(|| {
        Facet::define(FacetConfig::new(|values: &[&ChangeFilter]| {
            values.iter().map(|v| (*v).clone()).collect()
        }))
    })
}

/// Transaction filters; run in reverse facet order.
pub fn transaction_filter() -> &'static Facet<TransactionFilter, Vec<TransactionFilter>> {
    static FACET: OnceLock<Facet<TransactionFilter, Vec<TransactionFilter>>> = OnceLock::new();
    FACET.get_or_init(|| {
        Facet::define(FacetConfig::new(|values: &[&TransactionFilter]| {
            values.iter().map(|v| (*v).clone()).collect()
        }))
    })
}

/// Transaction extenders; run after filters, even for updates that asked
/// for filtering to be skipped.
pub fn transaction_extender() -> &'static Facet<TransactionExtender, Vec<TransactionExtender>> {
    static FACET: OnceLock<Facet<TransactionExtender, Vec<TransactionExtender>>> = OnceLock::new();
    FACET.get_or_init(|| {
        Facet::define(FacetConfig::new(|values: &[&TransactionExtender]| {
            values.iter().map(|v| (*v).clone()).collect()
        }))
    })
}

/// Where exceptions from plugins and parsers are reported. The default sink
/// logs through `tracing`.
pub type ExceptionSink = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

pub fn exception_sink() -> &'static Facet<ExceptionSink, ExceptionSink> {
    static FACET: OnceLock<Facet<ExceptionSink, ExceptionSink>> = OnceLock::new();
    FACET.get_or_init(|| {
        Facet::define(FacetConfig::new(|values: &[&ExceptionSink]| {
            values.first().map(|v| (*v).clone()).unwrap_or_else(|| {
                Arc::new(|err: &anyhow::Error| {
                    warn!(target: "state.exception", error = %err, "unhandled extension error");
                })
            })
        }))
    })
}

/// Report an error through the state's exception sink.
pub fn report_exception(state: &EditorState, err: &anyhow::Error) {
    (state.facet(exception_sink()))(err);
}
