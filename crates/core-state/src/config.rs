//! The extension resolver: turns a user-supplied extension tree into a flat
//! configuration of addressable slots.
//!
//! Resolution has two phases. Flattening walks the tree depth-first,
//! assigning every provider and field to one of five precedence buckets and
//! de-duplicating nodes that occur more than once (a second occurrence with
//! strictly higher precedence wins). Address assignment then gives every
//! field a dynamic slot and every facet either a precomputed static value or
//! a combiner slot fed by per-provider slots. Addresses pack the slot index
//! with a low bit distinguishing static (1) from dynamic (0) storage.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::trace;

use crate::error::StateError;
use crate::extension::{ext_key, Compartment, ExtKey, Extension, Prec};
use crate::facet::{Dep, FacetInner, ProviderInner};
use crate::field::FieldInner;
use crate::state::EditorState;
use crate::DynValue;

/// Slot status bits.
pub(crate) const SLOT_CHANGED: u8 = 1;
pub(crate) const SLOT_COMPUTED: u8 = 2;
pub(crate) const SLOT_COMPUTING: u8 = 4;

/// One dynamic slot: a field, a computed facet input, or a facet combiner.
pub(crate) enum DynSlot {
    Field(Arc<FieldInner>),
    Provider {
        provider: Arc<ProviderInner>,
        dep_doc: bool,
        dep_sel: bool,
        dep_addrs: Vec<usize>,
        multi: bool,
    },
    Combined {
        facet: Arc<FacetInner>,
        providers: Vec<Arc<ProviderInner>>,
        provider_addrs: Vec<usize>,
        provider_multi: Vec<bool>,
        dynamic_addrs: Vec<usize>,
    },
}

pub(crate) struct Configuration {
    pub(crate) base: Extension,
    pub(crate) compartments: Vec<(Compartment, Extension)>,
    pub(crate) dynamic_slots: Vec<DynSlot>,
    pub(crate) address: HashMap<u64, usize>,
    pub(crate) static_values: Vec<DynValue>,
    pub(crate) facets: BTreeMap<u64, Vec<Arc<ProviderInner>>>,
}

enum FlatItem {
    Provider(Arc<ProviderInner>),
    Field(Arc<FieldInner>),
}

struct Flattener<'a> {
    buckets: [Vec<(ExtKey, FlatItem)>; 5],
    seen: HashMap<ExtKey, u8>,
    compartments: &'a [(Compartment, Extension)],
    new_compartments: Vec<(Compartment, Extension)>,
}

impl<'a> Flattener<'a> {
    fn visit(&mut self, ext: &Extension, prec: u8) -> Result<(), StateError> {
        let key = ext_key(ext);
        if let Some(&known) = self.seen.get(&key) {
            if known <= prec {
                return Ok(());
            }
            // Re-encountered with higher precedence: pull the earlier
            // placement and re-insert below.
            if let Some(pos) = self.buckets[known as usize].iter().position(|(k, _)| *k == key) {
                self.buckets[known as usize].remove(pos);
            }
            if let Extension::Compartment(inst) = ext {
                let id = inst.compartment.id();
                self.new_compartments.retain(|(c, _)| c.id() != id);
            }
        }
        self.seen.insert(key, prec);
        match ext {
            Extension::List(items) => {
                for item in items.iter() {
                    self.visit(item, prec)?;
                }
            }
            Extension::Precedence(p, inner) => self.visit(inner, *p as u8)?,
            Extension::Compartment(inst) => {
                let id = inst.compartment.id();
                if self.new_compartments.iter().any(|(c, _)| c.id() == id) {
                    return Err(StateError::Configuration("duplicate use of compartment".into()));
                }
                let content = self
                    .compartments
                    .iter()
                    .find(|(c, _)| c.id() == id)
                    .map(|(_, e)| e.clone())
                    .unwrap_or_else(|| inst.inner.as_ref().clone());
                self.new_compartments.push((inst.compartment.clone(), content.clone()));
                self.visit(&content, prec)?;
            }
            Extension::Field(field) => {
                self.buckets[prec as usize].push((key, FlatItem::Field(field.clone())));
                if let Some(provides) = field.provides.get() {
                    self.visit(provides, prec)?;
                }
            }
            Extension::Provider(provider) => {
                self.buckets[prec as usize].push((key, FlatItem::Provider(provider.clone())));
                if let Some(enables) = &provider.facet.enables {
                    self.visit(enables, prec)?;
                }
            }
        }
        Ok(())
    }
}

fn same_providers(a: &[Arc<ProviderInner>], b: &[Arc<ProviderInner>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
}

impl Configuration {
    pub(crate) fn resolve(
        base: Extension,
        compartments: &[(Compartment, Extension)],
        old_state: Option<&EditorState>,
    ) -> Result<Configuration, StateError> {
        let mut flattener = Flattener {
            buckets: Default::default(),
            seen: HashMap::new(),
            compartments,
            new_compartments: Vec::new(),
        };
        flattener.visit(&base, Prec::Default as u8)?;

        let mut fields: Vec<Arc<FieldInner>> = Vec::new();
        let mut facets: BTreeMap<u64, Vec<Arc<ProviderInner>>> = BTreeMap::new();
        for bucket in &flattener.buckets {
            for (_, item) in bucket {
                match item {
                    FlatItem::Field(field) => fields.push(field.clone()),
                    FlatItem::Provider(provider) => {
                        facets.entry(provider.facet.id).or_default().push(provider.clone());
                    }
                }
            }
        }

        let mut address: HashMap<u64, usize> = HashMap::new();
        let mut static_values: Vec<DynValue> = Vec::new();
        // First pass: hand out addresses; slots are materialised once every
        // referenced id has one.
        enum Proto {
            Field(Arc<FieldInner>),
            Provider(Arc<ProviderInner>),
            Combined(Arc<FacetInner>, Vec<Arc<ProviderInner>>),
        }
        let mut protos: Vec<Proto> = Vec::new();

        for field in &fields {
            address.insert(field.id, protos.len() << 1);
            protos.push(Proto::Field(field.clone()));
        }

        let old_facets = old_state.map(|s| s.configuration().facets.clone());
        for (facet_id, providers) in &facets {
            let facet = providers[0].facet.clone();
            if providers.iter().all(|p| p.is_static()) {
                let values: Vec<DynValue> = providers
                    .iter()
                    .filter_map(|p| p.static_value().cloned())
                    .collect();
                if let Some(validate) = &facet.validate {
                    validate(&values).map_err(StateError::Configuration)?;
                }
                address.insert(*facet_id, (static_values.len() << 1) | 1);
                let old_providers =
                    old_facets.as_ref().and_then(|f| f.get(facet_id)).map(Vec::as_slice);
                let old_value = match (old_state, old_providers) {
                    (Some(old), Some(old_providers)) => {
                        if same_providers(old_providers, providers) {
                            Some(old.facet_dyn_computed(&facet))
                        } else {
                            None
                        }
                    }
                    _ => None,
                };
                let value = match old_value {
                    Some(value) => value,
                    None => {
                        let combined = (facet.combine)(&values);
                        match old_state {
                            Some(old) => {
                                let previous = old.facet_dyn_computed(&facet);
                                if (facet.compare)(&combined, &previous) {
                                    previous
                                } else {
                                    combined
                                }
                            }
                            None => combined,
                        }
                    }
                };
                static_values.push(value);
            } else {
                for provider in providers {
                    match provider.static_value() {
                        Some(value) => {
                            address.insert(provider.id, (static_values.len() << 1) | 1);
                            static_values.push(value.clone());
                        }
                        None => {
                            address.insert(provider.id, protos.len() << 1);
                            protos.push(Proto::Provider(provider.clone()));
                        }
                    }
                }
                address.insert(*facet_id, protos.len() << 1);
                protos.push(Proto::Combined(facet, providers.clone()));
            }
        }

        let dynamic_slots: Vec<DynSlot> = protos
            .into_iter()
            .map(|proto| match proto {
                Proto::Field(field) => DynSlot::Field(field),
                Proto::Provider(provider) => {
                    let (deps, multi) = match &provider.kind {
                        crate::facet::ProviderKind::Single { deps, .. } => (deps.as_slice(), false),
                        crate::facet::ProviderKind::Multi { deps, .. } => (deps.as_slice(), true),
                        crate::facet::ProviderKind::Static(_) => {
                            unreachable!("static providers got static addresses")
                        }
                    };
                    let mut dep_doc = false;
                    let mut dep_sel = false;
                    let mut dep_addrs = Vec::new();
                    for dep in deps {
                        match dep {
                            Dep::Doc => dep_doc = true,
                            Dep::Selection => dep_sel = true,
                            Dep::Field(id) | Dep::Facet(id) => {
                                if let Some(&addr) = address.get(id) {
                                    if addr & 1 == 0 {
                                        dep_addrs.push(addr);
                                    }
                                }
                            }
                        }
                    }
                    DynSlot::Provider { provider, dep_doc, dep_sel, dep_addrs, multi }
                }
                Proto::Combined(facet, providers) => {
                    let provider_addrs: Vec<usize> = providers
                        .iter()
                        .map(|p| address[&p.id])
                        .collect();
                    let provider_multi: Vec<bool> = providers
                        .iter()
                        .map(|p| matches!(p.kind, crate::facet::ProviderKind::Multi { .. }))
                        .collect();
                    let dynamic_addrs: Vec<usize> =
                        provider_addrs.iter().copied().filter(|a| a & 1 == 0).collect();
                    DynSlot::Combined { facet, providers, provider_addrs, provider_multi, dynamic_addrs }
                }
            })
            .collect();

        trace!(
            target: "state.config",
            fields = fields.len(),
            facets = facets.len(),
            slots = dynamic_slots.len(),
            statics = static_values.len(),
            "resolved"
        );

        Ok(Configuration {
            base,
            compartments: flattener.new_compartments,
            dynamic_slots,
            address,
            static_values,
            facets,
        })
    }

    pub(crate) fn addr_of(&self, id: u64) -> Option<usize> {
        self.address.get(&id).copied()
    }
}
