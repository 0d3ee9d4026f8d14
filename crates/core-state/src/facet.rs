//! Facets: labelled aggregation points that combine inputs from any number
//! of extensions into a single output value per state.
//!
//! A `Facet<I, O>` is a typed handle around a type-erased descriptor. Inputs
//! and outputs cross the slot machinery as `Arc<dyn Any>`; the handle's
//! phantom types make reads and provider registration statically safe.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::extension::Extension;
use crate::field::StateField;
use crate::state::EditorState;
use crate::{next_id, DynValue};

/// A dependency a computed facet input declares, controlling when it is
/// recomputed.
#[derive(Debug, Clone)]
pub enum Dep {
    /// Recompute when the document changes.
    Doc,
    /// Recompute when the selection (or the document) changes.
    Selection,
    /// Recompute when the given field changes.
    Field(u64),
    /// Recompute when the given facet output changes.
    Facet(u64),
}

impl Dep {
    pub fn field<V: Send + Sync + 'static>(field: &StateField<V>) -> Dep {
        Dep::Field(field.id())
    }

    pub fn facet<I: Send + Sync + 'static, O: Send + Sync + 'static>(facet: &Facet<I, O>) -> Dep {
        Dep::Facet(facet.id())
    }
}

type CombineFn = dyn Fn(&[DynValue]) -> DynValue + Send + Sync;
type CompareFn = dyn Fn(&DynValue, &DynValue) -> bool + Send + Sync;
type ValidateFn = dyn Fn(&[DynValue]) -> Result<(), String> + Send + Sync;

pub(crate) struct FacetInner {
    pub(crate) id: u64,
    pub(crate) combine: Box<CombineFn>,
    pub(crate) compare: Box<CompareFn>,
    pub(crate) compare_input: Box<CompareFn>,
    pub(crate) is_static: bool,
    pub(crate) enables: Option<Extension>,
    pub(crate) validate: Option<Box<ValidateFn>>,
    pub(crate) default: DynValue,
}

/// Configuration for defining a facet. Only `combine` is required.
pub struct FacetConfig<I, O> {
    combine: Arc<dyn Fn(&[&I]) -> O + Send + Sync>,
    compare: Option<Arc<dyn Fn(&O, &O) -> bool + Send + Sync>>,
    compare_input: Option<Arc<dyn Fn(&I, &I) -> bool + Send + Sync>>,
    is_static: bool,
    enables: Option<Extension>,
    validate: Option<Arc<dyn Fn(&[&I]) -> Result<(), String> + Send + Sync>>,
}

impl<I, O> FacetConfig<I, O> {
    pub fn new(combine: impl Fn(&[&I]) -> O + Send + Sync + 'static) -> FacetConfig<I, O> {
        FacetConfig {
            combine: Arc::new(combine),
            compare: None,
            compare_input: None,
            is_static: false,
            enables: None,
            validate: None,
        }
    }

    /// How to compare two outputs. Defaults to allocation identity, so give
    /// one for value-semantics outputs to avoid spurious recomputation
    /// downstream.
    pub fn compare(mut self, f: impl Fn(&O, &O) -> bool + Send + Sync + 'static) -> Self {
        self.compare = Some(Arc::new(f));
        self
    }

    pub fn compare_input(mut self, f: impl Fn(&I, &I) -> bool + Send + Sync + 'static) -> Self {
        self.compare_input = Some(Arc::new(f));
        self
    }

    /// Forbid dynamic (computed) inputs for this facet.
    pub fn static_only(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Extensions that are active whenever this facet is provided.
    pub fn enables(mut self, ext: Extension) -> Self {
        self.enables = Some(ext);
        self
    }

    /// Validate the full static input list at resolve time. Returning an
    /// error fails state construction with a `Configuration` error.
    pub fn validate(
        mut self,
        f: impl Fn(&[&I]) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validate = Some(Arc::new(f));
        self
    }
}

/// A typed facet handle. Cloning shares the same facet identity.
pub struct Facet<I, O> {
    pub(crate) inner: Arc<FacetInner>,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Facet<I, O> {
    fn clone(&self) -> Self {
        Facet { inner: self.inner.clone(), _types: PhantomData }
    }
}

fn downcast_slice<I: Send + Sync + 'static>(values: &[DynValue]) -> Vec<&I> {
    values
        .iter()
        .map(|v| match v.downcast_ref::<I>() {
            Some(value) => value,
            None => unreachable!("facet input carries the registered type"),
        })
        .collect()
}

impl<I: Send + Sync + 'static, O: Send + Sync + 'static> Facet<I, O> {
    pub fn define(config: FacetConfig<I, O>) -> Facet<I, O> {
        let combine_typed = config.combine;
        let combine: Box<CombineFn> = Box::new(move |values| {
            let typed = downcast_slice::<I>(values);
            Arc::new(combine_typed(&typed)) as DynValue
        });
        let compare: Box<CompareFn> = match config.compare {
            Some(f) => Box::new(move |a, b| match (a.downcast_ref::<O>(), b.downcast_ref::<O>()) {
                (Some(a), Some(b)) => f(a, b),
                _ => false,
            }),
            None => Box::new(|a, b| Arc::ptr_eq(a, b)),
        };
        let compare_input: Box<CompareFn> = match config.compare_input {
            Some(f) => Box::new(move |a, b| match (a.downcast_ref::<I>(), b.downcast_ref::<I>()) {
                (Some(a), Some(b)) => f(a, b),
                _ => false,
            }),
            None => Box::new(|a, b| Arc::ptr_eq(a, b)),
        };
        let validate: Option<Box<ValidateFn>> = config.validate.map(|f| {
            Box::new(move |values: &[DynValue]| f(&downcast_slice::<I>(values))) as Box<ValidateFn>
        });
        let default = combine(&[]);
        Facet {
            inner: Arc::new(FacetInner {
                id: next_id(),
                combine,
                compare,
                compare_input,
                is_static: config.is_static,
                enables: config.enables,
                validate,
                default,
            }),
            _types: PhantomData,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    /// Provide a constant input value.
    pub fn of(&self, value: I) -> Extension {
        Extension::Provider(Arc::new(ProviderInner {
            id: next_id(),
            facet: self.inner.clone(),
            kind: ProviderKind::Static(Arc::new(value) as DynValue),
        }))
    }

    /// Provide an input computed from the state, recomputed when any of the
    /// declared dependencies change.
    pub fn compute(
        &self,
        deps: Vec<Dep>,
        get: impl Fn(&EditorState) -> I + Send + Sync + 'static,
    ) -> Extension {
        assert!(!self.inner.is_static, "can't compute a static facet");
        Extension::Provider(Arc::new(ProviderInner {
            id: next_id(),
            facet: self.inner.clone(),
            kind: ProviderKind::Single {
                deps,
                get: Box::new(move |state| Arc::new(get(state)) as DynValue),
            },
        }))
    }

    /// Like [`Facet::compute`], contributing any number of input values.
    pub fn compute_n(
        &self,
        deps: Vec<Dep>,
        get: impl Fn(&EditorState) -> Vec<I> + Send + Sync + 'static,
    ) -> Extension {
        assert!(!self.inner.is_static, "can't compute a static facet");
        Extension::Provider(Arc::new(ProviderInner {
            id: next_id(),
            facet: self.inner.clone(),
            kind: ProviderKind::Multi {
                deps,
                get: Box::new(move |state| {
                    get(state).into_iter().map(|v| Arc::new(v) as DynValue).collect()
                }),
            },
        }))
    }

    /// Provide an input derived from a state field.
    pub fn from_field<V: Send + Sync + 'static>(
        &self,
        field: &StateField<V>,
        get: impl Fn(&V) -> I + Send + Sync + 'static,
    ) -> Extension {
        let field = field.clone();
        let dep = Dep::field(&field);
        self.compute(vec![dep], move |state| get(&state.field(&field)))
    }

    pub(crate) fn read(&self, value: DynValue) -> Arc<O> {
        match value.downcast::<O>() {
            Ok(typed) => typed,
            Err(_) => unreachable!("facet slot carries the registered output type"),
        }
    }

    pub(crate) fn default_value(&self) -> DynValue {
        self.inner.default.clone()
    }
}

pub(crate) enum ProviderKind {
    Static(DynValue),
    Single {
        deps: Vec<Dep>,
        get: Box<dyn Fn(&EditorState) -> DynValue + Send + Sync>,
    },
    Multi {
        deps: Vec<Dep>,
        get: Box<dyn Fn(&EditorState) -> Vec<DynValue> + Send + Sync>,
    },
}

/// Type-erased facet provider, as stored in the extension tree. Public
/// only because it appears inside [`Extension`]; not nameable downstream.
pub struct ProviderInner {
    pub(crate) id: u64,
    pub(crate) facet: Arc<FacetInner>,
    pub(crate) kind: ProviderKind,
}

impl ProviderInner {
    pub(crate) fn is_static(&self) -> bool {
        matches!(self.kind, ProviderKind::Static(_))
    }

    pub(crate) fn static_value(&self) -> Option<&DynValue> {
        match &self.kind {
            ProviderKind::Static(value) => Some(value),
            _ => None,
        }
    }
}
