//! State fields: per-state typed values with explicit create/update logic.

use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use serde_json::Value;

use crate::error::StateError;
use crate::extension::Extension;
use crate::state::EditorState;
use crate::transaction::Transaction;
use crate::{next_id, DynValue};

type CreateFn = dyn Fn(&EditorState) -> DynValue + Send + Sync;
type UpdateFn = dyn Fn(&DynValue, &Transaction) -> DynValue + Send + Sync;
type CompareFn = dyn Fn(&DynValue, &DynValue) -> bool + Send + Sync;
type ToJsonFn = dyn Fn(&DynValue) -> Value + Send + Sync;
type FromJsonFn = dyn Fn(&Value) -> Result<DynValue, StateError> + Send + Sync;

/// Type-erased field descriptor. Public only because it appears inside
/// [`crate::Extension`]; not nameable downstream.
pub struct FieldInner {
    pub(crate) id: u64,
    pub(crate) create: Box<CreateFn>,
    pub(crate) update: Box<UpdateFn>,
    pub(crate) compare: Box<CompareFn>,
    // Filled in right after construction; `OnceLock` because the provide
    // callback needs a handle to the finished field.
    pub(crate) provides: OnceLock<Extension>,
    pub(crate) to_json: Option<Box<ToJsonFn>>,
    pub(crate) from_json: Option<Box<FromJsonFn>>,
}

/// Configuration for defining a field. Values flow through the slot
/// machinery as `Arc<V>`; an update that changes nothing should return its
/// input `Arc` unchanged, which is what the default comparison detects.
pub struct FieldConfig<V> {
    create: Arc<dyn Fn(&EditorState) -> V + Send + Sync>,
    update: Arc<dyn Fn(&Arc<V>, &Transaction) -> Arc<V> + Send + Sync>,
    compare: Option<Arc<dyn Fn(&V, &V) -> bool + Send + Sync>>,
    provide: Option<Box<dyn FnOnce(&StateField<V>) -> Extension>>,
    to_json: Option<Arc<dyn Fn(&V) -> Value + Send + Sync>>,
    from_json: Option<Arc<dyn Fn(&Value) -> Result<V, StateError> + Send + Sync>>,
}

impl<V> FieldConfig<V> {
    pub fn new(
        create: impl Fn(&EditorState) -> V + Send + Sync + 'static,
        update: impl Fn(&Arc<V>, &Transaction) -> Arc<V> + Send + Sync + 'static,
    ) -> FieldConfig<V> {
        FieldConfig {
            create: Arc::new(create),
            update: Arc::new(update),
            compare: None,
            provide: None,
            to_json: None,
            from_json: None,
        }
    }

    pub fn compare(mut self, f: impl Fn(&V, &V) -> bool + Send + Sync + 'static) -> Self {
        self.compare = Some(Arc::new(f));
        self
    }

    /// Extensions to enable whenever this field is part of a configuration,
    /// typically facet inputs derived from the field value.
    pub fn provide(mut self, f: impl FnOnce(&StateField<V>) -> Extension + 'static) -> Self {
        self.provide = Some(Box::new(f));
        self
    }

    pub fn json(
        mut self,
        to_json: impl Fn(&V) -> Value + Send + Sync + 'static,
        from_json: impl Fn(&Value) -> Result<V, StateError> + Send + Sync + 'static,
    ) -> Self {
        self.to_json = Some(Arc::new(to_json));
        self.from_json = Some(Arc::new(from_json));
        self
    }
}

/// A typed handle on a state field. Cloning shares the field identity.
pub struct StateField<V> {
    pub(crate) inner: Arc<FieldInner>,
    _type: PhantomData<fn() -> V>,
}

impl<V> Clone for StateField<V> {
    fn clone(&self) -> Self {
        StateField { inner: self.inner.clone(), _type: PhantomData }
    }
}

fn downcast_arc<V: Send + Sync + 'static>(value: &DynValue) -> Arc<V> {
    match value.clone().downcast::<V>() {
        Ok(typed) => typed,
        Err(_) => unreachable!("field slot carries the registered value type"),
    }
}

impl<V: Send + Sync + 'static> StateField<V> {
    pub fn define(config: FieldConfig<V>) -> StateField<V> {
        let create_typed = config.create;
        let update_typed = config.update;
        let create: Box<CreateFn> =
            Box::new(move |state| Arc::new(create_typed(state)) as DynValue);
        let update: Box<UpdateFn> = Box::new(move |value, tr| {
            let old = downcast_arc::<V>(value);
            let new: DynValue = update_typed(&old, tr);
            new
        });
        let compare: Box<CompareFn> = match config.compare {
            Some(f) => Box::new(move |a, b| f(&downcast_arc::<V>(a), &downcast_arc::<V>(b))),
            None => Box::new(|a, b| Arc::ptr_eq(a, b)),
        };
        let to_json = config.to_json.map(|f| {
            Box::new(move |value: &DynValue| f(&downcast_arc::<V>(value))) as Box<ToJsonFn>
        });
        let from_json = config.from_json.map(|f| {
            Box::new(move |json: &Value| f(json).map(|v| Arc::new(v) as DynValue))
                as Box<FromJsonFn>
        });
        let field = StateField {
            inner: Arc::new(FieldInner {
                id: next_id(),
                create,
                update,
                compare,
                provides: OnceLock::new(),
                to_json,
                from_json,
            }),
            _type: PhantomData,
        };
        if let Some(provide) = config.provide {
            let provided = provide(&field);
            let _ = field.inner.provides.set(provided);
        }
        field
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    /// The extension enabling this field.
    pub fn extension(&self) -> Extension {
        Extension::Field(self.inner.clone())
    }

    /// Like [`StateField::extension`], but overriding the create function —
    /// used to seed a field with externally-supplied content (for example
    /// when deserialising a state).
    pub fn init(&self, create: impl Fn(&EditorState) -> V + Send + Sync + 'static) -> Extension {
        derive_field(&self.inner, Box::new(move |state| Arc::new(create(state)) as DynValue))
    }

    pub(crate) fn read(&self, value: &DynValue) -> Arc<V> {
        downcast_arc(value)
    }
}

/// A type-erased field reference, used for naming fields in the JSON codec.
#[derive(Clone)]
pub struct FieldHandle {
    pub(crate) inner: Arc<FieldInner>,
}

impl<V> StateField<V> {
    pub fn handle(&self) -> FieldHandle {
        FieldHandle { inner: self.inner.clone() }
    }
}

/// A copy of `base` with a replacement create function, sharing the field's
/// identity and update logic.
fn derive_field(base: &Arc<FieldInner>, create: Box<CreateFn>) -> Extension {
    let update: Box<UpdateFn> = {
        let inner = base.clone();
        Box::new(move |value, tr| (inner.update)(value, tr))
    };
    let compare: Box<CompareFn> = {
        let inner = base.clone();
        Box::new(move |a, b| (inner.compare)(a, b))
    };
    let provides = OnceLock::new();
    if let Some(provided) = base.provides.get() {
        let _ = provides.set(provided.clone());
    }
    let to_json: Option<Box<ToJsonFn>> = base.to_json.as_ref().map(|_| {
        let inner = base.clone();
        Box::new(move |value: &DynValue| match &inner.to_json {
            Some(f) => f(value),
            None => unreachable!("codec presence checked above"),
        }) as Box<ToJsonFn>
    });
    let from_json: Option<Box<FromJsonFn>> = base.from_json.as_ref().map(|_| {
        let inner = base.clone();
        Box::new(move |json: &Value| match &inner.from_json {
            Some(f) => f(json),
            None => unreachable!("codec presence checked above"),
        }) as Box<FromJsonFn>
    });
    Extension::Field(Arc::new(FieldInner {
        id: base.id,
        create,
        update,
        compare,
        provides,
        to_json,
        from_json,
    }))
}

pub(crate) fn init_with_value(handle: &FieldHandle, value: DynValue) -> Extension {
    derive_field(&handle.inner, Box::new(move |_| value.clone()))
}
