//! Transaction metadata: annotations and state effects.
//!
//! Annotations describe a transaction as a whole (timestamp, user-event
//! tag); effects are typed payloads that flow into field update logic and
//! can be remapped through a change description.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::change::ChangeDesc;
use crate::{next_id, DynValue};

/// Defines a kind of annotation. Create one with
/// [`AnnotationType::define`] and attach values with `of`.
pub struct AnnotationType<T> {
    id: u64,
    _type: PhantomData<fn() -> T>,
}

impl<T> Clone for AnnotationType<T> {
    fn clone(&self) -> Self {
        AnnotationType { id: self.id, _type: PhantomData }
    }
}

impl<T: Send + Sync + 'static> AnnotationType<T> {
    pub fn define() -> AnnotationType<T> {
        AnnotationType { id: next_id(), _type: PhantomData }
    }

    pub fn of(&self, value: T) -> Annotation {
        Annotation { id: self.id, value: Arc::new(value) as DynValue }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

/// An annotation value attached to a transaction.
#[derive(Clone)]
pub struct Annotation {
    id: u64,
    value: DynValue,
}

impl Annotation {
    pub fn is<T: Send + Sync + 'static>(&self, ty: &AnnotationType<T>) -> bool {
        self.id == ty.id
    }

    pub fn value<T: Send + Sync + 'static>(&self, ty: &AnnotationType<T>) -> Option<Arc<T>> {
        if self.id != ty.id {
            return None;
        }
        self.value.clone().downcast::<T>().ok()
    }
}

type MapFn = dyn Fn(&DynValue, &ChangeDesc) -> Option<DynValue> + Send + Sync;

pub(crate) struct EffectTypeInner {
    pub(crate) id: u64,
    pub(crate) map: Box<MapFn>,
}

/// Defines a kind of state effect.
pub struct StateEffectType<T> {
    pub(crate) inner: Arc<EffectTypeInner>,
    _type: PhantomData<fn() -> T>,
}

impl<T> Clone for StateEffectType<T> {
    fn clone(&self) -> Self {
        StateEffectType { inner: self.inner.clone(), _type: PhantomData }
    }
}

impl<T: Send + Sync + 'static> StateEffectType<T> {
    /// An effect type whose values don't contain positions and survive
    /// mapping unchanged.
    pub fn define() -> StateEffectType<T> {
        StateEffectType {
            inner: Arc::new(EffectTypeInner {
                id: next_id(),
                map: Box::new(|value, _| Some(value.clone())),
            }),
            _type: PhantomData,
        }
    }

    /// An effect type carrying positions. `map` remaps a value through a
    /// change; returning `None` drops the effect.
    pub fn define_mapped(
        map: impl Fn(&T, &ChangeDesc) -> Option<T> + Send + Sync + 'static,
    ) -> StateEffectType<T> {
        StateEffectType {
            inner: Arc::new(EffectTypeInner {
                id: next_id(),
                map: Box::new(move |value, mapping| {
                    let typed = value.downcast_ref::<T>()?;
                    map(typed, mapping).map(|v| Arc::new(v) as DynValue)
                }),
            }),
            _type: PhantomData,
        }
    }

    pub fn of(&self, value: T) -> StateEffect {
        StateEffect { ty: self.inner.clone(), value: Arc::new(value) as DynValue }
    }
}

/// A state effect instance carried by a transaction.
#[derive(Clone)]
pub struct StateEffect {
    pub(crate) ty: Arc<EffectTypeInner>,
    pub(crate) value: DynValue,
}

impl StateEffect {
    pub fn is<T>(&self, ty: &StateEffectType<T>) -> bool {
        Arc::ptr_eq(&self.ty, &ty.inner)
    }

    /// The payload, when this effect has the given type.
    pub fn value<T: Send + Sync + 'static>(&self, ty: &StateEffectType<T>) -> Option<Arc<T>> {
        if !self.is(ty) {
            return None;
        }
        self.value.clone().downcast::<T>().ok()
    }

    /// Remap through a change description. `None` means the effect was
    /// dropped by its mapping function.
    pub fn map(&self, mapping: &ChangeDesc) -> Option<StateEffect> {
        (self.ty.map)(&self.value, mapping)
            .map(|value| StateEffect { ty: self.ty.clone(), value })
    }

    /// Map a list of effects, dropping the ones whose mapping declines.
    pub fn map_effects(effects: &[StateEffect], mapping: &ChangeDesc) -> Vec<StateEffect> {
        if mapping.is_empty() {
            return effects.to_vec();
        }
        effects.iter().filter_map(|e| e.map(mapping)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeSet, ChangeSpec};

    #[test]
    fn annotation_round_trip() {
        let ty = AnnotationType::<String>::define();
        let ann = ty.of("hello".to_string());
        assert!(ann.is(&ty));
        assert_eq!(ann.value(&ty).unwrap().as_str(), "hello");
        let other = AnnotationType::<String>::define();
        assert!(ann.value(&other).is_none());
    }

    #[test]
    fn effect_mapping_follows_changes() {
        let ty = StateEffectType::<usize>::define_mapped(|pos, mapping| {
            mapping.map_pos_mode(*pos, -1, crate::change::MapMode::TrackDel).ok().flatten()
        });
        let effect = ty.of(5);
        let insert = ChangeSet::of(&ChangeSpec::insert(0, core_text::Text::from("ab")), 8).unwrap();
        let mapped = effect.map(&insert.desc()).unwrap();
        assert_eq!(*mapped.value(&ty).unwrap(), 7);
        let del = ChangeSet::of(&ChangeSpec::delete(4, 6), 8).unwrap();
        assert!(effect.map(&del.desc()).is_none());
    }

    #[test]
    fn unmapped_effects_pass_through() {
        let ty = StateEffectType::<&'static str>::define();
        let effect = ty.of("payload");
        let del = ChangeSet::of(&ChangeSpec::delete(0, 3), 5).unwrap();
        let mapped = effect.map(&del.desc()).unwrap();
        assert_eq!(*mapped.value(&ty).unwrap(), "payload");
    }
}
