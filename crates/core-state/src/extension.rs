//! The extension tree: the user-facing vocabulary for configuring a state.
//!
//! Extensions are nested lists of facet providers and fields, optionally
//! wrapped in precedence markers or compartments. The resolver (`config`)
//! flattens this tree into a fixed slot layout once per configuration.

use std::sync::Arc;

use crate::facet::ProviderInner;
use crate::field::FieldInner;
use crate::next_id;

/// Extension precedence. Within one level, order of appearance decides;
/// across levels, `Highest` sorts before `Lowest` regardless of nesting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Prec {
    Highest = 0,
    High = 1,
    Default = 2,
    Low = 3,
    Lowest = 4,
}

impl Prec {
    /// Wrap an extension so that everything inside it gets this precedence.
    pub fn of(self, ext: impl Into<Extension>) -> Extension {
        Extension::Precedence(self, Arc::new(ext.into()))
    }
}

/// An opaque key for a group of extensions that can be replaced atomically
/// through a reconfiguration effect, leaving the rest of the configuration
/// untouched.
#[derive(Debug, Clone)]
pub struct Compartment {
    id: u64,
}

impl Compartment {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Compartment {
        Compartment { id: next_id() }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Wrap content in this compartment.
    pub fn of(&self, ext: impl Into<Extension>) -> Extension {
        Extension::Compartment(Arc::new(CompartmentInstance {
            compartment: self.clone(),
            inner: Arc::new(ext.into()),
        }))
    }
}

impl PartialEq for Compartment {
    fn eq(&self, other: &Compartment) -> bool {
        self.id == other.id
    }
}

impl Eq for Compartment {}

/// A compartment applied to some content. Public only because it appears
/// inside [`Extension`]; not nameable downstream.
pub struct CompartmentInstance {
    pub(crate) compartment: Compartment,
    pub(crate) inner: Arc<Extension>,
}

/// A node in the extension tree.
#[derive(Clone)]
pub enum Extension {
    /// A sequence of extensions, in order.
    List(Arc<Vec<Extension>>),
    /// Content with an explicit precedence.
    Precedence(Prec, Arc<Extension>),
    /// Content owned by a compartment.
    Compartment(Arc<CompartmentInstance>),
    /// A facet provider (static value or computed input).
    Provider(Arc<ProviderInner>),
    /// A state field.
    Field(Arc<FieldInner>),
}

impl Extension {
    /// The empty extension.
    pub fn empty() -> Extension {
        Extension::List(Arc::new(Vec::new()))
    }
}

impl From<Vec<Extension>> for Extension {
    fn from(items: Vec<Extension>) -> Extension {
        Extension::List(Arc::new(items))
    }
}

impl std::fmt::Debug for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Extension::List(items) => f.debug_list().entries(items.iter()).finish(),
            Extension::Precedence(prec, inner) => {
                f.debug_tuple("Precedence").field(prec).field(inner).finish()
            }
            Extension::Compartment(inst) => {
                write!(f, "Compartment({})", inst.compartment.id)
            }
            Extension::Provider(p) => write!(f, "Provider({})", p.id),
            Extension::Field(field) => write!(f, "Field({})", field.id),
        }
    }
}

/// Identity of an extension node, used for de-duplication during
/// flattening. Wrapper nodes are identified by allocation, providers and
/// fields by their process-unique id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ExtKey {
    Ptr(usize),
    Id(u64),
}

pub(crate) fn ext_key(ext: &Extension) -> ExtKey {
    match ext {
        Extension::List(items) => ExtKey::Ptr(Arc::as_ptr(items) as usize),
        Extension::Precedence(_, inner) => ExtKey::Ptr(Arc::as_ptr(inner) as usize),
        Extension::Compartment(inst) => ExtKey::Ptr(Arc::as_ptr(inst) as usize),
        Extension::Provider(p) => ExtKey::Id(p.id),
        Extension::Field(field) => ExtKey::Id(field.id),
    }
}
