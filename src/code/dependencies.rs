//! Dependency records.  Compiled code is only valid while the assumptions it was compiled under
//! still hold; each assumption is recorded as a [`Dependency`] and checked against every
//! [`DependencyChange`] the runtime reports.

use crate::method::MethodId;
use std::fmt;

/// The identity of a class, unique within a runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(pub u64);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// An assumption compiled code relies on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// `class` has no subclasses.
    LeafType { class: ClassId },
    /// `method` is the only implementation of its selector reachable from `class`.
    UniqueConcreteMethod { class: ClassId, method: MethodId },
    /// The code inlined `method`, which must not be redefined.
    EvolMethod { method: MethodId },
    /// The code bound a call site to its current target.
    CallSiteTarget { call_site: u64 },
}

/// A change in the runtime that may invalidate dependencies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DependencyChange {
    /// A new class was loaded.  `supertypes` lists every superclass and interface of it.
    ClassLoaded {
        class: ClassId,
        supertypes: Vec<ClassId>,
    },
    /// A method was redefined.
    MethodRedefined { method: MethodId },
    /// The target of a call site changed.
    CallSiteTargetChanged { call_site: u64 },
}

impl Dependency {
    /// Is this dependency invalidated by `change`?
    pub fn is_invalidated_by(&self, change: &DependencyChange) -> bool {
        match (self, change) {
            (Dependency::LeafType { class }, DependencyChange::ClassLoaded { supertypes, .. })
            | (
                Dependency::UniqueConcreteMethod { class, .. },
                DependencyChange::ClassLoaded { supertypes, .. },
            ) => supertypes.contains(class),
            (
                Dependency::EvolMethod { method },
                DependencyChange::MethodRedefined { method: redefined },
            )
            | (
                Dependency::UniqueConcreteMethod { method, .. },
                DependencyChange::MethodRedefined { method: redefined },
            ) => method == redefined,
            (
                Dependency::CallSiteTarget { call_site },
                DependencyChange::CallSiteTargetChanged { call_site: changed },
            ) => call_site == changed,
            _ => false,
        }
    }
}
