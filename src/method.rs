//! Managed methods, as seen by the compilation layer.
//!
//! A method is loaded and owned by the runtime.  It points to its current compiled artifact and
//! to its OSR artifacts, but those references are weak: the code cache owns every artifact, and
//! a method may outlive several generations of compiled code.

use crate::code::CompiledArtifact;
use crate::compiler::{CompLevel, CompilerTier};
use enum_map::EnumMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// A method shared between the runtime, compile tasks and compiled artifacts.
pub type MethodRef = Arc<Method>;

/// The identity of a method, unique within a runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodId(pub u64);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct Method {
    id: MethodId,
    name: String,
    bytecode_size: usize,
    is_native: bool,
    /// The current standard-entry code.  Cleared when that code is made not entrant.
    code: spin::Mutex<Weak<CompiledArtifact>>,
    /// OSR artifacts of this method, newest first.
    osr_chain: spin::Mutex<Vec<Weak<CompiledArtifact>>>,
    not_compilable: EnumMap<CompilerTier, AtomicBool>,
    decompile_count: AtomicUsize,
}

impl Method {
    pub fn new(id: MethodId, name: impl Into<String>, bytecode_size: usize) -> MethodRef {
        Arc::new(Self::build(id, name.into(), bytecode_size, false))
    }

    /// A native method.  Its compiled code is a native wrapper.
    pub fn new_native(id: MethodId, name: impl Into<String>) -> MethodRef {
        Arc::new(Self::build(id, name.into(), 0, true))
    }

    fn build(id: MethodId, name: String, bytecode_size: usize, is_native: bool) -> Self {
        Method {
            id,
            name,
            bytecode_size,
            is_native,
            code: spin::Mutex::new(Weak::new()),
            osr_chain: spin::Mutex::new(Vec::new()),
            not_compilable: EnumMap::default(),
            decompile_count: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> MethodId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytecode_size(&self) -> usize {
        self.bytecode_size
    }

    pub fn is_native(&self) -> bool {
        self.is_native
    }

    /// The current standard-entry code of this method, if it is still alive.
    pub fn code(&self) -> Option<Arc<CompiledArtifact>> {
        self.code.lock().upgrade()
    }

    /// Make `artifact` the current code and return the code it replaced, if that is still alive.
    /// The swap happens under one lock, so of several racing installers each sees a different
    /// predecessor.
    pub(crate) fn replace_code(
        &self,
        artifact: &Arc<CompiledArtifact>,
    ) -> Option<Arc<CompiledArtifact>> {
        debug_assert!(!artifact.is_osr_method());
        let old = std::mem::replace(&mut *self.code.lock(), Arc::downgrade(artifact));
        old.upgrade()
    }

    /// Clear the current code if it is `artifact`.  Return true if it was cleared.
    pub(crate) fn clear_code_if(&self, artifact: &CompiledArtifact) -> bool {
        let mut code = self.code.lock();
        if std::ptr::eq(code.as_ptr(), artifact) {
            *code = Weak::new();
            true
        } else {
            false
        }
    }

    pub(crate) fn add_osr_artifact(&self, artifact: &Arc<CompiledArtifact>) {
        debug_assert!(artifact.is_osr_method());
        let mut chain = self.osr_chain.lock();
        chain.retain(|w| w.strong_count() > 0);
        chain.insert(0, Arc::downgrade(artifact));
    }

    /// Remove `artifact` from the OSR chain.  Return true if it was found.
    pub(crate) fn remove_osr_artifact(&self, artifact: &CompiledArtifact) -> bool {
        let mut chain = self.osr_chain.lock();
        let mut found = false;
        chain.retain(|w| {
            if std::ptr::eq(w.as_ptr(), artifact) {
                found = true;
                return false;
            }
            w.strong_count() > 0
        });
        found
    }

    /// Snapshot of the live OSR artifacts, newest first.
    pub fn osr_artifacts(&self) -> Vec<Arc<CompiledArtifact>> {
        self.osr_chain
            .lock()
            .iter()
            .filter_map(|w| w.upgrade())
            .collect()
    }

    /// The best usable OSR artifact entering at `bci` with a level of at least `min_level`.
    pub fn osr_code_at(&self, bci: u32, min_level: CompLevel) -> Option<Arc<CompiledArtifact>> {
        self.osr_artifacts()
            .into_iter()
            .filter(|a| a.osr_entry_bci() == Some(bci) && a.is_in_use() && a.comp_level() >= min_level)
            .max_by_key(|a| a.comp_level())
    }

    pub fn is_not_compilable(&self, tier: CompilerTier) -> bool {
        self.not_compilable[tier].load(Ordering::Relaxed)
    }

    pub fn set_not_compilable(&self, tier: CompilerTier) {
        if !self.not_compilable[tier].swap(true, Ordering::Relaxed) {
            debug!("{} is not compilable at tier {}", self, tier);
        }
    }

    /// Mark this method as not compilable by any tier.
    pub fn set_not_compilable_all(&self) {
        for (tier, _) in self.not_compilable.iter() {
            self.set_not_compilable(tier);
        }
    }

    pub(crate) fn inc_decompile_count(&self) -> usize {
        self.decompile_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// How many times compiled code of this method has been made not entrant.
    pub fn decompile_count(&self) -> usize {
        self.decompile_count.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.name, self.id)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Method")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("bytecode_size", &self.bytecode_size)
            .field("is_native", &self.is_native)
            .finish()
    }
}
