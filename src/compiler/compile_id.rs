use crate::code::CompileKind;
use std::sync::atomic::{AtomicU32, Ordering};

/// A compile id.  Unique within its sequence, starting at 1.
pub type CompileId = u32;

/// Hands out compile ids.  Standard, OSR and native-wrapper compiles share one sequence unless
/// configured to count separately.
pub struct CompileIdAllocator {
    standard: AtomicU32,
    osr: AtomicU32,
    native: AtomicU32,
    count_osr_separately: bool,
    count_native_separately: bool,
}

impl CompileIdAllocator {
    pub fn new(count_osr_separately: bool, count_native_separately: bool) -> Self {
        CompileIdAllocator {
            standard: AtomicU32::new(0),
            osr: AtomicU32::new(0),
            native: AtomicU32::new(0),
            count_osr_separately,
            count_native_separately,
        }
    }

    fn counter(&self, kind: CompileKind) -> &AtomicU32 {
        match kind {
            CompileKind::Osr if self.count_osr_separately => &self.osr,
            CompileKind::Native if self.count_native_separately => &self.native,
            _ => &self.standard,
        }
    }

    pub fn assign(&self, kind: CompileKind) -> CompileId {
        self.counter(kind).fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The last id assigned for `kind`, or 0 if none.
    pub fn last(&self, kind: CompileKind) -> CompileId {
        self.counter(kind).load(Ordering::Relaxed)
    }
}
