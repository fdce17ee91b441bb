//! Compiled code: artifacts, their lifecycle, the code cache that owns them, and the concurrent
//! root marking protocol the garbage collector uses on them.

mod artifact;
mod code_cache;
pub mod dependencies;
mod mark_link;
mod regions;
mod root_marking;

pub use self::artifact::{
    ArtifactIdentity, ArtifactState, CompileKind, CompiledArtifact, EntryPoints,
    ExceptionHandlerEntry, OopSlot,
};
pub use self::code_cache::{CodeCache, CodeCacheFull, CodeCacheStats};
pub use self::dependencies::{ClassId, Dependency, DependencyChange};
pub use self::mark_link::ClaimTag;
pub use self::regions::{CodeRegions, CodeRegionsBuilder, RegionError, RegionKind};
pub use self::root_marking::{OopsDoProcessor, RootMarking};
