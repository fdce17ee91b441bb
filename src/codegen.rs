//! The interface to code generators.  Code generation itself happens outside this crate: a
//! [`CodeGenerator`] turns a compile task into an [`ArtifactBlueprint`], and the broker turns the
//! blueprint into an installed artifact.

use crate::code::{CodeRegions, Dependency, EntryPoints, ExceptionHandlerEntry};
use crate::compiler::CompileTask;

/// Everything needed to construct an artifact, except its identity, which comes from the task.
pub struct ArtifactBlueprint {
    pub regions: CodeRegions,
    pub entry_points: EntryPoints,
    pub frame_size: usize,
    pub oops: Vec<usize>,
    pub metadata: Vec<usize>,
    pub dependencies: Vec<Dependency>,
    pub handler_table: Vec<ExceptionHandlerEntry>,
}

impl ArtifactBlueprint {
    /// A blueprint with no oops, metadata, dependencies or exception handlers.
    pub fn new(regions: CodeRegions, entry_points: EntryPoints, frame_size: usize) -> Self {
        ArtifactBlueprint {
            regions,
            entry_points,
            frame_size,
            oops: vec![],
            metadata: vec![],
            dependencies: vec![],
            handler_table: vec![],
        }
    }
}

/// Whether a method may be compiled again after a bailout.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Compilable {
    /// Retry is allowed.
    Yes,
    /// Never compile the method at this tier again.
    NotAtTier,
    /// Never compile the method at any tier again.
    Never,
}

pub enum CompilationResult {
    Success(ArtifactBlueprint),
    Bailout {
        reason: String,
        compilable: Compilable,
    },
}

impl CompilationResult {
    pub fn bailout(reason: impl Into<String>) -> Self {
        CompilationResult::Bailout {
            reason: reason.into(),
            compilable: Compilable::Yes,
        }
    }
}

/// A code generator serving one compiler tier.  Called concurrently from the tier's worker
/// threads.
pub trait CodeGenerator: Send + Sync {
    fn name(&self) -> &str;
    fn compile(&self, task: &CompileTask) -> CompilationResult;
}
