use super::dependencies::{Dependency, DependencyChange};
use super::mark_link::MarkLink;
use super::regions::{CodeRegions, RegionError, RegionKind};
use crate::codegen::ArtifactBlueprint;
use crate::compiler::{CompLevel, CompileId};
use crate::method::MethodRef;
use atomic::Atomic;
use bytemuck::NoUninit;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use strum_macros::Display;

/// The lifecycle state of a compiled artifact.
///
/// States are ordered, and transitions only move forward:
/// `NotInstalled < InUse < NotUsed < NotEntrant`.
#[repr(i8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Display, NoUninit)]
pub enum ArtifactState {
    /// Constructed by a compiler thread, not yet published.
    NotInstalled = -1,
    /// Published.  Entry points are valid.
    InUse = 0,
    /// Never profitable.  Not used for new invocations.
    NotUsed = 1,
    /// Superseded.  Frames already executing it continue; new invocations do not enter.
    NotEntrant = 2,
}

/// What kind of compilation produced an artifact.  Each kind may have its own compile id
/// sequence.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum CompileKind {
    /// Normal method entry.
    Standard,
    /// On-stack replacement at a loop backedge.
    Osr,
    /// Wrapper for a native method.
    Native,
}

/// Entry point offsets, relative to the start of the instructions region.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EntryPoints {
    /// Entry for calls that still need a receiver type check.
    pub entry: usize,
    /// Entry after the receiver check.
    pub verified_entry: usize,
    /// Entry for on-stack replacement.  Only OSR artifacts have one.
    pub osr_entry: Option<usize>,
}

/// An embedded object reference.  The garbage collector may update it when objects move.
pub struct OopSlot(AtomicUsize);

impl OopSlot {
    pub fn new(value: usize) -> Self {
        OopSlot(AtomicUsize::new(value))
    }

    pub fn load(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    pub fn store(&self, value: usize) {
        self.0.store(value, Ordering::Relaxed)
    }

    pub fn is_null(&self) -> bool {
        self.load() == 0
    }
}

impl fmt::Debug for OopSlot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.load())
    }
}

/// A handler for exceptions raised at a return address in the instructions region.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExceptionHandlerEntry {
    pub pc_offset: usize,
    pub handler_offset: usize,
}

/// The identity of an artifact, taken from the compile task that produced it.
#[derive(Clone, Debug)]
pub struct ArtifactIdentity {
    pub compile_id: CompileId,
    pub method: MethodRef,
    pub comp_level: CompLevel,
    pub osr_bci: Option<u32>,
}

/// Compiled code for one method: instructions, metadata and lifecycle state.
///
/// Everything except the state, the GC epoch, the oop values and the mark link is immutable after
/// construction.  An installed artifact is owned by the [`CodeCache`](super::CodeCache).
pub struct CompiledArtifact {
    compile_id: CompileId,
    kind: CompileKind,
    method: MethodRef,
    entry_bci: Option<u32>,
    comp_level: CompLevel,
    frame_size: usize,
    regions: CodeRegions,
    entry_points: EntryPoints,
    oops: Box<[OopSlot]>,
    metadata: Box<[usize]>,
    dependencies: Box<[Dependency]>,
    handler_table: Box<[ExceptionHandlerEntry]>,
    state: Atomic<ArtifactState>,
    gc_epoch: AtomicU64,
    pub(super) mark_link: MarkLink,
    is_unlinked: AtomicBool,
}

impl CompiledArtifact {
    /// Construct a not-installed artifact.  Entry points are checked against the instructions
    /// region.
    pub fn new(identity: ArtifactIdentity, blueprint: ArtifactBlueprint) -> Result<Self, RegionError> {
        let ArtifactIdentity {
            compile_id,
            method,
            comp_level,
            osr_bci,
        } = identity;
        let ArtifactBlueprint {
            regions,
            entry_points,
            frame_size,
            oops,
            metadata,
            dependencies,
            handler_table,
        } = blueprint;

        regions.check_offset(RegionKind::Insts, entry_points.entry)?;
        regions.check_offset(RegionKind::Insts, entry_points.verified_entry)?;
        if let Some(osr_entry) = entry_points.osr_entry {
            regions.check_offset(RegionKind::Insts, osr_entry)?;
        }
        for handler in handler_table.iter() {
            regions.check_offset(RegionKind::Insts, handler.pc_offset)?;
        }
        if osr_bci.is_some() != entry_points.osr_entry.is_some() {
            return Err(RegionError::OsrEntryMismatch { osr_bci });
        }

        let kind = if method.is_native() {
            CompileKind::Native
        } else if osr_bci.is_some() {
            CompileKind::Osr
        } else {
            CompileKind::Standard
        };

        Ok(CompiledArtifact {
            compile_id,
            kind,
            method,
            entry_bci: osr_bci,
            comp_level,
            frame_size,
            regions,
            entry_points,
            oops: oops.into_iter().map(OopSlot::new).collect(),
            metadata: metadata.into_boxed_slice(),
            dependencies: dependencies.into_boxed_slice(),
            handler_table: handler_table.into_boxed_slice(),
            state: Atomic::new(ArtifactState::NotInstalled),
            gc_epoch: AtomicU64::new(0),
            mark_link: MarkLink::new(),
            is_unlinked: AtomicBool::new(false),
        })
    }

    pub fn compile_id(&self) -> CompileId {
        self.compile_id
    }

    pub fn kind(&self) -> CompileKind {
        self.kind
    }

    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    pub fn comp_level(&self) -> CompLevel {
        self.comp_level
    }

    pub fn is_osr_method(&self) -> bool {
        self.entry_bci.is_some()
    }

    pub fn osr_entry_bci(&self) -> Option<u32> {
        self.entry_bci
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn regions(&self) -> &CodeRegions {
        &self.regions
    }

    /// The size of the instructions.
    pub fn insts_size(&self) -> usize {
        self.regions.size(RegionKind::Insts)
    }

    /// The size the artifact occupies in the code cache.
    pub fn total_size(&self) -> usize {
        self.regions.total_size()
            + std::mem::size_of_val(&*self.oops)
            + std::mem::size_of_val(&*self.metadata)
            + std::mem::size_of_val(&*self.dependencies)
            + std::mem::size_of_val(&*self.handler_table)
    }

    pub fn entry_points(&self) -> EntryPoints {
        self.entry_points
    }

    /// The verified entry point, if new invocations may enter this artifact.
    pub fn verified_entry_point(&self) -> Option<usize> {
        self.is_in_use().then_some(self.entry_points.verified_entry)
    }

    /// The OSR entry point, if this is a usable OSR artifact.
    pub fn osr_entry_point(&self) -> Option<usize> {
        if self.is_in_use() {
            self.entry_points.osr_entry
        } else {
            None
        }
    }

    pub fn oops(&self) -> &[OopSlot] {
        &self.oops
    }

    /// Apply `f` to every embedded oop.
    pub fn oops_do<F: FnMut(&OopSlot)>(&self, mut f: F) {
        self.oops.iter().for_each(&mut f)
    }

    pub fn metadata(&self) -> &[usize] {
        &self.metadata
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn depends_on(&self, change: &DependencyChange) -> bool {
        self.dependencies.iter().any(|d| d.is_invalidated_by(change))
    }

    /// The handler for an exception at `pc_offset`, if any.
    pub fn handler_for_pc(&self, pc_offset: usize) -> Option<usize> {
        self.handler_table
            .iter()
            .find(|e| e.pc_offset == pc_offset)
            .map(|e| e.handler_offset)
    }

    pub fn state(&self) -> ArtifactState {
        self.state.load(Ordering::Acquire)
    }

    pub fn is_not_installed(&self) -> bool {
        self.state() == ArtifactState::NotInstalled
    }

    pub fn is_in_use(&self) -> bool {
        self.state() == ArtifactState::InUse
    }

    pub fn is_not_entrant(&self) -> bool {
        self.state() == ArtifactState::NotEntrant
    }

    /// Move the state forward to `new_state`.  Returns false if the state is already at or past
    /// `new_state`, i.e. another thread performed this transition or a later one.
    fn try_transition(&self, new_state: ArtifactState) -> bool {
        let mut old_state = self.state.load(Ordering::Acquire);
        loop {
            if old_state >= new_state {
                return false;
            }
            match self.state.compare_exchange_weak(
                old_state,
                new_state,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(witness) => old_state = witness,
            }
        }
    }

    /// Publish the artifact.  Returns true if this call performed the transition.
    pub fn make_in_use(&self) -> bool {
        self.try_transition(ArtifactState::InUse)
    }

    /// Stop new invocations from entering this artifact.  Frames already executing it are not
    /// affected.  Returns true if this thread changed the state, false if the artifact was
    /// already not entrant.
    pub fn make_not_entrant(&self) -> bool {
        self.make_not_entrant_or_not_used(ArtifactState::NotEntrant)
    }

    /// Like [`make_not_entrant`](Self::make_not_entrant), for code that was never profitable.
    pub fn make_not_used(&self) -> bool {
        self.make_not_entrant_or_not_used(ArtifactState::NotUsed)
    }

    fn make_not_entrant_or_not_used(&self, new_state: ArtifactState) -> bool {
        debug_assert!(
            new_state == ArtifactState::NotEntrant || new_state == ArtifactState::NotUsed
        );
        // Fast path for the common race: someone else got here first.
        if self.state() >= new_state {
            return false;
        }
        if !self.try_transition(new_state) {
            return false;
        }
        self.unlink_from_method();
        if new_state == ArtifactState::NotEntrant {
            self.method.inc_decompile_count();
        }
        debug!("Made {} {}", self, new_state);
        true
    }

    /// Remove this artifact from its method, so method lookups no longer find it.
    fn unlink_from_method(&self) {
        if self.is_osr_method() {
            self.method.remove_osr_artifact(self);
        } else {
            self.method.clear_code_if(self);
        }
    }

    /// Unlink a dead artifact.  The artifact stops being entrant and is detached from its method;
    /// its memory is reclaimed when the code cache purges it.  Returns true if this call unlinked
    /// it.
    pub fn unlink(&self) -> bool {
        if self.is_unlinked.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.try_transition(ArtifactState::NotEntrant);
        self.unlink_from_method();
        trace!("Unlinked {}", self);
        true
    }

    pub fn is_unlinked(&self) -> bool {
        self.is_unlinked.load(Ordering::Acquire)
    }

    /// Record that a stack walk found this artifact on a stack during GC epoch `epoch`.
    pub fn mark_as_maybe_on_stack(&self, epoch: u64) {
        self.gc_epoch.store(epoch, Ordering::Release);
    }

    /// May a thread still be executing this artifact?  `previous_completed_epoch` is the epoch of
    /// the last completed GC marking cycle.
    pub fn is_maybe_on_stack(&self, previous_completed_epoch: u64) -> bool {
        self.gc_epoch.load(Ordering::Acquire) >= previous_completed_epoch
    }

    pub fn gc_epoch(&self) -> u64 {
        self.gc_epoch.load(Ordering::Acquire)
    }
}

impl fmt::Display for CompiledArtifact {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:>6} {} {}",
            self.compile_id, self.comp_level as u8, self.method
        )?;
        if let Some(bci) = self.entry_bci {
            write!(f, " @ {}", bci)?;
        }
        match self.kind {
            CompileKind::Osr => write!(f, " (osr)")?,
            CompileKind::Native => write!(f, " (native)")?,
            CompileKind::Standard => {}
        }
        Ok(())
    }
}

impl fmt::Debug for CompiledArtifact {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CompiledArtifact")
            .field("compile_id", &self.compile_id)
            .field("kind", &self.kind)
            .field("method", &self.method.name())
            .field("comp_level", &self.comp_level)
            .field("state", &self.state())
            .field("regions", &self.regions)
            .finish()
    }
}

impl Drop for CompiledArtifact {
    fn drop(&mut self) {
        debug_assert!(
            self.mark_link.load().is_unclaimed(),
            "Artifact {} freed while on the marked list",
            self.compile_id
        );
        trace!("Freed artifact {}", self.compile_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{Method, MethodId};
    use crate::util::test_util::fixtures::{blueprint, osr_blueprint};
    use std::sync::Arc;

    fn artifact(level: CompLevel) -> Arc<CompiledArtifact> {
        let method = Method::new(MethodId(1), "Foo.bar", 32);
        Arc::new(
            CompiledArtifact::new(
                ArtifactIdentity {
                    compile_id: 1,
                    method,
                    comp_level: level,
                    osr_bci: None,
                },
                blueprint(64),
            )
            .unwrap(),
        )
    }

    #[test]
    fn transitions_are_monotone() {
        let a = artifact(CompLevel::FullOptimization);
        assert!(a.is_not_installed());
        assert!(a.verified_entry_point().is_none());
        assert!(a.make_in_use());
        assert!(!a.make_in_use());
        assert!(a.verified_entry_point().is_some());
        assert!(a.make_not_entrant());
        assert!(a.is_not_entrant());
        // Already not entrant: a second request fails and leaves the state alone.
        assert!(!a.make_not_entrant());
        assert!(!a.make_not_used());
        assert!(!a.make_in_use());
        assert_eq!(a.state(), ArtifactState::NotEntrant);
        assert!(a.verified_entry_point().is_none());
        assert_eq!(a.method().decompile_count(), 1);
    }

    #[test]
    fn not_used_can_still_become_not_entrant() {
        let a = artifact(CompLevel::Simple);
        a.make_in_use();
        assert!(a.make_not_used());
        assert_eq!(a.state(), ArtifactState::NotUsed);
        assert!(a.make_not_entrant());
        assert_eq!(a.state(), ArtifactState::NotEntrant);
    }

    #[test]
    fn concurrent_make_not_entrant_has_one_winner() {
        for _ in 0..100 {
            let a = artifact(CompLevel::FullOptimization);
            a.make_in_use();
            let winners: usize = std::thread::scope(|s| {
                let handles: Vec<_> = (0..2).map(|_| s.spawn(|| a.make_not_entrant())).collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap() as usize)
                    .sum()
            });
            assert_eq!(winners, 1);
            assert!(a.is_not_entrant());
        }
    }

    #[test]
    fn not_entrant_detaches_from_method() {
        let a = artifact(CompLevel::FullOptimization);
        a.make_in_use();
        assert!(a.method().replace_code(&a).is_none());
        assert!(Arc::ptr_eq(&a.method().code().unwrap(), &a));
        a.make_not_entrant();
        assert!(a.method().code().is_none());
    }

    #[test]
    fn osr_artifact_leaves_osr_chain() {
        let method = Method::new(MethodId(2), "Foo.loop", 100);
        let a = Arc::new(
            CompiledArtifact::new(
                ArtifactIdentity {
                    compile_id: 2,
                    method: method.clone(),
                    comp_level: CompLevel::FullOptimization,
                    osr_bci: Some(12),
                },
                osr_blueprint(64),
            )
            .unwrap(),
        );
        assert_eq!(a.kind(), CompileKind::Osr);
        a.make_in_use();
        method.add_osr_artifact(&a);
        assert!(method
            .osr_code_at(12, CompLevel::Simple)
            .is_some_and(|found| Arc::ptr_eq(&found, &a)));
        assert!(method.osr_code_at(13, CompLevel::Simple).is_none());
        assert!(a.unlink());
        assert!(!a.unlink());
        assert!(method.osr_code_at(12, CompLevel::Simple).is_none());
        assert!(a.osr_entry_point().is_none());
    }

    #[test]
    fn entry_points_are_checked() {
        let method = Method::new(MethodId(3), "Foo.bad", 1);
        let mut bp = blueprint(16);
        bp.entry_points.verified_entry = 16;
        let result = CompiledArtifact::new(
            ArtifactIdentity {
                compile_id: 3,
                method,
                comp_level: CompLevel::Simple,
                osr_bci: None,
            },
            bp,
        );
        assert!(matches!(result, Err(RegionError::OutOfBounds { .. })));
    }

    #[test]
    fn osr_entry_must_match_osr_bci() {
        let method = Method::new(MethodId(4), "Foo.mixed", 8);
        let identity = |osr_bci| ArtifactIdentity {
            compile_id: 4,
            method: method.clone(),
            comp_level: CompLevel::Simple,
            osr_bci,
        };
        assert_eq!(
            CompiledArtifact::new(identity(None), osr_blueprint(16)).err(),
            Some(RegionError::OsrEntryMismatch { osr_bci: None })
        );
        assert_eq!(
            CompiledArtifact::new(identity(Some(3)), blueprint(16)).err(),
            Some(RegionError::OsrEntryMismatch { osr_bci: Some(3) })
        );
    }

    #[test]
    fn on_stack_epochs() {
        let a = artifact(CompLevel::Simple);
        a.mark_as_maybe_on_stack(5);
        assert!(a.is_maybe_on_stack(5));
        assert!(a.is_maybe_on_stack(4));
        assert!(!a.is_maybe_on_stack(6));
    }
}
