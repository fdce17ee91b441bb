use super::artifact::{ArtifactState, CompileKind, CompiledArtifact};
use super::dependencies::DependencyChange;
use super::root_marking::{OopsDoProcessor, RootMarking};
use crate::compiler::{CompLevel, CompileId};
use crate::method::Method;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// The code cache has no room for an artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeCacheFull {
    pub requested: usize,
    pub unallocated: usize,
}

impl fmt::Display for CodeCacheFull {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "code cache is full: requested {} bytes, {} bytes unallocated",
            self.requested, self.unallocated
        )
    }
}

impl std::error::Error for CodeCacheFull {}

/// Counters of the code cache.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodeCacheStats {
    pub installed: usize,
    pub unloaded: usize,
    pub purged: usize,
    pub full_count: usize,
}

type ArtifactKey = (CompileKind, CompileId);

/// The registry of installed artifacts.
///
/// The code cache owns every installed artifact.  Methods only hold weak references, so an
/// artifact lives until it is unlinked and purged, and until the last task outcome referring to it
/// is dropped.
pub struct CodeCache {
    artifacts: Mutex<HashMap<ArtifactKey, Arc<CompiledArtifact>>>,
    capacity: usize,
    used: AtomicUsize,
    root_marking: RootMarking,
    /// Even while no marking cycle is active, odd during a cycle.
    gc_epoch: AtomicU64,
    installed_count: AtomicUsize,
    unloaded_count: AtomicUsize,
    purged_count: AtomicUsize,
    full_count: AtomicUsize,
}

impl CodeCache {
    pub fn new(capacity: usize) -> Self {
        CodeCache {
            artifacts: Mutex::new(HashMap::new()),
            capacity,
            used: AtomicUsize::new(0),
            root_marking: RootMarking::new(),
            gc_epoch: AtomicU64::new(2),
            installed_count: AtomicUsize::new(0),
            unloaded_count: AtomicUsize::new(0),
            purged_count: AtomicUsize::new(0),
            full_count: AtomicUsize::new(0),
        }
    }

    /// Register `artifact`, make it in use, and publish it to its method.  Standard code
    /// replaces the method's current code, which becomes not used.  OSR code goes to the head of
    /// the method's OSR chain, and OSR code of lower levels at the same bci becomes not entrant.
    pub fn install(&self, artifact: CompiledArtifact) -> Result<Arc<CompiledArtifact>, CodeCacheFull> {
        assert!(
            artifact.is_not_installed(),
            "Artifact {} is already installed",
            artifact
        );
        let size = artifact.total_size();
        let artifact = {
            let mut artifacts = self.artifacts.lock().unwrap();
            let used = self.used.load(Ordering::Relaxed);
            if used + size > self.capacity {
                self.full_count.fetch_add(1, Ordering::Relaxed);
                return Err(CodeCacheFull {
                    requested: size,
                    unallocated: self.capacity - used,
                });
            }
            self.used.store(used + size, Ordering::Relaxed);
            // Not a candidate for unloading until a full marking cycle has passed.
            artifact.mark_as_maybe_on_stack(self.gc_epoch());
            let artifact = Arc::new(artifact);
            let key = (artifact.kind(), artifact.compile_id());
            let old = artifacts.insert(key, artifact.clone());
            assert!(old.is_none(), "Duplicate artifact {:?}", key);
            artifact
        };
        self.installed_count.fetch_add(1, Ordering::Relaxed);

        artifact.make_in_use();
        let method = artifact.method();
        if let Some(bci) = artifact.osr_entry_bci() {
            for old in method.osr_artifacts() {
                if old.osr_entry_bci() == Some(bci)
                    && old.comp_level() < artifact.comp_level()
                    && old.is_in_use()
                {
                    old.make_not_entrant();
                }
            }
            method.add_osr_artifact(&artifact);
        } else {
            if let Some(old) = method.replace_code(&artifact) {
                old.make_not_used();
            }
        }
        debug!("Installed {} ({} bytes)", artifact, size);
        Ok(artifact)
    }

    pub fn find(&self, kind: CompileKind, compile_id: CompileId) -> Option<Arc<CompiledArtifact>> {
        self.artifacts
            .lock()
            .unwrap()
            .get(&(kind, compile_id))
            .cloned()
    }

    /// The usable standard-entry code of `method`, if its level is at least `level`.
    pub fn lookup(&self, method: &Method, level: CompLevel) -> Option<Arc<CompiledArtifact>> {
        method
            .code()
            .filter(|a| a.is_in_use() && a.comp_level() >= level)
    }

    /// The best usable OSR code of `method` at `bci` with a level of at least `level`.
    pub fn lookup_osr(
        &self,
        method: &Method,
        bci: u32,
        level: CompLevel,
    ) -> Option<Arc<CompiledArtifact>> {
        method.osr_code_at(bci, level)
    }

    fn snapshot(&self) -> Vec<Arc<CompiledArtifact>> {
        self.artifacts.lock().unwrap().values().cloned().collect()
    }

    /// Visit every installed artifact that is not unlinked.  The registry lock is not held while
    /// `f` runs, so `f` may call back into the code cache.
    pub fn for_each_artifact<F: FnMut(&Arc<CompiledArtifact>)>(&self, mut f: F) {
        self.snapshot()
            .iter()
            .filter(|a| !a.is_unlinked())
            .for_each(|a| f(a))
    }

    /// Make every artifact that depends on `change` not entrant.  Returns how many artifacts this
    /// call made not entrant.
    pub fn mark_for_deoptimization(&self, change: &DependencyChange) -> usize {
        let mut count = 0;
        self.for_each_artifact(|a| {
            if a.depends_on(change) && a.make_not_entrant() {
                count += 1;
            }
        });
        if count > 0 {
            info!("Deoptimized {} artifacts for {:?}", count, change);
        }
        count
    }

    /// Unlink artifacts that are no longer needed: those whose embedded objects `is_alive` reports
    /// dead, and not-entrant or not-used artifacts that no stack has referred to since the last
    /// completed marking cycle.  Returns the number unlinked.
    pub fn do_unloading<F: FnMut(&CompiledArtifact) -> bool>(&self, mut is_alive: F) -> usize {
        let previous_epoch = self.previous_completed_gc_marking_cycle();
        let mut count = 0;
        self.for_each_artifact(|a| {
            let dead = !is_alive(a);
            let cold =
                a.state() >= ArtifactState::NotUsed && !a.is_maybe_on_stack(previous_epoch);
            if (dead || cold) && a.unlink() {
                count += 1;
            }
        });
        self.unloaded_count.fetch_add(count, Ordering::Relaxed);
        debug!("Unloaded {} artifacts", count);
        count
    }

    /// Remove unlinked artifacts from the registry and return their space.  Returns the number
    /// removed.  Must not be called during a marking cycle.
    pub fn purge_unlinked(&self) -> usize {
        assert!(
            !self.root_marking.is_active(),
            "Cannot purge artifacts during a marking cycle"
        );
        let mut artifacts = self.artifacts.lock().unwrap();
        let mut freed = 0;
        let mut count = 0;
        artifacts.retain(|_, a| {
            if a.is_unlinked() {
                freed += a.total_size();
                count += 1;
                false
            } else {
                true
            }
        });
        self.used.fetch_sub(freed, Ordering::Relaxed);
        drop(artifacts);
        self.purged_count.fetch_add(count, Ordering::Relaxed);
        debug!("Purged {} artifacts, freed {} bytes", count, freed);
        count
    }

    pub fn root_marking(&self) -> &RootMarking {
        &self.root_marking
    }

    pub fn marking_prologue(&self) {
        self.root_marking.prologue()
    }

    pub fn marking_epilogue(&self) -> usize {
        self.root_marking.epilogue()
    }

    /// Weakly process `artifact` in the current marking cycle.
    pub fn process_weak<P: OopsDoProcessor + ?Sized>(
        &self,
        artifact: &Arc<CompiledArtifact>,
        processor: &mut P,
    ) {
        artifact.oops_do_process_weak(&self.root_marking, processor)
    }

    /// Process `artifact` as a strong root in the current marking cycle.
    pub fn process_strong<P: OopsDoProcessor + ?Sized>(
        &self,
        artifact: &Arc<CompiledArtifact>,
        processor: &mut P,
    ) {
        artifact.oops_do_process_strong(&self.root_marking, processor)
    }

    pub fn gc_epoch(&self) -> u64 {
        self.gc_epoch.load(Ordering::Acquire)
    }

    pub fn is_gc_marking_cycle_active(&self) -> bool {
        self.gc_epoch() % 2 == 1
    }

    pub fn on_gc_marking_cycle_start(&self) {
        let old = self.gc_epoch.fetch_add(1, Ordering::AcqRel);
        assert!(old % 2 == 0, "GC marking cycle already active");
    }

    pub fn on_gc_marking_cycle_finish(&self) {
        let old = self.gc_epoch.fetch_add(1, Ordering::AcqRel);
        assert!(old % 2 == 1, "No GC marking cycle active");
    }

    /// The epoch of the last completed marking cycle.  Artifacts stamped with an older epoch are
    /// on no stack.
    pub fn previous_completed_gc_marking_cycle(&self) -> u64 {
        let epoch = self.gc_epoch();
        if epoch % 2 == 1 {
            epoch - 2
        } else {
            epoch - 1
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    pub fn unallocated_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.used())
    }

    /// Unallocated capacity as a percentage of the capacity.
    pub fn free_ratio_percent(&self) -> usize {
        if self.capacity == 0 {
            return 0;
        }
        self.unallocated_capacity() * 100 / self.capacity
    }

    /// The number of registered artifacts, including unlinked ones not yet purged.
    pub fn len(&self) -> usize {
        self.artifacts.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CodeCacheStats {
        CodeCacheStats {
            installed: self.installed_count.load(Ordering::Relaxed),
            unloaded: self.unloaded_count.load(Ordering::Relaxed),
            purged: self.purged_count.load(Ordering::Relaxed),
            full_count: self.full_count.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for CodeCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CodeCache")
            .field("capacity", &self.capacity)
            .field("used", &self.used())
            .field("gc_epoch", &self.gc_epoch())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::dependencies::{ClassId, Dependency};
    use crate::compiler::CompLevel;
    use crate::method::{Method, MethodId};
    use crate::util::test_util::fixtures::{artifact_for, blueprint};

    #[test]
    fn install_publishes_and_replaces() {
        let cache = CodeCache::new(1 << 20);
        let method = Method::new(MethodId(1), "A.a", 10);
        let first = cache
            .install(artifact_for(&method, 1, CompLevel::Simple, None, blueprint(32)))
            .unwrap();
        assert!(first.is_in_use());
        assert!(cache.lookup(&method, CompLevel::Simple).is_some());
        assert!(cache.lookup(&method, CompLevel::FullOptimization).is_none());

        let second = cache
            .install(artifact_for(
                &method,
                2,
                CompLevel::FullOptimization,
                None,
                blueprint(32),
            ))
            .unwrap();
        assert_eq!(first.state(), ArtifactState::NotUsed);
        assert!(Arc::ptr_eq(
            &cache.lookup(&method, CompLevel::FullOptimization).unwrap(),
            &second
        ));
        assert!(Arc::ptr_eq(
            &cache.find(CompileKind::Standard, 1).unwrap(),
            &first
        ));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().installed, 2);
    }

    #[test]
    fn racing_installs_leave_one_artifact_in_use() {
        const THREADS: u32 = 8;
        let cache = CodeCache::new(1 << 20);
        let method = Method::new(MethodId(1), "A.a", 10);
        let barrier = std::sync::Barrier::new(THREADS as usize);
        let installed: Vec<_> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|i| {
                    let (cache, method, barrier) = (&cache, &method, &barrier);
                    s.spawn(move || {
                        let a = artifact_for(method, i + 1, CompLevel::Simple, None, blueprint(32));
                        barrier.wait();
                        cache.install(a).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let in_use: Vec<_> = installed.iter().filter(|a| a.is_in_use()).collect();
        assert_eq!(in_use.len(), 1);
        assert!(Arc::ptr_eq(in_use[0], &method.code().unwrap()));
        assert_eq!(
            installed
                .iter()
                .filter(|a| a.state() == ArtifactState::NotUsed)
                .count(),
            THREADS as usize - 1
        );
    }

    #[test]
    fn full_cache_rejects_install() {
        let cache = CodeCache::new(64);
        let method = Method::new(MethodId(1), "A.a", 10);
        let result = cache.install(artifact_for(&method, 1, CompLevel::Simple, None, blueprint(128)));
        assert!(matches!(result, Err(CodeCacheFull { unallocated: 64, .. })));
        assert_eq!(cache.stats().full_count, 1);
        assert!(cache.is_empty());
        assert_eq!(cache.free_ratio_percent(), 100);
    }

    #[test]
    fn deoptimization_by_dependency() {
        let cache = CodeCache::new(1 << 20);
        let method = Method::new(MethodId(1), "A.a", 10);
        let mut bp = blueprint(32);
        bp.dependencies.push(Dependency::LeafType { class: ClassId(5) });
        let dependent = cache
            .install(artifact_for(&method, 1, CompLevel::FullOptimization, None, bp))
            .unwrap();
        let other_method = Method::new(MethodId(2), "B.b", 10);
        let independent = cache
            .install(artifact_for(&other_method, 2, CompLevel::Simple, None, blueprint(32)))
            .unwrap();

        let change = DependencyChange::ClassLoaded {
            class: ClassId(6),
            supertypes: vec![ClassId(5)],
        };
        assert_eq!(cache.mark_for_deoptimization(&change), 1);
        assert!(dependent.is_not_entrant());
        assert!(independent.is_in_use());
        assert!(method.code().is_none());
        assert_eq!(cache.mark_for_deoptimization(&change), 0);
    }

    #[test]
    fn unload_and_purge() {
        let cache = CodeCache::new(1 << 20);
        let method = Method::new(MethodId(1), "A.a", 10);
        let a = cache
            .install(artifact_for(&method, 1, CompLevel::Simple, None, blueprint(32)))
            .unwrap();
        let b = cache
            .install(artifact_for(&method, 2, CompLevel::FullProfile, None, blueprint(32)))
            .unwrap();
        let used = cache.used();

        // `a` was replaced.  It is not used, but may still be on a stack.
        assert_eq!(cache.do_unloading(|_| true), 0);

        // Two full marking cycles without finding `a` on a stack.
        for _ in 0..2 {
            cache.on_gc_marking_cycle_start();
            b.mark_as_maybe_on_stack(cache.gc_epoch());
            cache.on_gc_marking_cycle_finish();
        }
        assert!(!a.is_maybe_on_stack(cache.previous_completed_gc_marking_cycle()));
        assert_eq!(cache.do_unloading(|_| true), 1);
        assert!(a.is_unlinked());
        assert!(!b.is_unlinked());

        let a_size = a.total_size();
        assert_eq!(cache.purge_unlinked(), 1);
        assert_eq!(cache.used(), used - a_size);
        assert!(cache.find(CompileKind::Standard, 1).is_none());

        // Dead according to the GC.
        assert_eq!(cache.do_unloading(|x| x.compile_id() != 2), 1);
        assert!(method.code().is_none());
        assert_eq!(cache.purge_unlinked(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().unloaded, 2);
    }

    #[test]
    fn gc_epochs() {
        let cache = CodeCache::new(1024);
        assert_eq!(cache.gc_epoch(), 2);
        assert_eq!(cache.previous_completed_gc_marking_cycle(), 1);
        cache.on_gc_marking_cycle_start();
        assert!(cache.is_gc_marking_cycle_active());
        assert_eq!(cache.previous_completed_gc_marking_cycle(), 1);
        cache.on_gc_marking_cycle_finish();
        assert!(!cache.is_gc_marking_cycle_active());
        assert_eq!(cache.previous_completed_gc_marking_cycle(), 3);
    }

    #[test]
    #[should_panic(expected = "during a marking cycle")]
    fn purge_during_marking_is_fatal() {
        let cache = CodeCache::new(1024);
        cache.marking_prologue();
        cache.purge_unlinked();
    }
}
