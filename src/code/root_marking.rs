//! Concurrent root marking of compiled artifacts.
//!
//! During a GC marking cycle, several GC threads may discover the same artifact.  Some only need
//! the artifact's oops for *weak* processing; others need it as a *strong* root, which requires
//! the regular processing plus some remaining strong processing.  Each artifact is processed at
//! most once at each level, without locks, using the artifact's [`MarkLink`] word:
//!
//! ```text
//!  weak:   Unclaimed -> N|WR -> X|WD
//!  weak, then strong request:  N|WR -> N|SR -> X|SD
//!  weak done, then strong:     X|WD -> X|SD
//!  strong:                     Unclaimed -> N|SD -> X|SD
//! ```
//!
//! Every processed artifact is pushed onto a global list whose head lives in [`RootMarking`].  The
//! list is threaded through the mark links themselves.  Its tail points to itself so that a done
//! link is never null.  At the end of the cycle the epilogue walks the list and resets every link.
//!
//! [`MarkLink`]: super::mark_link::MarkLink

use super::mark_link::{ClaimTag, LinkValue};
use super::CompiledArtifact;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

/// The GC's processing of the oops of one artifact.
pub trait OopsDoProcessor {
    /// Processing needed for both weak and strong marking.
    fn do_regular_processing(&mut self, artifact: &CompiledArtifact);
    /// The additional processing needed to treat an already regularly processed artifact as a
    /// strong root.
    fn do_remaining_strong_processing(&mut self, artifact: &CompiledArtifact);
}

/// The marking context of one code cache.
///
/// The list of processed artifacts holds one strong reference to each artifact on it, taken when
/// the artifact is pushed and released by [`RootMarking::epilogue`].
pub struct RootMarking {
    head: AtomicPtr<CompiledArtifact>,
    active: AtomicBool,
}

impl RootMarking {
    pub const fn new() -> Self {
        RootMarking {
            head: AtomicPtr::new(ptr::null_mut()),
            active: AtomicBool::new(false),
        }
    }

    /// Is a marking cycle open?
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Open a marking cycle.
    pub fn prologue(&self) {
        assert!(
            self.head.load(Ordering::Acquire).is_null(),
            "The marked artifact list must be empty before marking starts"
        );
        let was_active = self.active.swap(true, Ordering::AcqRel);
        assert!(!was_active, "Marking prologue called twice");
        trace!("Root marking prologue");
    }

    /// Close the marking cycle.  Resets the mark link of every artifact processed in this cycle
    /// and releases the list's references.  Returns the number of artifacts on the list.
    ///
    /// All processing must have finished.  A listed artifact that is not done is a protocol
    /// violation and panics.
    pub fn epilogue(&self) -> usize {
        let was_active = self.active.swap(false, Ordering::AcqRel);
        assert!(was_active, "Marking epilogue called without prologue");

        let mut next = self.head.swap(ptr::null_mut(), Ordering::AcqRel) as *const CompiledArtifact;
        if next.is_null() {
            trace!("Root marking epilogue: no artifacts");
            return 0;
        }

        #[cfg(feature = "extreme_assertions")]
        let mut visited = std::collections::HashSet::new();

        let mut count = 0;
        loop {
            #[cfg(feature = "extreme_assertions")]
            assert!(visited.insert(next as usize), "Artifact {:?} listed twice", next);

            // SAFETY: every element of the list holds the strong reference taken in `push`.
            let cur = unsafe { Arc::from_raw(next) };
            let link = cur.mark_link.load();
            assert!(
                !link.is_unclaimed() && link.tag().is_done(),
                "Artifact {} is on the marked list in state {:?}",
                cur.compile_id(),
                link
            );
            next = link.artifact();
            cur.mark_link.store(LinkValue::UNCLAIMED);
            count += 1;
            if ptr::eq(Arc::as_ptr(&cur), next) {
                break;
            }
        }
        trace!("Root marking epilogue: {} artifacts", count);
        count
    }

    /// Visit every artifact on the marked list.  Returns the number visited.
    ///
    /// # Safety
    ///
    /// The caller must ensure that no artifact is being processed and that the epilogue does not
    /// run concurrently.
    pub unsafe fn walk_marked<F: FnMut(&CompiledArtifact)>(&self, mut f: F) -> usize {
        let mut next = self.head.load(Ordering::Acquire) as *const CompiledArtifact;
        if next.is_null() {
            return 0;
        }
        let mut count = 0;
        loop {
            let cur = &*next;
            let link = cur.mark_link.load();
            assert!(
                !link.is_unclaimed() && link.tag().is_done(),
                "Artifact {} is on the marked list in state {:?}",
                cur.compile_id(),
                link
            );
            f(cur);
            count += 1;
            next = link.artifact();
            if ptr::eq(cur, next) {
                return count;
            }
        }
    }

    /// Push `artifact` onto the list.  Returns the old head, or the artifact itself if the list
    /// was empty.
    fn push(&self, artifact: &Arc<CompiledArtifact>) -> *const CompiledArtifact {
        debug_assert!(self.is_active(), "Pushing {} outside a marking cycle", artifact);
        let this = Arc::into_raw(artifact.clone());
        let old_head = self.head.swap(this as *mut CompiledArtifact, Ordering::AcqRel);
        if old_head.is_null() {
            this
        } else {
            old_head
        }
    }
}

impl Default for RootMarking {
    fn default() -> Self {
        Self::new()
    }
}

/// The claim operations.  The public entry points are [`CompiledArtifact::oops_do_process_weak`],
/// [`CompiledArtifact::oops_do_process_strong`] and [`CompiledArtifact::oops_do_try_claim`].
impl CompiledArtifact {
    fn link_to_self(&self, tag: ClaimTag) -> LinkValue {
        LinkValue::new(self, tag)
    }

    /// Unclaimed -> N|WR.
    fn oops_do_try_claim_weak_request(&self) -> bool {
        let witness = self
            .mark_link
            .compare_exchange(LinkValue::UNCLAIMED, self.link_to_self(ClaimTag::WeakRequest));
        witness.is_unclaimed()
    }

    /// Unclaimed -> N|SD.  Returns the witnessed link, unclaimed on success.
    fn oops_do_try_claim_strong_done(&self) -> LinkValue {
        self.mark_link
            .compare_exchange(LinkValue::UNCLAIMED, self.link_to_self(ClaimTag::StrongDone))
    }

    /// Push onto the list, then N|WR -> X|WD.  Returns `None` on success.  If another thread
    /// requested strong processing meanwhile, returns the old head, which the caller must pass to
    /// [`Self::oops_do_set_strong_done`] after finishing the strong processing.
    fn oops_do_try_add_to_list_as_weak_done(
        self: &Arc<Self>,
        marking: &RootMarking,
    ) -> Option<*const CompiledArtifact> {
        debug_assert!(self.mark_link.load() == self.link_to_self(ClaimTag::WeakRequest)
            || self.mark_link.load() == self.link_to_self(ClaimTag::StrongRequest));
        let old_head = marking.push(self);
        let expected = self.link_to_self(ClaimTag::WeakRequest);
        let witness = self
            .mark_link
            .compare_exchange(expected, LinkValue::new(old_head, ClaimTag::WeakDone));
        if witness == expected {
            trace!("oops_do: {} weak done", self.compile_id());
            return None;
        }
        assert!(
            witness == self.link_to_self(ClaimTag::StrongRequest),
            "Unexpected mark link {:?} of {} during weak processing",
            witness,
            self.compile_id()
        );
        Some(old_head)
    }

    /// N|WR -> N|SR, requesting the thread doing weak processing to also do the strong part.
    /// Returns the witnessed link, which equals `next` on success.
    fn oops_do_try_add_strong_request(&self, next: LinkValue) -> LinkValue {
        debug_assert!(next.has_weak_request());
        let witness = self
            .mark_link
            .compare_exchange(next, self.link_to_self(ClaimTag::StrongRequest));
        if witness == next {
            trace!("oops_do: {} strong requested", self.compile_id());
        }
        witness
    }

    /// X|WD -> X|SD.
    fn oops_do_try_claim_weak_done_as_strong_done(&self, next: LinkValue) -> bool {
        debug_assert!(!next.is_unclaimed() && next.tag() == ClaimTag::WeakDone);
        let witness = self
            .mark_link
            .compare_exchange(next, LinkValue::new(next.artifact(), ClaimTag::StrongDone));
        witness == next
    }

    /// Push onto the list as strong done.  The artifact must be claimed as N|SD.
    fn oops_do_add_to_list_as_strong_done(self: &Arc<Self>, marking: &RootMarking) {
        debug_assert!(self.mark_link.load() == self.link_to_self(ClaimTag::StrongDone));
        let old_head = marking.push(self);
        self.oops_do_set_strong_done(old_head);
    }

    fn oops_do_set_strong_done(&self, old_head: *const CompiledArtifact) {
        self.mark_link
            .store(LinkValue::new(old_head, ClaimTag::StrongDone));
        trace!("oops_do: {} strong done", self.compile_id());
    }

    /// Process this artifact for weak marking.  Does nothing if another thread already claimed
    /// it.  If a strong request arrives while the regular processing runs, this thread does the
    /// remaining strong processing too.
    pub fn oops_do_process_weak<P: OopsDoProcessor + ?Sized>(
        self: &Arc<Self>,
        marking: &RootMarking,
        processor: &mut P,
    ) {
        if !self.oops_do_try_claim_weak_request() {
            return;
        }
        processor.do_regular_processing(self);
        let Some(old_head) = self.oops_do_try_add_to_list_as_weak_done(marking) else {
            return;
        };
        processor.do_remaining_strong_processing(self);
        self.oops_do_set_strong_done(old_head);
    }

    /// Process this artifact as a strong root.  Depending on the state other threads left it in,
    /// this thread does the full processing, only the remaining strong processing, hands the
    /// strong part to the thread doing weak processing, or does nothing.
    pub fn oops_do_process_strong<P: OopsDoProcessor + ?Sized>(
        self: &Arc<Self>,
        marking: &RootMarking,
        processor: &mut P,
    ) {
        let mut next = self.oops_do_try_claim_strong_done();
        if next.is_unclaimed() {
            processor.do_regular_processing(self);
            self.oops_do_add_to_list_as_strong_done(marking);
            return;
        }

        if next.has_weak_request() {
            let old = next;
            next = self.oops_do_try_add_strong_request(old);
            if next == old {
                return;
            }
            // The weak processing finished concurrently.
        }

        if next.has_any_strong_state() {
            return;
        }

        if self.oops_do_try_claim_weak_done_as_strong_done(next) {
            processor.do_remaining_strong_processing(self);
        }
    }

    /// Claim this artifact and put it on the list as weak done in one step, for collectors that
    /// do not distinguish weak and strong processing.  Returns true if this thread claimed it and
    /// must process it.
    pub fn oops_do_try_claim(self: &Arc<Self>, marking: &RootMarking) -> bool {
        if !self.oops_do_try_claim_weak_request() {
            return false;
        }
        let result = self.oops_do_try_add_to_list_as_weak_done(marking);
        assert!(
            result.is_none(),
            "Adding {} to the marked list as weak done must succeed",
            self.compile_id()
        );
        true
    }

    /// The claim state of this artifact in the current marking cycle, or `None` if unclaimed.
    pub fn oops_do_claim_state(&self) -> Option<ClaimTag> {
        let link = self.mark_link.load();
        (!link.is_unclaimed()).then(|| link.tag())
    }
}
