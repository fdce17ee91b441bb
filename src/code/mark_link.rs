//! The mark link: a per-artifact atomic word combining a claim state and a list link.
//!
//! The word is either zero, meaning the artifact is unclaimed in the current marking cycle, or
//! the address of an artifact with a [`ClaimTag`] in its two low bits.  While an artifact is only
//! claimed (`WeakRequest`, `StrongRequest`) the address is the artifact itself; once it is done
//! (`WeakDone`, `StrongDone`) the address is the next artifact in the list of processed artifacts.

use super::CompiledArtifact;
use crate::util::constants::{MARK_LINK_TAG_BITS, MARK_LINK_TAG_MASK};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

// The claim tag lives in the low bits of an artifact address.
static_assertions::const_assert!(
    std::mem::align_of::<CompiledArtifact>() >= (1 << MARK_LINK_TAG_BITS)
);

/// The claim state of an artifact in a marking cycle.
#[repr(usize)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClaimTag {
    /// Claimed for weak processing.
    WeakRequest = 0,
    /// Weak processing finished.
    WeakDone = 1,
    /// Another thread asked for strong processing while weak processing was running.
    StrongRequest = 2,
    /// Strong processing finished.
    StrongDone = 3,
}

impl ClaimTag {
    fn from_bits(bits: usize) -> Self {
        match bits & MARK_LINK_TAG_MASK {
            0 => ClaimTag::WeakRequest,
            1 => ClaimTag::WeakDone,
            2 => ClaimTag::StrongRequest,
            _ => ClaimTag::StrongDone,
        }
    }

    pub fn is_done(self) -> bool {
        matches!(self, ClaimTag::WeakDone | ClaimTag::StrongDone)
    }
}

/// A decoded value of a mark link.
#[derive(Copy, Clone, PartialEq, Eq)]
pub(crate) struct LinkValue(usize);

impl LinkValue {
    pub const UNCLAIMED: LinkValue = LinkValue(0);

    pub fn new(artifact: *const CompiledArtifact, tag: ClaimTag) -> Self {
        let addr = artifact as usize;
        debug_assert_eq!(addr & MARK_LINK_TAG_MASK, 0, "artifact {:#x} is not aligned", addr);
        LinkValue(addr | tag as usize)
    }

    pub fn is_unclaimed(self) -> bool {
        self.0 == 0
    }

    /// The tag of a claimed link.
    pub fn tag(self) -> ClaimTag {
        debug_assert!(!self.is_unclaimed());
        ClaimTag::from_bits(self.0)
    }

    /// The artifact part of the link: the artifact itself while claimed, the next list element
    /// once done.
    pub fn artifact(self) -> *const CompiledArtifact {
        (self.0 & !MARK_LINK_TAG_MASK) as *const CompiledArtifact
    }

    pub fn has_weak_request(self) -> bool {
        !self.is_unclaimed() && self.tag() == ClaimTag::WeakRequest
    }

    /// Strong processing was requested or has been done.
    pub fn has_any_strong_state(self) -> bool {
        !self.is_unclaimed() && self.tag() >= ClaimTag::StrongRequest
    }
}

impl fmt::Debug for LinkValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_unclaimed() {
            write!(f, "Unclaimed")
        } else {
            write!(f, "{:#x}|{:?}", self.artifact() as usize, self.tag())
        }
    }
}

/// The atomic mark link word of an artifact.
pub(crate) struct MarkLink(AtomicUsize);

impl MarkLink {
    pub const fn new() -> Self {
        MarkLink(AtomicUsize::new(0))
    }

    pub fn load(&self) -> LinkValue {
        LinkValue(self.0.load(Ordering::Acquire))
    }

    /// Plain store.  Only used by the thread that owns the current claim.
    pub fn store(&self, value: LinkValue) {
        self.0.store(value.0, Ordering::Release)
    }

    /// Compare and exchange.  Returns the value witnessed before the operation, which equals
    /// `current` if and only if the exchange happened.
    pub fn compare_exchange(&self, current: LinkValue, new: LinkValue) -> LinkValue {
        match self
            .0
            .compare_exchange(current.0, new.0, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(v) | Err(v) => LinkValue(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips_through_aligned_address() {
        let addr = 0x1000 as *const CompiledArtifact;
        for tag in [
            ClaimTag::WeakRequest,
            ClaimTag::WeakDone,
            ClaimTag::StrongRequest,
            ClaimTag::StrongDone,
        ] {
            let link = LinkValue::new(addr, tag);
            assert!(!link.is_unclaimed());
            assert_eq!(link.tag(), tag);
            assert_eq!(link.artifact(), addr);
        }
    }

    #[test]
    fn strong_states() {
        let addr = 0x2000 as *const CompiledArtifact;
        assert!(LinkValue::new(addr, ClaimTag::WeakRequest).has_weak_request());
        assert!(!LinkValue::new(addr, ClaimTag::WeakDone).has_any_strong_state());
        assert!(LinkValue::new(addr, ClaimTag::StrongRequest).has_any_strong_state());
        assert!(LinkValue::new(addr, ClaimTag::StrongDone).has_any_strong_state());
        assert!(!LinkValue::UNCLAIMED.has_weak_request());
        assert!(!LinkValue::UNCLAIMED.has_any_strong_state());
    }

    #[test]
    fn compare_exchange_reports_witness() {
        let link = MarkLink::new();
        let claimed = LinkValue::new(0x3000 as *const CompiledArtifact, ClaimTag::WeakRequest);
        assert!(link.compare_exchange(LinkValue::UNCLAIMED, claimed) == LinkValue::UNCLAIMED);
        // The second attempt fails and witnesses the first claim.
        assert!(link.compare_exchange(LinkValue::UNCLAIMED, claimed) == claimed);
        assert!(link.load() == claimed);
    }
}
