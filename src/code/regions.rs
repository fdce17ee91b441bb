//! The byte regions of a compiled artifact.
//!
//! An artifact's code and metadata live in one owned buffer, split into disjoint named regions.
//! Each region is length-checked; nothing outside this module computes offsets into the buffer.

use crate::util::constants::BYTES_IN_WORD;
use enum_map::{Enum, EnumMap};
use std::fmt;
use std::ops::Range;
use strum_macros::Display;

/// The regions of an artifact, in layout order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum, Display)]
pub enum RegionKind {
    /// Relocation records.
    Relocation,
    /// Constants referenced by the instructions.
    Consts,
    /// The instructions, including all entry points.
    Insts,
    /// Out-of-line stubs: exception and deoptimization handlers, call stubs.
    Stubs,
    /// Encoded debug information for scopes.
    ScopesData,
    /// Pc descriptors mapping instruction offsets to scopes.
    ScopesPcs,
    /// Implicit null check table.
    NulChkTable,
}

/// An error constructing or accessing regions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegionError {
    /// A region was specified twice in a builder.
    Duplicate(RegionKind),
    /// An offset lies outside the region it must belong to.
    OutOfBounds {
        kind: RegionKind,
        offset: usize,
        size: usize,
    },
    /// The OSR entry point does not match the OSR bci: an artifact has an OSR entry point if and
    /// only if it is compiled for OSR.
    OsrEntryMismatch { osr_bci: Option<u32> },
}

impl fmt::Display for RegionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegionError::Duplicate(kind) => write!(f, "region {} specified twice", kind),
            RegionError::OutOfBounds { kind, offset, size } => write!(
                f,
                "offset {} is out of bounds of region {} (size {})",
                offset, kind, size
            ),
            RegionError::OsrEntryMismatch { osr_bci: Some(bci) } => {
                write!(f, "OSR compilation at bci {} has no OSR entry point", bci)
            }
            RegionError::OsrEntryMismatch { osr_bci: None } => {
                write!(f, "standard compilation has an OSR entry point")
            }
        }
    }
}

impl std::error::Error for RegionError {}

fn align_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// The regions of one artifact, in one buffer.
pub struct CodeRegions {
    buffer: Box<[u8]>,
    bounds: EnumMap<RegionKind, Range<usize>>,
}

impl CodeRegions {
    pub fn builder() -> CodeRegionsBuilder {
        CodeRegionsBuilder::default()
    }

    /// The bytes of a region.  Empty if the region was not specified.
    pub fn region(&self, kind: RegionKind) -> &[u8] {
        &self.buffer[self.bounds[kind].clone()]
    }

    pub fn size(&self, kind: RegionKind) -> usize {
        self.bounds[kind].len()
    }

    /// The range of a region within the whole buffer.
    pub fn range(&self, kind: RegionKind) -> Range<usize> {
        self.bounds[kind].clone()
    }

    /// Is `offset`, relative to the start of the region, inside the region?
    pub fn contains(&self, kind: RegionKind, offset: usize) -> bool {
        offset < self.size(kind)
    }

    /// Check that `offset` is inside region `kind`.
    pub fn check_offset(&self, kind: RegionKind, offset: usize) -> Result<usize, RegionError> {
        if self.contains(kind, offset) {
            Ok(offset)
        } else {
            Err(RegionError::OutOfBounds {
                kind,
                offset,
                size: self.size(kind),
            })
        }
    }

    /// The size of the whole buffer, including alignment padding between regions.
    pub fn total_size(&self) -> usize {
        self.buffer.len()
    }
}

impl fmt::Debug for CodeRegions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, range) in self.bounds.iter() {
            if !range.is_empty() {
                map.entry(&kind, range);
            }
        }
        map.finish()
    }
}

/// Collects region contents and lays them out word-aligned in `RegionKind` order.
#[derive(Default)]
pub struct CodeRegionsBuilder {
    contents: EnumMap<RegionKind, Option<Vec<u8>>>,
}

impl CodeRegionsBuilder {
    pub fn region(mut self, kind: RegionKind, bytes: impl Into<Vec<u8>>) -> Result<Self, RegionError> {
        if self.contents[kind].is_some() {
            return Err(RegionError::Duplicate(kind));
        }
        self.contents[kind] = Some(bytes.into());
        Ok(self)
    }

    pub fn build(self) -> CodeRegions {
        let mut bounds: EnumMap<RegionKind, Range<usize>> = EnumMap::default();
        let mut cursor = 0;
        for (kind, bytes) in self.contents.iter() {
            let len = bytes.as_ref().map_or(0, |b| b.len());
            cursor = align_up(cursor, BYTES_IN_WORD);
            bounds[kind] = cursor..cursor + len;
            cursor += len;
        }
        let mut buffer = vec![0u8; align_up(cursor, BYTES_IN_WORD)].into_boxed_slice();
        for (kind, bytes) in self.contents.into_iter() {
            if let Some(bytes) = bytes {
                buffer[bounds[kind].clone()].copy_from_slice(&bytes);
            }
        }
        CodeRegions { buffer, bounds }
    }
}
