/// log2 of the number of bytes in a machine word
#[cfg(target_pointer_width = "32")]
pub const LOG_BYTES_IN_WORD: u8 = 2;
/// log2 of the number of bytes in a machine word
#[cfg(target_pointer_width = "64")]
pub const LOG_BYTES_IN_WORD: u8 = 3;
/// The number of bytes in a machine word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

/// The number of low bits of an artifact address used as the claim tag of a mark link.
pub const MARK_LINK_TAG_BITS: usize = 2;
/// Mask of the claim tag bits in a mark link word.
pub const MARK_LINK_TAG_MASK: usize = (1 << MARK_LINK_TAG_BITS) - 1;

/// The default hot count at which a compile task is queued with priority.
pub const DEFAULT_HOT_TASK_COUNT_THRESHOLD: u32 = 10_000;
