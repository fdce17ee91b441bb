//! Utilities shared across the crate.

/// Constants.
pub mod constants;
/// Logger initialization.
pub mod logger;
/// Runtime options.
pub mod options;
/// Helpers for tests and benchmarks.
#[cfg(any(test, feature = "test_private"))]
pub mod test_util;

pub use self::options::Options;
