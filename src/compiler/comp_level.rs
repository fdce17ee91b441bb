use enum_map::Enum;
use strum_macros::{Display, EnumString};

/// Compilation levels.  Level 0 is the interpreter; levels 1 to 3 are produced by the C1 tier
/// with increasing amounts of profiling; level 4 is fully optimized code from the C2 tier.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Enum, Display, EnumString)]
pub enum CompLevel {
    /// Interpreted.  Never compiled.
    None = 0,
    /// C1 without profiling.
    Simple = 1,
    /// C1 with invocation and backedge counters.
    LimitedProfile = 2,
    /// C1 with full profiling.
    FullProfile = 3,
    /// C2.
    FullOptimization = 4,
}

impl CompLevel {
    pub fn is_c1_compile(self) -> bool {
        matches!(
            self,
            CompLevel::Simple | CompLevel::LimitedProfile | CompLevel::FullProfile
        )
    }

    pub fn is_c2_compile(self) -> bool {
        self == CompLevel::FullOptimization
    }

    pub fn is_compile(self) -> bool {
        self != CompLevel::None
    }

    /// The compiler tier serving this level, or `None` for the interpreter level.
    pub fn tier(self) -> Option<CompilerTier> {
        if self.is_c2_compile() {
            Some(CompilerTier::C2)
        } else if self.is_c1_compile() {
            Some(CompilerTier::C1)
        } else {
            None
        }
    }
}

/// A compiler tier.  Each tier has its own code generator, compile queue and worker threads.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Enum, Display)]
pub enum CompilerTier {
    C1,
    C2,
}

impl CompilerTier {
    /// The thread name prefix of this tier's workers.
    pub fn thread_prefix(self) -> &'static str {
        match self {
            CompilerTier::C1 => "jitcore-c1",
            CompilerTier::C2 => "jitcore-c2",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn levels_map_to_tiers() {
        assert_eq!(CompLevel::None.tier(), None);
        assert_eq!(CompLevel::Simple.tier(), Some(CompilerTier::C1));
        assert_eq!(CompLevel::FullProfile.tier(), Some(CompilerTier::C1));
        assert_eq!(CompLevel::FullOptimization.tier(), Some(CompilerTier::C2));
        assert!(CompLevel::Simple < CompLevel::FullOptimization);
    }

    #[test]
    fn parse_level() {
        assert_eq!(
            CompLevel::from_str("FullOptimization").unwrap(),
            CompLevel::FullOptimization
        );
        assert!(CompLevel::from_str("Level5").is_err());
    }
}
