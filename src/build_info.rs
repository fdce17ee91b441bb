mod raw {
    // See https://docs.rs/built/latest/built/index.html for the full list of constants.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// jitcore crate version such as 0.1.0
pub const JITCORE_PKG_VERSION: &str = raw::PKG_VERSION;

/// Comma separated features enabled for this build
pub const JITCORE_FEATURES: &str = raw::FEATURES_STR;

lazy_static! {
    /// Git version such as a96e8f991c91a81df51e7975849441f52fdbcdcc, or a96e8f991c91a81df51e7975849441f52fdbcdcc-dirty, or unknown-git-version if jitcore
    /// is not built from a git repo.
    pub static ref JITCORE_GIT_VERSION: &'static str = &JITCORE_GIT_VERSION_STRING;

    // Owned string
    static ref JITCORE_GIT_VERSION_STRING: String = if let Some(hash) = raw::GIT_COMMIT_HASH {
        format!("{}{}", hash, if raw::GIT_DIRTY == Some(true) { "-dirty" } else { "" })
    } else {
        "unknown-git-version".to_string()
    };
}

/// A one-line description of this build, logged when a `JitCore` instance is created.
pub fn build_summary() -> String {
    format!(
        "jitcore {} ({}) features: [{}]",
        JITCORE_PKG_VERSION, *JITCORE_GIT_VERSION, JITCORE_FEATURES
    )
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_git_version() {
        println!("Git version: {}", *super::JITCORE_GIT_VERSION);
        assert!(!super::JITCORE_GIT_VERSION.is_empty());
    }

    #[test]
    fn test_pkg_version() {
        assert_eq!(super::JITCORE_PKG_VERSION, env!("CARGO_PKG_VERSION"));
        assert!(super::build_summary().contains(super::JITCORE_PKG_VERSION));
    }
}
