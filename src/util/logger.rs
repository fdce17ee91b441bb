//! jitcore logs through the `log` facade.  By default it ships a built-in `env_logger`, so a
//! runtime embedding jitcore gets log output without installing a logger itself.  Runtimes that
//! already have a logger can disable the `builtin_env_logger` feature.

use log::SetLoggerError;

/// Attempt to init a env_logger for jitcore.
/// Does nothing if the "builtin_env_logger" feature is disabled.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::try_init_from_env(
                // By default, use info level logging.
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            )
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_reports_existing_logger() {
        let _ = try_init();
        if cfg!(feature = "builtin_env_logger") {
            assert!(try_init().is_err());
        } else {
            assert!(try_init().is_ok());
        }
    }
}
