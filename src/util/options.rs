//! Runtime options.
//!
//! Every option has a default value, a validator and can be overridden by an environment variable
//! `JITCORE_<OPTION_NAME>` (e.g. `JITCORE_C1_COMPILER_COUNT=2`), or programmatically through
//! [`Options::set_from_str`] (used by `JitCoreBuilder::set_option`).

use crate::util::constants::{BYTES_IN_MBYTE, DEFAULT_HOT_TASK_COUNT_THRESHOLD};

fn always_valid<T>(_: &T) -> bool {
    true
}

/// The default number of C1 compiler threads.  About a third of the available processors go to
/// C1, and the rest to C2, with at least one thread for each tier.
fn default_c1_compiler_count() -> usize {
    (num_cpus::get() / 3).max(1)
}

/// The default number of C2 compiler threads.
fn default_c2_compiler_count() -> usize {
    (num_cpus::get() - num_cpus::get() / 3).max(1)
}

macro_rules! options {
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*,) => [
        options!($($name: $type[$validator] = $default),*);
    ];
    ($($name:ident: $type:ty[$validator:expr] = $default:expr),*) => [
        /// All the options of a jitcore instance.
        #[derive(Clone, Debug)]
        pub struct Options {
            $(pub $name: $type),*
        }
        impl Options {
            /// Set an option from its name and a string value.  Return true if the option was
            /// found, the value parsed and passed validation.  Invalid values leave the option
            /// unchanged.
            pub fn set_from_str(&mut self, s: &str, val: &str) -> bool {
                match s {
                    // Parse the given value from str (by env vars or by calling set_option()) to the right type
                    $(stringify!($name) => if let Ok(ref val) = val.parse::<$type>() {
                        // Validate
                        let validate_fn = $validator;
                        let is_valid = validate_fn(val);
                        if is_valid {
                            // Only set value if valid.
                            self.$name = val.clone();
                        } else {
                            warn!("Unable to set {}={:?}. Invalid value. Default value will be used.", s, val);
                        }
                        is_valid
                    } else {
                        warn!("Unable to set {}={:?}. Cant parse value. Default value will be used.", s, val);
                        false
                    })*
                    _ => {
                        warn!("Unknown option {}", s);
                        false
                    }
                }
            }

            /// Options with their default values, ignoring environment variables.
            pub fn without_env() -> Self {
                Options {
                    $($name: $default),*
                }
            }
        }
        impl Default for Options {
            fn default() -> Self {
                let mut options = Options::without_env();

                // If we have env vars that start with JITCORE_ and match any option (such as JITCORE_USE_COMPILER),
                // we set the option to its value (if it is a valid value). Otherwise, use the default value.
                const PREFIX: &str = "JITCORE_";
                for (key, val) in std::env::vars() {
                    // strip the prefix, and get the lower case string
                    if let Some(rest_of_key) = key.strip_prefix(PREFIX) {
                        let lowercase: &str = &rest_of_key.to_lowercase();
                        match lowercase {
                            $(stringify!($name) => { options.set_from_str(lowercase, &val); },)*
                            _ => {}
                        }
                    }
                }
                options
            }
        }
    ]
}

options! {
    // Accept compile requests at all.  When false, every request is rejected.
    use_compiler:                    bool   [always_valid] = true,
    // Compile in the background.  When false, every compile request blocks until the task completes.
    background_compilation:          bool   [always_valid] = true,
    // Number of C1 (levels 1 to 3) compiler threads.
    c1_compiler_count:               usize  [|v: &usize| *v > 0] = default_c1_compiler_count(),
    // Number of C2 (level 4) compiler threads.
    c2_compiler_count:               usize  [|v: &usize| *v > 0] = default_c2_compiler_count(),
    // Give OSR compiles their own dense id sequence.
    ci_count_osr:                    bool   [always_valid] = false,
    // Give native wrapper compiles their own dense id sequence.
    ci_count_native:                 bool   [always_valid] = false,
    // Stage non-priority tasks in the lock-free pending list of the compile queue.
    lock_free_compile_queues:        bool   [always_valid] = true,
    // Capacity of the code cache in bytes.
    reserved_code_cache_size:        usize  [|v: &usize| *v > 0] = 240 * BYTES_IN_MBYTE,
    // When the code cache is full, stop compilation until unloading frees space, rather than
    // disabling compilation for the rest of the process lifetime.
    use_code_cache_flushing:         bool   [always_valid] = true,
    // A stopped broker restarts compilation when at least this percentage of the code cache is free.
    code_cache_restart_free_percent: usize  [|v: &usize| *v <= 100] = 10,
    // A task whose hot count reaches this threshold is queued with priority.
    hot_task_count_threshold:        u32    [always_valid] = DEFAULT_HOT_TASK_COUNT_THRESHOLD,
    // Log every compilation at info level.
    print_compilation:               bool   [always_valid] = false,
}
