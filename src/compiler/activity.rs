use atomic::Atomic;
use bytemuck::NoUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use strum_macros::Display;

/// Whether the broker accepts new compile jobs.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, NoUninit)]
pub enum CompilerActivity {
    /// Temporarily not accepting new jobs, e.g. because the code cache is full.
    Stop = 0,
    Run = 1,
    /// Never accepting new jobs again.
    Shutdown = 2,
}

/// The compiler activity gate.  `Run` and `Stop` toggle; `Shutdown` is terminal.
pub struct ActivityGate {
    state: Atomic<CompilerActivity>,
    total_stops: AtomicUsize,
    total_restarts: AtomicUsize,
    print_compiler_warning: AtomicBool,
}

impl ActivityGate {
    pub fn new() -> Self {
        ActivityGate {
            state: Atomic::new(CompilerActivity::Run),
            total_stops: AtomicUsize::new(0),
            total_restarts: AtomicUsize::new(0),
            print_compiler_warning: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> CompilerActivity {
        self.state.load(Ordering::Acquire)
    }

    /// Switch between `Run` and `Stop`.  Returns true if this call changed the state.  Fails if
    /// another thread toggled first, or if compilation is shut down.
    pub fn set_should_compile_new_jobs(&self, new_state: CompilerActivity) -> bool {
        let old_state = match new_state {
            CompilerActivity::Run => CompilerActivity::Stop,
            CompilerActivity::Stop => CompilerActivity::Run,
            CompilerActivity::Shutdown => {
                panic!("Use disable_compilation_forever to shut compilation down")
            }
        };
        let changed = self
            .state
            .compare_exchange(old_state, new_state, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if changed {
            match new_state {
                CompilerActivity::Run => {
                    self.total_restarts.fetch_add(1, Ordering::Relaxed);
                    info!("Compilation restarted");
                }
                _ => {
                    self.total_stops.fetch_add(1, Ordering::Relaxed);
                    info!("Compilation stopped");
                }
            }
        }
        changed
    }

    pub fn should_compile_new_jobs(&self) -> bool {
        self.state() == CompilerActivity::Run
    }

    /// Shut compilation down for good.
    pub fn disable_compilation_forever(&self) {
        if self.state.swap(CompilerActivity::Shutdown, Ordering::AcqRel) != CompilerActivity::Shutdown
        {
            info!("Compilation disabled forever");
        }
    }

    pub fn is_compilation_disabled_forever(&self) -> bool {
        self.state() == CompilerActivity::Shutdown
    }

    /// Returns true exactly once, for the first caller.
    pub fn should_print_compiler_warning(&self) -> bool {
        !self.print_compiler_warning.swap(true, Ordering::AcqRel)
    }

    pub fn total_stops(&self) -> usize {
        self.total_stops.load(Ordering::Relaxed)
    }

    pub fn total_restarts(&self) -> usize {
        self.total_restarts.load(Ordering::Relaxed)
    }
}

impl Default for ActivityGate {
    fn default() -> Self {
        Self::new()
    }
}
