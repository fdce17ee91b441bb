use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::fixtures::{blueprint, osr_blueprint};
use crate::codegen::{CodeGenerator, CompilationResult, Compilable};
use crate::compiler::CompileTask;

/// The size of the instructions region of generated artifacts.  Large enough that a 64 byte code
/// cache cannot hold one.
pub const MOCK_INSTS_BYTES: usize = 64;

enum Mode {
    Succeed,
    BailOut(Compilable),
    /// Produce an OSR entry point for standard tasks and none for OSR tasks.
    MismatchOsrEntry,
}

/// A code generator that produces fixture artifacts, optionally slowly, or bails out, or produces
/// malformed blueprints.
pub struct MockGenerator {
    name: String,
    mode: Mutex<Mode>,
    delay: Mutex<Option<Duration>>,
    compiled: AtomicUsize,
}

impl MockGenerator {
    pub fn new(name: &str) -> Self {
        MockGenerator {
            name: name.to_string(),
            mode: Mutex::new(Mode::Succeed),
            delay: Mutex::new(None),
            compiled: AtomicUsize::new(0),
        }
    }

    /// Fail every following compilation.
    pub fn bail_out_with(&self, compilable: Compilable) {
        *self.mode.lock().unwrap() = Mode::BailOut(compilable);
    }

    /// Produce malformed blueprints in every following compilation.
    pub fn mismatch_osr_entry(&self) {
        *self.mode.lock().unwrap() = Mode::MismatchOsrEntry;
    }

    pub fn succeed(&self) {
        *self.mode.lock().unwrap() = Mode::Succeed;
    }

    /// Sleep for `delay` in every following compilation.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// The number of calls to `compile`, including bailouts.
    pub fn compile_count(&self) -> usize {
        self.compiled.load(Ordering::SeqCst)
    }
}

impl CodeGenerator for MockGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn compile(&self, task: &CompileTask) -> CompilationResult {
        self.compiled.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        match *self.mode.lock().unwrap() {
            Mode::Succeed if task.is_osr() => {
                CompilationResult::Success(osr_blueprint(MOCK_INSTS_BYTES))
            }
            Mode::Succeed => CompilationResult::Success(blueprint(MOCK_INSTS_BYTES)),
            Mode::MismatchOsrEntry if task.is_osr() => {
                CompilationResult::Success(blueprint(MOCK_INSTS_BYTES))
            }
            Mode::MismatchOsrEntry => CompilationResult::Success(osr_blueprint(MOCK_INSTS_BYTES)),
            Mode::BailOut(compilable) => CompilationResult::Bailout {
                reason: format!("{} refuses to compile", self.name),
                compilable,
            },
        }
    }
}
