//! The top-level jitcore instance.

use crate::code::{
    CodeCache, CompiledArtifact, DependencyChange, OopsDoProcessor,
};
use crate::codegen::CodeGenerator;
use crate::compiler::{
    CompLevel, CompileBroker, CompileRequest, CompileResult, CompilerTier,
};
use crate::method::Method;
use crate::util::options::Options;
use enum_map::EnumMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Builds a [`JitCore`] instance.  Options start from their defaults, overridden by `JITCORE_*`
/// environment variables, and can then be set programmatically.
pub struct JitCoreBuilder {
    pub options: Options,
    generators: EnumMap<CompilerTier, Option<Arc<dyn CodeGenerator>>>,
}

impl JitCoreBuilder {
    pub fn new() -> Self {
        JitCoreBuilder {
            options: Options::default(),
            generators: EnumMap::default(),
        }
    }

    /// Like `new`, but ignores `JITCORE_*` environment variables.
    pub fn new_no_env_vars() -> Self {
        JitCoreBuilder {
            options: Options::without_env(),
            generators: EnumMap::default(),
        }
    }

    /// Set an option by name.  Returns false if the option does not exist or the value is
    /// invalid.
    pub fn set_option(&mut self, name: &str, val: &str) -> bool {
        self.options.set_from_str(name, val)
    }

    /// Use `generator` for compilation levels 1 to 3.
    pub fn c1_compiler(&mut self, generator: Arc<dyn CodeGenerator>) -> &mut Self {
        self.generators[CompilerTier::C1] = Some(generator);
        self
    }

    /// Use `generator` for compilation level 4.
    pub fn c2_compiler(&mut self, generator: Arc<dyn CodeGenerator>) -> &mut Self {
        self.generators[CompilerTier::C2] = Some(generator);
        self
    }

    pub fn build(&self) -> JitCore {
        JitCore::new(Arc::new(self.options.clone()), self.generators.clone())
    }
}

impl Default for JitCoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A jitcore instance: the code cache and the compile broker, with the entry points used by the
/// execution engine and by the garbage collector.
pub struct JitCore {
    pub options: Arc<Options>,
    code_cache: Arc<CodeCache>,
    broker: Arc<CompileBroker>,
    initialized: AtomicBool,
}

impl JitCore {
    pub fn new(
        options: Arc<Options>,
        generators: EnumMap<CompilerTier, Option<Arc<dyn CodeGenerator>>>,
    ) -> Self {
        match crate::util::logger::try_init() {
            Ok(_) => debug!("jitcore initialized the logger."),
            Err(_) => debug!(
                "jitcore failed to initialize the logger. Possibly a logger has been initialized by user."
            ),
        }
        info!("Initializing {}", crate::build_info::build_summary());
        let code_cache = Arc::new(CodeCache::new(options.reserved_code_cache_size));
        let broker = Arc::new(CompileBroker::new(
            options.clone(),
            code_cache.clone(),
            generators,
        ));
        JitCore {
            options,
            code_cache,
            broker,
            initialized: AtomicBool::new(false),
        }
    }

    /// Start the compiler threads.  Until this is called, requests are queued but not compiled.
    pub fn initialize_compilation(&self) -> std::io::Result<()> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            warn!("Compilation is already initialized");
            return Ok(());
        }
        if !self.options.use_compiler {
            info!("Compiler disabled, no compiler threads started");
            return Ok(());
        }
        self.broker.spawn_workers()
    }

    pub fn code_cache(&self) -> &Arc<CodeCache> {
        &self.code_cache
    }

    pub fn broker(&self) -> &Arc<CompileBroker> {
        &self.broker
    }

    // Execution engine interface.

    pub fn compile_method(&self, request: CompileRequest) -> CompileResult {
        self.broker.compile_method(request)
    }

    /// The usable code of `method` at `level` or above.
    pub fn lookup(&self, method: &Method, level: CompLevel) -> Option<Arc<CompiledArtifact>> {
        self.code_cache.lookup(method, level)
    }

    /// The usable OSR code of `method` at `bci`, at `level` or above.
    pub fn lookup_osr(
        &self,
        method: &Method,
        bci: u32,
        level: CompLevel,
    ) -> Option<Arc<CompiledArtifact>> {
        self.code_cache.lookup_osr(method, bci, level)
    }

    pub fn compilation_is_in_queue(&self, method: &Method) -> bool {
        self.broker.compilation_is_in_queue(method)
    }

    /// A class was loaded or a method redefined.  Compiled code depending on the old state is
    /// made not entrant; tasks for a redefined method become stale.
    pub fn on_dependency_change(&self, change: &DependencyChange) -> usize {
        if let DependencyChange::MethodRedefined { method } = change {
            self.broker.invalidate_tasks_for(*method);
        }
        self.code_cache.mark_for_deoptimization(change)
    }

    // GC interface.

    pub fn marking_prologue(&self) {
        self.code_cache.marking_prologue()
    }

    pub fn marking_epilogue(&self) -> usize {
        self.code_cache.marking_epilogue()
    }

    pub fn process_weak<P: OopsDoProcessor + ?Sized>(
        &self,
        artifact: &Arc<CompiledArtifact>,
        processor: &mut P,
    ) {
        self.code_cache.process_weak(artifact, processor)
    }

    pub fn process_strong<P: OopsDoProcessor + ?Sized>(
        &self,
        artifact: &Arc<CompiledArtifact>,
        processor: &mut P,
    ) {
        self.code_cache.process_strong(artifact, processor)
    }

    pub fn for_each_artifact<F: FnMut(&Arc<CompiledArtifact>)>(&self, f: F) {
        self.code_cache.for_each_artifact(f)
    }

    pub fn on_gc_marking_cycle_start(&self) {
        self.code_cache.on_gc_marking_cycle_start()
    }

    pub fn on_gc_marking_cycle_finish(&self) {
        self.code_cache.on_gc_marking_cycle_finish()
    }

    /// Unlink artifacts that are dead or no longer on any stack.
    pub fn do_unloading<F: FnMut(&CompiledArtifact) -> bool>(&self, is_alive: F) -> usize {
        self.code_cache.do_unloading(is_alive)
    }

    /// Free unlinked artifacts, and restart compilation if it was stopped for lack of space.
    pub fn purge_unlinked(&self) -> usize {
        let purged = self.code_cache.purge_unlinked();
        self.broker.maybe_restart_compilation();
        purged
    }

    /// Shut compilation down and join the compiler threads.
    pub fn shutdown(&self) {
        self.broker.shutdown();
        if self.options.print_compilation {
            self.broker.stats().print_times();
        }
    }
}

impl Drop for JitCore {
    fn drop(&mut self) {
        self.broker.shutdown();
    }
}
