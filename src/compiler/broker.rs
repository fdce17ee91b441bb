//! The compile broker: the single entry point for compile requests.
//!
//! The broker validates a request, deduplicates it against the tasks already queued or being
//! compiled, assigns a compile id, and queues a task for the tier serving the requested level.
//! Worker threads of each tier take tasks from the tier's queue, call the tier's code generator,
//! and install the result in the code cache.

use super::activity::{ActivityGate, CompilerActivity};
use super::compile_id::CompileIdAllocator;
use super::queue::CompileQueue;
use super::stat::{CompilationRecord, CompileStats, WorkerStat};
use super::task::{ActiveTask, CompileRequest, CompileTask, TaskOutcome};
use super::worker::{CompilerWorker, WorkerShared};
use super::{CompLevel, CompilerTier};
use crate::code::{ArtifactIdentity, CodeCache, CompileKind, CompiledArtifact};
use crate::codegen::{CodeGenerator, Compilable, CompilationResult};
use crate::method::{Method, MethodId};
use crate::util::options::Options;
use enum_map::{enum_map, EnumMap};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

/// Why a compile request did not produce compiled code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NotCompiledReason {
    /// The level is not a compiled level.
    InvalidLevel,
    /// The compiler is turned off.
    CompilerDisabled,
    /// No code generator serves the tier of the level.
    NoCompilerForTier(CompilerTier),
    /// The method is not compilable at the tier.
    NotCompilable,
    /// New compile jobs are temporarily not accepted.
    CompilationStopped,
    /// New compile jobs are never accepted again.
    CompilationDisabledForever,
    /// A blocking compile bailed out.
    Bailout(String),
    /// A blocking compile was superseded.
    Stale,
    /// A blocking compile found no room in the code cache.
    CodeCacheFull,
    /// Compilation shut down before a blocking compile ran.
    Shutdown,
}

impl fmt::Display for NotCompiledReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NotCompiledReason::InvalidLevel => write!(f, "invalid compile level"),
            NotCompiledReason::CompilerDisabled => write!(f, "compiler disabled"),
            NotCompiledReason::NoCompilerForTier(tier) => write!(f, "no {} compiler", tier),
            NotCompiledReason::NotCompilable => write!(f, "method not compilable"),
            NotCompiledReason::CompilationStopped => write!(f, "compilation stopped"),
            NotCompiledReason::CompilationDisabledForever => {
                write!(f, "compilation disabled forever")
            }
            NotCompiledReason::Bailout(reason) => write!(f, "bailout: {}", reason),
            NotCompiledReason::Stale => write!(f, "task became stale"),
            NotCompiledReason::CodeCacheFull => write!(f, "code cache full"),
            NotCompiledReason::Shutdown => write!(f, "compilation shut down"),
        }
    }
}

impl std::error::Error for NotCompiledReason {}

/// The result of [`CompileBroker::compile_method`].
#[derive(Clone, Debug)]
pub enum CompileResult {
    /// Usable compiled code: existing code, or the result of a blocking compile.
    Compiled(Arc<CompiledArtifact>),
    /// A task is queued or being compiled for the request.  The caller may wait on it.
    Enqueued(Arc<CompileTask>),
    NotCompiled(NotCompiledReason),
}

impl CompileResult {
    pub fn artifact(&self) -> Option<&Arc<CompiledArtifact>> {
        match self {
            CompileResult::Compiled(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn task(&self) -> Option<&Arc<CompileTask>> {
        match self {
            CompileResult::Enqueued(task) => Some(task),
            _ => None,
        }
    }

    fn from_outcome(outcome: TaskOutcome) -> Self {
        match outcome {
            TaskOutcome::Installed(artifact) => CompileResult::Compiled(artifact),
            TaskOutcome::Bailout(reason) => {
                CompileResult::NotCompiled(NotCompiledReason::Bailout(reason))
            }
            TaskOutcome::Stale => CompileResult::NotCompiled(NotCompiledReason::Stale),
            TaskOutcome::Shutdown => CompileResult::NotCompiled(NotCompiledReason::Shutdown),
            TaskOutcome::CodeCacheFull => {
                CompileResult::NotCompiled(NotCompiledReason::CodeCacheFull)
            }
        }
    }
}

/// Tasks queued or being compiled, by method and OSR bci.
type InFlightKey = (MethodId, Option<u32>);

pub struct CompileBroker {
    options: Arc<Options>,
    code_cache: Arc<CodeCache>,
    generators: EnumMap<CompilerTier, Option<Arc<dyn CodeGenerator>>>,
    queues: EnumMap<CompilerTier, CompileQueue>,
    /// The broker lock.
    in_flight: Mutex<HashMap<InFlightKey, Arc<CompileTask>>>,
    activity: ActivityGate,
    compile_ids: CompileIdAllocator,
    stats: CompileStats,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_shared: Mutex<Vec<Arc<WorkerShared>>>,
}

impl CompileBroker {
    pub fn new(
        options: Arc<Options>,
        code_cache: Arc<CodeCache>,
        generators: EnumMap<CompilerTier, Option<Arc<dyn CodeGenerator>>>,
    ) -> Self {
        let compile_ids = CompileIdAllocator::new(options.ci_count_osr, options.ci_count_native);
        CompileBroker {
            options,
            code_cache,
            generators,
            queues: enum_map! { tier => CompileQueue::new(tier) },
            in_flight: Mutex::new(HashMap::new()),
            activity: ActivityGate::new(),
            compile_ids,
            stats: CompileStats::default(),
            workers: Mutex::new(vec![]),
            worker_shared: Mutex::new(vec![]),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn code_cache(&self) -> &Arc<CodeCache> {
        &self.code_cache
    }

    pub fn queue(&self, tier: CompilerTier) -> &CompileQueue {
        &self.queues[tier]
    }

    pub fn stats(&self) -> &CompileStats {
        &self.stats
    }

    pub fn activity(&self) -> &ActivityGate {
        &self.activity
    }

    fn compile_kind(method: &Method, osr_bci: Option<u32>) -> CompileKind {
        if method.is_native() {
            CompileKind::Native
        } else if osr_bci.is_some() {
            CompileKind::Osr
        } else {
            CompileKind::Standard
        }
    }

    /// Existing usable code for `method` at `osr_bci` with a level of at least `level`.
    fn existing_code(
        &self,
        method: &Method,
        osr_bci: Option<u32>,
        level: CompLevel,
    ) -> Option<Arc<CompiledArtifact>> {
        match osr_bci {
            None => self.code_cache.lookup(method, level),
            Some(bci) => self.code_cache.lookup_osr(method, bci, level),
        }
    }

    /// Does `method` have usable code at `osr_bci` with a level of at least `level`?
    pub fn compilation_is_complete(
        &self,
        method: &Method,
        osr_bci: Option<u32>,
        level: CompLevel,
    ) -> bool {
        self.existing_code(method, osr_bci, level).is_some()
    }

    /// Is a compilation of `method` queued or in progress?
    pub fn compilation_is_in_queue(&self, method: &Method) -> bool {
        self.in_flight
            .lock()
            .unwrap()
            .iter()
            .any(|((id, _), task)| *id == method.id() && !task.is_complete())
    }

    /// The number of tasks queued for the tier serving `level`.
    pub fn queue_size(&self, level: CompLevel) -> usize {
        match level.tier() {
            Some(tier) => self.queues[tier].size() + self.queues[tier].pending_list_size(),
            None => 0,
        }
    }

    /// Request compilation of a method.
    ///
    /// Returns existing code if the method already has usable code at the requested level.
    /// Otherwise reuses a task already queued or in progress for the same method and bci, or
    /// queues a new one.  Blocking requests, and every request when background compilation is
    /// off, wait for the task to complete.
    pub fn compile_method(&self, request: CompileRequest) -> CompileResult {
        let method = request.method().clone();
        let level = request.comp_level();
        let Some(tier) = level.tier() else {
            return CompileResult::NotCompiled(NotCompiledReason::InvalidLevel);
        };
        if !self.options.use_compiler {
            return CompileResult::NotCompiled(NotCompiledReason::CompilerDisabled);
        }
        if self.generators[tier].is_none() {
            return CompileResult::NotCompiled(NotCompiledReason::NoCompilerForTier(tier));
        }
        if method.is_not_compilable(tier) || (method.is_native() && request.osr_bci().is_some()) {
            return CompileResult::NotCompiled(NotCompiledReason::NotCompilable);
        }

        let forced = request.compile_reason().forces_compilation();
        if !forced {
            if let Some(code) = self.existing_code(&method, request.osr_bci(), level) {
                return CompileResult::Compiled(code);
            }
        }

        match self.activity.state() {
            CompilerActivity::Run => {}
            CompilerActivity::Stop => {
                return CompileResult::NotCompiled(NotCompiledReason::CompilationStopped)
            }
            CompilerActivity::Shutdown => {
                return CompileResult::NotCompiled(NotCompiledReason::CompilationDisabledForever)
            }
        }

        let (task, is_new) = {
            let mut in_flight = self.in_flight.lock().unwrap();
            // Another thread may have finished a compilation since the check above.
            if !forced {
                if let Some(code) = self.existing_code(&method, request.osr_bci(), level) {
                    return CompileResult::Compiled(code);
                }
            }
            let key = (method.id(), request.osr_bci());
            match in_flight.get(&key) {
                Some(task) if !task.is_complete() && !task.is_stale() => (task.clone(), false),
                _ => {
                    let kind = Self::compile_kind(&method, request.osr_bci());
                    let compile_id = self.compile_ids.assign(kind);
                    let task = Arc::new(CompileTask::new(
                        compile_id,
                        &request,
                        self.options.hot_task_count_threshold,
                    ));
                    self.stats.on_task_created();
                    in_flight.insert(key, task.clone());
                    (task, true)
                }
            }
        };

        if is_new {
            trace!("Queueing {} for {}", task, tier);
            let queue = &self.queues[tier];
            if self.options.lock_free_compile_queues && !task.is_priority() {
                queue.add_pending(task.clone());
            } else {
                queue.add(task.clone());
            }
        } else {
            trace!("{} is already queued as {}", method, task);
        }

        if request.is_blocking() || !self.options.background_compilation {
            CompileResult::from_outcome(task.wait_for_completion())
        } else {
            CompileResult::Enqueued(task)
        }
    }

    /// Compile one task on the calling thread.  Used by workers; a test harness may use it to
    /// drive a queue by hand.
    pub fn invoke_compiler_on_method(&self, task: Arc<CompileTask>) -> TaskOutcome {
        let active = ActiveTask::new(task, self);
        let task = active.task().clone();
        let method = task.method();
        let level = task.comp_level();

        if task.is_stale() {
            active.complete(TaskOutcome::Stale);
            return TaskOutcome::Stale;
        }
        let Some(generator) = level.tier().and_then(|tier| self.generators[tier].clone()) else {
            let outcome = TaskOutcome::Bailout(format!("no compiler for level {}", level));
            active.complete(outcome.clone());
            return outcome;
        };

        if self.options.print_compilation {
            info!("{}", task);
        }
        let start = Instant::now();
        let result = generator.compile(&task);
        let record = CompilationRecord {
            method_name: method.name(),
            kind: Self::compile_kind(method, task.osr_bci()),
            level,
            bytecode_size: method.bytecode_size(),
            time: start.elapsed(),
        };

        let outcome = match result {
            CompilationResult::Success(_) if task.is_stale() => {
                debug!("Discarding the result of stale task {}", task);
                self.stats.on_invalidated(&record);
                TaskOutcome::Stale
            }
            CompilationResult::Success(blueprint) => {
                let identity = ArtifactIdentity {
                    compile_id: task.compile_id(),
                    method: method.clone(),
                    comp_level: level,
                    osr_bci: task.osr_bci(),
                };
                match CompiledArtifact::new(identity, blueprint) {
                    Ok(artifact) => self.install(&task, artifact, &record),
                    Err(e) => {
                        warn!("{} produced an invalid artifact for {}: {}", generator.name(), task, e);
                        self.stats.on_failure(&record);
                        TaskOutcome::Bailout(e.to_string())
                    }
                }
            }
            CompilationResult::Bailout { reason, compilable } => {
                debug!("{} bailed out of {}: {}", generator.name(), task, reason);
                self.stats.on_failure(&record);
                match compilable {
                    Compilable::Yes => {}
                    Compilable::NotAtTier => {
                        if let Some(tier) = level.tier() {
                            method.set_not_compilable(tier)
                        }
                    }
                    Compilable::Never => method.set_not_compilable_all(),
                }
                TaskOutcome::Bailout(reason)
            }
        };
        active.complete(outcome.clone());
        outcome
    }

    fn install(
        &self,
        task: &CompileTask,
        artifact: CompiledArtifact,
        record: &CompilationRecord,
    ) -> TaskOutcome {
        let code_size = artifact.insts_size();
        match self.code_cache.install(artifact) {
            Ok(artifact) => {
                if task.is_stale() {
                    // Superseded while installing.
                    artifact.make_not_entrant();
                    self.stats.on_invalidated(record);
                    return TaskOutcome::Stale;
                }
                self.stats
                    .on_success(record, artifact.total_size(), code_size);
                if self.options.print_compilation {
                    info!("{} installed", artifact);
                }
                TaskOutcome::Installed(artifact)
            }
            Err(full) => {
                warn!("Cannot install {}: {}", task, full);
                self.stats.on_failure(record);
                self.handle_full_code_cache();
                TaskOutcome::CodeCacheFull
            }
        }
    }

    /// Called when a worker is done with `task`, whatever the outcome.
    pub(crate) fn finish_task(&self, task: &Arc<CompileTask>) {
        let key = (task.method().id(), task.osr_bci());
        let mut in_flight = self.in_flight.lock().unwrap();
        if in_flight.get(&key).is_some_and(|t| Arc::ptr_eq(t, task)) {
            in_flight.remove(&key);
        }
    }

    /// Mark every queued or in-progress task for `method` stale, e.g. because the method was
    /// redefined.  Returns the number of tasks affected.
    pub fn invalidate_tasks_for(&self, method: MethodId) -> usize {
        let mut in_flight = self.in_flight.lock().unwrap();
        let mut count = 0;
        in_flight.retain(|(id, _), task| {
            if *id != method {
                return true;
            }
            task.mark_stale();
            if let Some(tier) = task.comp_level().tier() {
                self.queues[tier].remove_and_mark_stale(task);
            }
            count += 1;
            false
        });
        drop(in_flight);
        for queue in self.queues.values() {
            count += queue.mark_stale_for(method);
        }
        if count > 0 {
            debug!("Invalidated {} tasks for method {}", count, method);
        }
        count
    }

    /// React to a full code cache.  With code cache flushing, compilation stops until enough
    /// space is freed; otherwise compilation is disabled for good.
    pub fn handle_full_code_cache(&self) {
        if self.activity.should_print_compiler_warning() {
            warn!(
                "Code cache is full ({} of {} bytes used). Compiler has been {}.",
                self.code_cache.used(),
                self.code_cache.capacity(),
                if self.options.use_code_cache_flushing {
                    "stopped"
                } else {
                    "disabled"
                }
            );
        }
        if self.options.use_code_cache_flushing {
            self.activity
                .set_should_compile_new_jobs(CompilerActivity::Stop);
        } else {
            self.activity.disable_compilation_forever();
        }
    }

    /// Restart a stopped broker if enough of the code cache is free.  Returns true if this call
    /// restarted compilation.
    pub fn maybe_restart_compilation(&self) -> bool {
        if self.activity.state() != CompilerActivity::Stop {
            return false;
        }
        let free = self.code_cache.free_ratio_percent();
        if free < self.options.code_cache_restart_free_percent {
            trace!("Not restarting compilation: {}% of the code cache free", free);
            return false;
        }
        self.activity
            .set_should_compile_new_jobs(CompilerActivity::Run)
    }

    pub fn set_should_compile_new_jobs(&self, new_state: CompilerActivity) -> bool {
        self.activity.set_should_compile_new_jobs(new_state)
    }

    pub fn should_compile_new_jobs(&self) -> bool {
        self.activity.should_compile_new_jobs()
    }

    pub fn disable_compilation_forever(&self) {
        self.activity.disable_compilation_forever()
    }

    pub fn is_compilation_disabled_forever(&self) -> bool {
        self.activity.is_compilation_disabled_forever()
    }

    /// Spawn the worker threads of every tier that has a code generator.
    pub fn spawn_workers(self: &Arc<Self>) -> std::io::Result<()> {
        let mut workers = self.workers.lock().unwrap();
        let mut shared = self.worker_shared.lock().unwrap();
        assert!(workers.is_empty(), "Compiler workers already spawned");
        for (tier, generator) in self.generators.iter() {
            let Some(generator) = generator else {
                continue;
            };
            let count = match tier {
                CompilerTier::C1 => self.options.c1_compiler_count,
                CompilerTier::C2 => self.options.c2_compiler_count,
            };
            for ordinal in 0..count {
                let worker = CompilerWorker::new(ordinal, tier, self.clone());
                shared.push(worker.shared().clone());
                let handle = std::thread::Builder::new()
                    .name(worker.shared().name().to_string())
                    .spawn(move || worker.run())?;
                workers.push(handle);
            }
            info!("Started {} {} compiler threads ({})", count, tier, generator.name());
        }
        Ok(())
    }

    /// The number of spawned worker threads.
    pub fn worker_count(&self) -> usize {
        self.worker_shared.lock().unwrap().len()
    }

    /// Snapshot of per-worker statistics.  Workers in the middle of updating their statistics
    /// are skipped.
    pub fn worker_stats(&self) -> Vec<(String, WorkerStat)> {
        self.worker_shared
            .lock()
            .unwrap()
            .iter()
            .filter_map(|w| w.stat().map(|s| (w.name().to_string(), s)))
            .collect()
    }

    /// Shut compilation down: stop accepting new jobs, complete every queued task as
    /// `Shutdown`, wake all waiters and join the workers.  Compilations in progress run to
    /// completion first.
    pub fn shutdown(&self) {
        self.activity.disable_compilation_forever();
        for queue in self.queues.values() {
            queue.shutdown();
        }
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        let current = std::thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("A compiler thread panicked");
            }
        }
        self.in_flight.lock().unwrap().clear();
        debug!("Compile broker shut down");
    }
}

impl fmt::Debug for CompileBroker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CompileBroker")
            .field("activity", &self.activity.state())
            .field("queues", &self.queues)
            .finish()
    }
}
