use super::broker::CompileBroker;
use super::{CompLevel, CompileId};
use crate::code::CompiledArtifact;
use crate::method::MethodRef;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};
use strum_macros::Display;

/// Why a compilation was requested.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum CompileReason {
    None,
    InvocationCount,
    BackedgeCount,
    Tiered,
    Rtm,
    Jvmci,
    /// Compile-the-world testing.
    Ctw,
    /// Replaying a recorded compilation.
    Replay,
    /// Requested by a testing API.
    Whitebox,
    MustBeCompiled,
    Bootstrap,
}

impl CompileReason {
    /// Compile even if the method already has usable code at the requested level.
    pub fn forces_compilation(self) -> bool {
        matches!(self, CompileReason::Whitebox | CompileReason::Replay)
    }
}

/// A request to compile a method.  Built by the caller and passed to
/// [`CompileBroker::compile_method`].
#[derive(Clone, Debug)]
pub struct CompileRequest {
    method: MethodRef,
    osr_bci: Option<u32>,
    comp_level: CompLevel,
    hot_method: Option<MethodRef>,
    hot_count: u32,
    reason: CompileReason,
    blocking: bool,
}

impl CompileRequest {
    /// A non-blocking standard-entry compile request.
    pub fn new(method: MethodRef, comp_level: CompLevel) -> Self {
        CompileRequest {
            method,
            osr_bci: None,
            comp_level,
            hot_method: None,
            hot_count: 0,
            reason: CompileReason::None,
            blocking: false,
        }
    }

    /// Compile for on-stack replacement at `bci`.
    pub fn osr(mut self, bci: u32) -> Self {
        self.osr_bci = Some(bci);
        self
    }

    /// The method whose hotness triggered this request, and its hotness count.
    pub fn hot(mut self, hot_method: MethodRef, hot_count: u32) -> Self {
        self.hot_method = Some(hot_method);
        self.hot_count = hot_count;
        self
    }

    pub fn reason(mut self, reason: CompileReason) -> Self {
        self.reason = reason;
        self
    }

    /// Make the caller wait for the compilation to finish.
    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    pub fn osr_bci(&self) -> Option<u32> {
        self.osr_bci
    }

    pub fn comp_level(&self) -> CompLevel {
        self.comp_level
    }

    pub fn compile_reason(&self) -> CompileReason {
        self.reason
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }
}

/// How a compile task ended.
#[derive(Clone, Debug)]
pub enum TaskOutcome {
    /// The compiled artifact was installed.
    Installed(Arc<CompiledArtifact>),
    /// The code generator bailed out.
    Bailout(String),
    /// The task was superseded before it was compiled or installed.
    Stale,
    /// Compilation was shut down before the task ran.
    Shutdown,
    /// There was no room in the code cache.
    CodeCacheFull,
}

impl TaskOutcome {
    /// The installed artifact, if the compilation succeeded.
    pub fn artifact(&self) -> Option<&Arc<CompiledArtifact>> {
        match self {
            TaskOutcome::Installed(artifact) => Some(artifact),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Installed(_))
    }
}

#[derive(Clone, Debug)]
enum TaskState {
    Queued,
    InProgress,
    Complete(TaskOutcome),
}

/// One compilation.  Owned by a compile queue while queued, then by exactly one worker.  Blocking
/// requesters wait on the task until it completes.
pub struct CompileTask {
    compile_id: CompileId,
    method: MethodRef,
    osr_bci: Option<u32>,
    comp_level: CompLevel,
    reason: CompileReason,
    hot_method: Option<MethodRef>,
    hot_count: u32,
    is_blocking: bool,
    is_priority: bool,
    is_stale: AtomicBool,
    created: Instant,
    state: Mutex<TaskState>,
    completed: Condvar,
}

impl CompileTask {
    /// Create a task for `request`.  The task is a priority task if it is blocking, or if its hot
    /// count is at least `hot_count_threshold`.
    pub fn new(compile_id: CompileId, request: &CompileRequest, hot_count_threshold: u32) -> Self {
        let is_hot = request.hot_method.is_some() && request.hot_count >= hot_count_threshold;
        CompileTask {
            compile_id,
            method: request.method.clone(),
            osr_bci: request.osr_bci,
            comp_level: request.comp_level,
            reason: request.reason,
            hot_method: request.hot_method.clone(),
            hot_count: request.hot_count,
            is_blocking: request.blocking,
            is_priority: request.blocking || is_hot,
            is_stale: AtomicBool::new(false),
            created: Instant::now(),
            state: Mutex::new(TaskState::Queued),
            completed: Condvar::new(),
        }
    }

    pub fn compile_id(&self) -> CompileId {
        self.compile_id
    }

    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    pub fn osr_bci(&self) -> Option<u32> {
        self.osr_bci
    }

    pub fn is_osr(&self) -> bool {
        self.osr_bci.is_some()
    }

    pub fn comp_level(&self) -> CompLevel {
        self.comp_level
    }

    pub fn compile_reason(&self) -> CompileReason {
        self.reason
    }

    pub fn hot_method(&self) -> Option<&MethodRef> {
        self.hot_method.as_ref()
    }

    pub fn hot_count(&self) -> u32 {
        self.hot_count
    }

    pub fn is_blocking(&self) -> bool {
        self.is_blocking
    }

    /// Priority tasks are served ahead of normal tasks.
    pub fn is_priority(&self) -> bool {
        self.is_priority
    }

    /// Mark the task as superseded.  A queued stale task is skipped; a stale task being compiled
    /// runs to completion, but its result is discarded.
    pub fn mark_stale(&self) {
        if !self.is_stale.swap(true, Ordering::AcqRel) {
            debug!("Task {} is stale", self);
        }
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale.load(Ordering::Acquire)
    }

    /// Time since the task was created.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub(crate) fn mark_in_progress(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(
            matches!(*state, TaskState::Queued),
            "Task {} started twice",
            self.compile_id
        );
        *state = TaskState::InProgress;
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(*self.state.lock().unwrap(), TaskState::InProgress)
    }

    pub fn is_complete(&self) -> bool {
        matches!(*self.state.lock().unwrap(), TaskState::Complete(_))
    }

    /// The outcome, if the task is complete.
    pub fn outcome(&self) -> Option<TaskOutcome> {
        match &*self.state.lock().unwrap() {
            TaskState::Complete(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    /// Complete the task and wake every waiter.  Returns false if it was already complete.
    pub(crate) fn try_complete(&self, outcome: TaskOutcome) -> bool {
        let mut state = self.state.lock().unwrap();
        if matches!(*state, TaskState::Complete(_)) {
            return false;
        }
        trace!("Task {} complete: {:?}", self.compile_id, outcome);
        *state = TaskState::Complete(outcome);
        self.completed.notify_all();
        true
    }

    /// Complete the task and wake every waiter.  A task completes exactly once.
    pub(crate) fn complete(&self, outcome: TaskOutcome) {
        let completed = self.try_complete(outcome);
        assert!(completed, "Task {} completed twice", self.compile_id);
    }

    /// Block until the task completes.
    pub fn wait_for_completion(&self) -> TaskOutcome {
        let mut state = self.state.lock().unwrap();
        loop {
            if let TaskState::Complete(outcome) = &*state {
                return outcome.clone();
            }
            state = self.completed.wait(state).unwrap();
        }
    }

    /// Block until the task completes or `timeout` elapses.
    pub fn wait_for_completion_timeout(&self, timeout: Duration) -> Option<TaskOutcome> {
        let state = self.state.lock().unwrap();
        let (state, _) = self
            .completed
            .wait_timeout_while(state, timeout, |s| !matches!(s, TaskState::Complete(_)))
            .unwrap();
        match &*state {
            TaskState::Complete(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for CompileTask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:>6} {} {}",
            self.compile_id, self.comp_level as u8, self.method
        )?;
        if let Some(bci) = self.osr_bci {
            write!(f, " @ {}", bci)?;
        }
        if self.is_blocking {
            write!(f, " (blocking)")?;
        }
        Ok(())
    }
}

impl fmt::Debug for CompileTask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CompileTask")
            .field("compile_id", &self.compile_id)
            .field("method", &self.method.name())
            .field("osr_bci", &self.osr_bci)
            .field("comp_level", &self.comp_level)
            .field("reason", &self.reason)
            .field("is_priority", &self.is_priority)
            .field("is_stale", &self.is_stale())
            .finish()
    }
}

/// A task held by a worker while it compiles.  Dropping the guard finishes the task with the
/// broker; if the worker did not complete the task (for example because the code generator
/// panicked), it is completed as a bailout so blocking waiters do not hang.
pub(crate) struct ActiveTask<'a> {
    task: Arc<CompileTask>,
    broker: &'a CompileBroker,
}

impl<'a> ActiveTask<'a> {
    pub fn new(task: Arc<CompileTask>, broker: &'a CompileBroker) -> Self {
        task.mark_in_progress();
        ActiveTask { task, broker }
    }

    pub fn task(&self) -> &Arc<CompileTask> {
        &self.task
    }

    pub fn complete(self, outcome: TaskOutcome) {
        self.task.complete(outcome);
    }
}

impl Drop for ActiveTask<'_> {
    fn drop(&mut self) {
        if self.task.try_complete(TaskOutcome::Bailout("compilation abandoned".to_string())) {
            warn!("Task {} abandoned", self.task);
        }
        self.broker.finish_task(&self.task);
    }
}
