//! The compile queue of one compiler tier.
//!
//! Producers either append to the ordered list under the queue lock ([`CompileQueue::add`]) or
//! push onto a lock-free staging queue ([`CompileQueue::add_pending`]) that workers merge into the
//! ordered list before they look for work.  Workers block in [`CompileQueue::get`] while the queue
//! is empty.

use super::task::{CompileTask, TaskOutcome};
use super::CompilerTier;
use crate::method::{Method, MethodId};
use crossbeam::queue::SegQueue;
use itertools::Itertools;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

/// The part of the queue protected by the queue lock.
#[derive(Default)]
struct QueueSync {
    /// Priority tasks first, then normal tasks, each in FIFO order.
    tasks: VecDeque<Arc<CompileTask>>,
    /// Tasks removed as stale, to be completed by the next worker that calls `get`.
    stale: Vec<Arc<CompileTask>>,
    shutdown: bool,
}

pub struct CompileQueue {
    tier: CompilerTier,
    sync: Mutex<QueueSync>,
    /// Workers wait on this while the queue is empty.
    task_available: Condvar,
    pending: SegQueue<Arc<CompileTask>>,
    /// The number of workers in `get` that may be about to wait.
    waiting: AtomicUsize,
    is_shutdown: AtomicBool,
    peak_size: AtomicUsize,
    total_added: AtomicUsize,
    total_removed: AtomicUsize,
}

impl CompileQueue {
    pub fn new(tier: CompilerTier) -> Self {
        CompileQueue {
            tier,
            sync: Mutex::new(QueueSync::default()),
            task_available: Condvar::new(),
            pending: SegQueue::new(),
            waiting: AtomicUsize::new(0),
            is_shutdown: AtomicBool::new(false),
            peak_size: AtomicUsize::new(0),
            total_added: AtomicUsize::new(0),
            total_removed: AtomicUsize::new(0),
        }
    }

    pub fn tier(&self) -> CompilerTier {
        self.tier
    }

    /// Add a task to the ordered list.
    pub fn add(&self, task: Arc<CompileTask>) {
        let mut sync = self.sync.lock().unwrap();
        if sync.shutdown {
            drop(sync);
            task.complete(TaskOutcome::Shutdown);
            return;
        }
        // Keep FIFO order with tasks staged earlier.
        self.transfer_pending_locked(&mut sync);
        self.total_added.fetch_add(1, Ordering::Relaxed);
        self.insert_locked(&mut sync, task);
        self.task_available.notify_one();
    }

    /// Add a task to the staging queue without taking the queue lock, unless a worker is waiting
    /// and needs a wakeup.
    pub fn add_pending(&self, task: Arc<CompileTask>) {
        self.total_added.fetch_add(1, Ordering::Relaxed);
        self.pending.push(task);
        // Pairs with the fence in `get`: either the worker sees the task when it transfers, or we
        // see the worker waiting.
        fence(Ordering::SeqCst);
        if self.is_shutdown.load(Ordering::SeqCst) {
            let _sync = self.sync.lock().unwrap();
            self.drain_pending_as_shutdown();
            return;
        }
        if self.waiting.load(Ordering::SeqCst) > 0 {
            let _sync = self.sync.lock().unwrap();
            self.task_available.notify_one();
        }
    }

    /// Move staged tasks into the ordered list.
    pub fn transfer_pending(&self) {
        let mut sync = self.sync.lock().unwrap();
        self.transfer_pending_locked(&mut sync);
    }

    fn transfer_pending_locked(&self, sync: &mut QueueSync) {
        while let Some(task) = self.pending.pop() {
            if task.is_stale() {
                // Counted as added by `add_pending`.
                self.total_removed.fetch_add(1, Ordering::Relaxed);
                sync.stale.push(task);
            } else {
                self.insert_locked(sync, task);
            }
        }
    }

    fn insert_locked(&self, sync: &mut QueueSync, task: Arc<CompileTask>) {
        if task.is_priority() {
            let position = sync
                .tasks
                .iter()
                .position(|t| !t.is_priority())
                .unwrap_or(sync.tasks.len());
            sync.tasks.insert(position, task);
        } else {
            sync.tasks.push_back(task);
        }
        self.peak_size.fetch_max(sync.tasks.len(), Ordering::Relaxed);
    }

    fn remove_locked(&self, sync: &mut QueueSync, task: &CompileTask) -> Option<Arc<CompileTask>> {
        self.transfer_pending_locked(sync);
        let position = sync.tasks.iter().position(|t| std::ptr::eq(&**t, task))?;
        let removed = sync.tasks.remove(position);
        if removed.is_some() {
            self.total_removed.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove `task` from the queue.  Returns false if it is not queued.
    pub fn remove(&self, task: &CompileTask) -> bool {
        let mut sync = self.sync.lock().unwrap();
        self.remove_locked(&mut sync, task).is_some()
    }

    /// Mark `task` stale and move it to the stale list, from which the next `get` completes it.
    /// Returns false if it is not queued.
    pub fn remove_and_mark_stale(&self, task: &CompileTask) -> bool {
        let mut sync = self.sync.lock().unwrap();
        match self.remove_locked(&mut sync, task) {
            Some(task) => {
                task.mark_stale();
                sync.stale.push(task);
                self.task_available.notify_one();
                true
            }
            None => false,
        }
    }

    /// Mark every queued task for `method` stale.  Returns the number of tasks affected.
    pub fn mark_stale_for(&self, method: MethodId) -> usize {
        let mut sync = self.sync.lock().unwrap();
        self.transfer_pending_locked(&mut sync);
        let (stale, keep): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut sync.tasks)
            .into_iter()
            .partition(|t| t.method().id() == method);
        sync.tasks = keep;
        let count = stale.len();
        self.total_removed.fetch_add(count, Ordering::Relaxed);
        for task in stale {
            task.mark_stale();
            sync.stale.push(task);
        }
        if count > 0 {
            self.task_available.notify_one();
        }
        count
    }

    fn purge_stale_locked(&self, sync: &mut QueueSync) {
        for task in sync.stale.drain(..) {
            task.try_complete(TaskOutcome::Stale);
        }
    }

    /// Take the next task, blocking while the queue is empty.  Returns `None` once the queue is
    /// shut down.
    pub fn get(&self) -> Option<Arc<CompileTask>> {
        let mut sync = self.sync.lock().unwrap();
        loop {
            if sync.shutdown {
                return None;
            }
            self.waiting.fetch_add(1, Ordering::SeqCst);
            fence(Ordering::SeqCst);
            self.transfer_pending_locked(&mut sync);
            if let Some(task) = self.pop_live_locked(&mut sync) {
                self.waiting.fetch_sub(1, Ordering::SeqCst);
                self.purge_stale_locked(&mut sync);
                return Some(task);
            }
            self.purge_stale_locked(&mut sync);
            sync = self.wait(sync);
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn wait<'a>(&self, sync: MutexGuard<'a, QueueSync>) -> MutexGuard<'a, QueueSync> {
        trace!("{} compiler thread waiting for tasks", self.tier);
        self.task_available.wait(sync).unwrap()
    }

    /// Pop the first task that is not stale.  Stale tasks found on the way go to the stale list.
    fn pop_live_locked(&self, sync: &mut QueueSync) -> Option<Arc<CompileTask>> {
        while let Some(task) = sync.tasks.pop_front() {
            self.total_removed.fetch_add(1, Ordering::Relaxed);
            if task.is_stale() {
                sync.stale.push(task);
            } else {
                return Some(task);
            }
        }
        None
    }

    fn drain_pending_as_shutdown(&self) {
        while let Some(task) = self.pending.pop() {
            self.total_removed.fetch_add(1, Ordering::Relaxed);
            task.try_complete(TaskOutcome::Shutdown);
        }
    }

    /// Shut the queue down.  Wakes every waiting worker, and completes every queued task as
    /// `Shutdown` (or `Stale`) so blocking requesters are woken too.
    pub fn shutdown(&self) {
        self.is_shutdown.store(true, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        let mut sync = self.sync.lock().unwrap();
        sync.shutdown = true;
        self.drain_pending_as_shutdown();
        self.purge_stale_locked(&mut sync);
        let drained = sync.tasks.len();
        for task in sync.tasks.drain(..) {
            task.try_complete(TaskOutcome::Shutdown);
        }
        self.total_removed.fetch_add(drained, Ordering::Relaxed);
        self.task_available.notify_all();
        debug!("{} compile queue shut down, {} tasks dropped", self.tier, drained);
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// The number of tasks in the ordered list.
    pub fn size(&self) -> usize {
        self.sync.lock().unwrap().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0 && self.pending.is_empty()
    }

    /// The number of tasks in the staging queue.
    pub fn pending_list_size(&self) -> usize {
        self.pending.len()
    }

    pub fn peak_size(&self) -> usize {
        self.peak_size.load(Ordering::Relaxed)
    }

    pub fn total_added(&self) -> usize {
        self.total_added.load(Ordering::Relaxed)
    }

    pub fn total_removed(&self) -> usize {
        self.total_removed.load(Ordering::Relaxed)
    }

    /// Is any queued task compiling `method`?
    pub fn contains_method(&self, method: &Method) -> bool {
        let mut sync = self.sync.lock().unwrap();
        self.transfer_pending_locked(&mut sync);
        sync.tasks
            .iter()
            .any(|t| t.method().id() == method.id() && !t.is_stale())
    }

    /// Snapshot of the ordered list, in service order.
    pub fn tasks(&self) -> Vec<Arc<CompileTask>> {
        let mut sync = self.sync.lock().unwrap();
        self.transfer_pending_locked(&mut sync);
        sync.tasks.iter().cloned().collect()
    }
}

impl fmt::Display for CompileQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let sync = self.sync.lock().unwrap();
        writeln!(f, "{} compile queue:", self.tier)?;
        if sync.tasks.is_empty() {
            writeln!(f, "  Empty")
        } else {
            writeln!(f, "  {}", sync.tasks.iter().format("\n  "))
        }
    }
}

impl fmt::Debug for CompileQueue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CompileQueue")
            .field("tier", &self.tier)
            .field("peak_size", &self.peak_size())
            .field("total_added", &self.total_added())
            .field("total_removed", &self.total_removed())
            .finish()
    }
}
