use super::broker::CompileBroker;
use super::stat::WorkerStat;
use super::task::TaskOutcome;
use super::CompilerTier;
use atomic_refcell::AtomicRefCell;
use std::sync::Arc;
use std::time::Instant;

/// The part of a compiler worker shared with the broker.
pub struct WorkerShared {
    name: String,
    stat: AtomicRefCell<WorkerStat>,
}

impl WorkerShared {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A copy of the worker's statistics, or `None` if the worker is updating them right now.
    pub fn stat(&self) -> Option<WorkerStat> {
        self.stat.try_borrow().ok().map(|s| s.clone())
    }
}

/// A compiler thread.  Takes tasks from the queue of its tier until the queue shuts down.
pub(crate) struct CompilerWorker {
    ordinal: usize,
    tier: CompilerTier,
    broker: Arc<CompileBroker>,
    shared: Arc<WorkerShared>,
}

impl CompilerWorker {
    pub fn new(ordinal: usize, tier: CompilerTier, broker: Arc<CompileBroker>) -> Self {
        CompilerWorker {
            ordinal,
            tier,
            broker,
            shared: Arc::new(WorkerShared {
                name: format!("{}-{}", tier.thread_prefix(), ordinal),
                stat: Default::default(),
            }),
        }
    }

    pub fn shared(&self) -> &Arc<WorkerShared> {
        &self.shared
    }

    pub fn run(self) {
        debug!("Compiler worker {} started", self.shared.name);
        let queue = self.broker.queue(self.tier);
        loop {
            let Some(task) = queue.get() else {
                break;
            };
            let start = Instant::now();
            let outcome = self.broker.invoke_compiler_on_method(task);
            let mut stat = self.shared.stat.borrow_mut();
            stat.compile_time += start.elapsed();
            match outcome {
                TaskOutcome::Stale => stat.tasks_skipped += 1,
                _ => stat.tasks_processed += 1,
            }
        }
        debug!(
            "Compiler worker {} ({} #{}) exiting",
            self.shared.name, self.tier, self.ordinal
        );
    }
}
