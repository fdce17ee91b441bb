//! Compilation scheduling: compile tasks, per-tier compile queues, the compile broker and its
//! worker threads.

mod activity;
mod broker;
mod comp_level;
mod compile_id;
mod queue;
mod stat;
mod task;
mod worker;

pub use self::activity::{ActivityGate, CompilerActivity};
pub use self::broker::{CompileBroker, CompileResult, NotCompiledReason};
pub use self::comp_level::{CompLevel, CompilerTier};
pub use self::compile_id::{CompileId, CompileIdAllocator};
pub use self::queue::CompileQueue;
pub use self::stat::{CompileStats, CompileStatsSnapshot, CompilerStatistics, WorkerStat};
pub use self::task::{CompileReason, CompileRequest, CompileTask, TaskOutcome};
pub use self::worker::WorkerShared;
