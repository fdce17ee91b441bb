//! Compilation statistics.

use super::CompLevel;
use crate::code::CompileKind;
use enum_map::EnumMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Counters for compiles at one level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompilerStatistics {
    pub standard_count: usize,
    pub osr_count: usize,
    pub native_count: usize,
    pub standard_bytes: usize,
    pub osr_bytes: usize,
    pub time: Duration,
}

impl CompilerStatistics {
    pub fn count(&self) -> usize {
        self.standard_count + self.osr_count + self.native_count
    }
}

/// A snapshot of [`CompileStats`].
#[derive(Clone, Debug, Default)]
pub struct CompileStatsSnapshot {
    pub total_compile_count: usize,
    pub total_bailout_count: usize,
    pub total_invalidated_count: usize,
    pub total_standard_compile_count: usize,
    pub total_osr_compile_count: usize,
    pub total_native_compile_count: usize,
    pub total_tasks_created: usize,
    pub sum_standard_bytes_compiled: usize,
    pub sum_osr_bytes_compiled: usize,
    pub sum_artifact_size: usize,
    pub sum_artifact_code_size: usize,
    pub total_compilation_time: Duration,
    pub peak_compilation_time: Duration,
    pub per_level: EnumMap<CompLevel, CompilerStatistics>,
    pub last_compiled_method: Option<String>,
    pub last_failed_method: Option<String>,
}

#[derive(Default)]
struct MethodNames {
    last_compiled: Option<String>,
    last_failed: Option<String>,
}

/// Statistics of one broker, shared by all its workers.
#[derive(Default)]
pub struct CompileStats {
    total_compile_count: AtomicUsize,
    total_bailout_count: AtomicUsize,
    total_invalidated_count: AtomicUsize,
    total_standard_compile_count: AtomicUsize,
    total_osr_compile_count: AtomicUsize,
    total_native_compile_count: AtomicUsize,
    total_tasks_created: AtomicUsize,
    sum_standard_bytes_compiled: AtomicUsize,
    sum_osr_bytes_compiled: AtomicUsize,
    sum_artifact_size: AtomicUsize,
    sum_artifact_code_size: AtomicUsize,
    total_compilation_nanos: AtomicU64,
    peak_compilation_nanos: AtomicU64,
    per_level: Mutex<EnumMap<CompLevel, CompilerStatistics>>,
    names: Mutex<MethodNames>,
}

/// What is known about one finished compilation.
pub(crate) struct CompilationRecord<'a> {
    pub method_name: &'a str,
    pub kind: CompileKind,
    pub level: CompLevel,
    pub bytecode_size: usize,
    pub time: Duration,
}

impl CompileStats {
    pub(crate) fn on_task_created(&self) {
        self.total_tasks_created.fetch_add(1, Ordering::Relaxed);
    }

    fn record_time(&self, time: Duration) {
        let nanos = time.as_nanos() as u64;
        self.total_compilation_nanos
            .fetch_add(nanos, Ordering::Relaxed);
        self.peak_compilation_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    /// A compilation was installed.
    pub(crate) fn on_success(
        &self,
        record: &CompilationRecord,
        artifact_size: usize,
        code_size: usize,
    ) {
        self.record_time(record.time);
        self.total_compile_count.fetch_add(1, Ordering::Relaxed);
        self.sum_artifact_size
            .fetch_add(artifact_size, Ordering::Relaxed);
        self.sum_artifact_code_size
            .fetch_add(code_size, Ordering::Relaxed);
        {
            let mut per_level = self.per_level.lock().unwrap();
            let level = &mut per_level[record.level];
            level.time += record.time;
            match record.kind {
                CompileKind::Standard => {
                    self.total_standard_compile_count
                        .fetch_add(1, Ordering::Relaxed);
                    self.sum_standard_bytes_compiled
                        .fetch_add(record.bytecode_size, Ordering::Relaxed);
                    level.standard_count += 1;
                    level.standard_bytes += record.bytecode_size;
                }
                CompileKind::Osr => {
                    self.total_osr_compile_count.fetch_add(1, Ordering::Relaxed);
                    self.sum_osr_bytes_compiled
                        .fetch_add(record.bytecode_size, Ordering::Relaxed);
                    level.osr_count += 1;
                    level.osr_bytes += record.bytecode_size;
                }
                CompileKind::Native => {
                    self.total_native_compile_count
                        .fetch_add(1, Ordering::Relaxed);
                    level.native_count += 1;
                }
            }
        }
        self.names.lock().unwrap().last_compiled = Some(record.method_name.to_string());
    }

    /// A compilation bailed out, or could not be installed.
    pub(crate) fn on_failure(&self, record: &CompilationRecord) {
        self.record_time(record.time);
        self.total_bailout_count.fetch_add(1, Ordering::Relaxed);
        self.names.lock().unwrap().last_failed = Some(record.method_name.to_string());
    }

    /// A compilation finished after its task became stale.
    pub(crate) fn on_invalidated(&self, record: &CompilationRecord) {
        self.record_time(record.time);
        self.total_invalidated_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CompileStatsSnapshot {
        let names = self.names.lock().unwrap();
        CompileStatsSnapshot {
            total_compile_count: self.total_compile_count.load(Ordering::Relaxed),
            total_bailout_count: self.total_bailout_count.load(Ordering::Relaxed),
            total_invalidated_count: self.total_invalidated_count.load(Ordering::Relaxed),
            total_standard_compile_count: self.total_standard_compile_count.load(Ordering::Relaxed),
            total_osr_compile_count: self.total_osr_compile_count.load(Ordering::Relaxed),
            total_native_compile_count: self.total_native_compile_count.load(Ordering::Relaxed),
            total_tasks_created: self.total_tasks_created.load(Ordering::Relaxed),
            sum_standard_bytes_compiled: self.sum_standard_bytes_compiled.load(Ordering::Relaxed),
            sum_osr_bytes_compiled: self.sum_osr_bytes_compiled.load(Ordering::Relaxed),
            sum_artifact_size: self.sum_artifact_size.load(Ordering::Relaxed),
            sum_artifact_code_size: self.sum_artifact_code_size.load(Ordering::Relaxed),
            total_compilation_time: Duration::from_nanos(
                self.total_compilation_nanos.load(Ordering::Relaxed),
            ),
            peak_compilation_time: Duration::from_nanos(
                self.peak_compilation_nanos.load(Ordering::Relaxed),
            ),
            per_level: self.per_level.lock().unwrap().clone(),
            last_compiled_method: names.last_compiled.clone(),
            last_failed_method: names.last_failed.clone(),
        }
    }

    /// Log a summary of the compilation times.
    pub fn print_times(&self) {
        let s = self.snapshot();
        info!(
            "Accumulated compiler times: total {:.3}s, peak {:.3}ms",
            s.total_compilation_time.as_secs_f64(),
            s.peak_compilation_time.as_secs_f64() * 1000.0
        );
        info!(
            "  Compiled: {} (standard {}, OSR {}, native {}), bailouts {}, invalidated {}",
            s.total_compile_count,
            s.total_standard_compile_count,
            s.total_osr_compile_count,
            s.total_native_compile_count,
            s.total_bailout_count,
            s.total_invalidated_count
        );
        for (level, stats) in s.per_level.iter().filter(|(_, stats)| stats.count() > 0) {
            let secs = stats.time.as_secs_f64();
            let bytes = stats.standard_bytes + stats.osr_bytes;
            let speed = if secs > 0.0 { bytes as f64 / secs } else { 0.0 };
            info!(
                "  Tier {}: {} methods, {} bytes, {:.3}s, {:.0} bytes/s",
                level as u8,
                stats.count(),
                bytes,
                secs,
                speed
            );
        }
        info!(
            "  Artifact total size: {} bytes, code size: {} bytes",
            s.sum_artifact_size, s.sum_artifact_code_size
        );
    }
}

/// Per-worker statistics, only updated by the owning worker.
#[derive(Clone, Debug, Default)]
pub struct WorkerStat {
    pub tasks_processed: usize,
    pub tasks_skipped: usize,
    pub compile_time: Duration,
}
