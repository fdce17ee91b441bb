//! Benchmarks for adding and taking compile tasks.

use criterion::{BatchSize, Criterion};
use jitcore::compiler::{CompLevel, CompileQueue, CompileRequest, CompileTask, CompilerTier};
use jitcore::method::{Method, MethodId};
use std::hint::black_box;
use std::sync::Arc;

const TASKS: usize = 1024;

fn tasks(priority_every: usize) -> Vec<Arc<CompileTask>> {
    (0..TASKS)
        .map(|i| {
            let method = Method::new(MethodId(i as u64), format!("Bench.m{}", i), 32);
            let request = CompileRequest::new(method, CompLevel::FullProfile)
                .blocking(priority_every != 0 && i % priority_every == 0);
            Arc::new(CompileTask::new(i as u32 + 1, &request, u32::MAX))
        })
        .collect()
}

pub fn bench(c: &mut Criterion) {
    c.bench_function("compile_queue_add_get", |b| {
        b.iter_batched(
            || tasks(0),
            |tasks| {
                let queue = CompileQueue::new(CompilerTier::C1);
                for task in tasks {
                    queue.add(task);
                }
                for _ in 0..TASKS {
                    black_box(queue.get());
                }
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("compile_queue_add_pending_get", |b| {
        b.iter_batched(
            || tasks(0),
            |tasks| {
                let queue = CompileQueue::new(CompilerTier::C1);
                for task in tasks {
                    queue.add_pending(task);
                }
                for _ in 0..TASKS {
                    black_box(queue.get());
                }
            },
            BatchSize::SmallInput,
        )
    });

    c.bench_function("compile_queue_priority_insert", |b| {
        b.iter_batched(
            || tasks(16),
            |tasks| {
                let queue = CompileQueue::new(CompilerTier::C1);
                for task in tasks {
                    queue.add(task);
                }
                black_box(queue.size());
            },
            BatchSize::SmallInput,
        )
    });
}
