//! Benchmarks for one root marking cycle over the code cache.

use criterion::Criterion;
use jitcore::util::test_util::fixtures::{installed_artifacts, CountingProcessor};

const ARTIFACTS: usize = 4096;

pub fn bench(c: &mut Criterion) {
    let (cache, artifacts) = installed_artifacts(ARTIFACTS);

    c.bench_function("root_marking_weak_cycle", |b| {
        b.iter(|| {
            let mut p = CountingProcessor::default();
            cache.marking_prologue();
            for a in artifacts.iter() {
                cache.process_weak(a, &mut p);
            }
            cache.marking_epilogue()
        })
    });

    c.bench_function("root_marking_weak_then_strong_cycle", |b| {
        b.iter(|| {
            let mut p = CountingProcessor::default();
            cache.marking_prologue();
            for a in artifacts.iter() {
                cache.process_weak(a, &mut p);
            }
            for a in artifacts.iter().step_by(2) {
                cache.process_strong(a, &mut p);
            }
            cache.marking_epilogue()
        })
    });

    c.bench_function("root_marking_try_claim_cycle", |b| {
        b.iter(|| {
            cache.marking_prologue();
            for a in artifacts.iter() {
                a.oops_do_try_claim(cache.root_marking());
            }
            cache.marking_epilogue()
        })
    });
}
