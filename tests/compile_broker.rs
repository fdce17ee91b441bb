use jitcore::code::ArtifactState;
use jitcore::compiler::{
    CompLevel, CompileReason, CompileRequest, CompileResult, CompilerTier, NotCompiledReason,
    TaskOutcome,
};
use jitcore::method::{Method, MethodId};
use jitcore::util::test_util::mock_generator::MockGenerator;
use jitcore::util::test_util::panic_after;
use jitcore::{JitCore, JitCoreBuilder};
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn builder(c1: Arc<MockGenerator>, c2: Arc<MockGenerator>) -> JitCoreBuilder {
    let mut builder = JitCoreBuilder::new_no_env_vars();
    builder.options.c1_compiler_count = 2;
    builder.options.c2_compiler_count = 1;
    builder.c1_compiler(c1).c2_compiler(c2);
    builder
}

fn jit_with_workers(c1: Arc<MockGenerator>, c2: Arc<MockGenerator>) -> Arc<JitCore> {
    let jit = Arc::new(builder(c1, c2).build());
    jit.initialize_compilation().unwrap();
    jit
}

#[test]
fn blocking_request_overtakes_queued_tasks() {
    panic_after(10_000, || {
        let mut builder = builder(
            Arc::new(MockGenerator::new("c1")),
            Arc::new(MockGenerator::new("c2")),
        );
        builder.options.lock_free_compile_queues = false;
        // No workers: this test takes tasks off the queue itself.
        let jit = Arc::new(builder.build());
        let a = Method::new(MethodId(1), "Order.a", 20);
        let b = Method::new(MethodId(2), "Order.b", 20);
        let c = Method::new(MethodId(3), "Order.c", 20);

        assert!(jit
            .compile_method(CompileRequest::new(a.clone(), CompLevel::Simple))
            .task()
            .is_some());
        let requester = {
            let jit = jit.clone();
            let b = b.clone();
            std::thread::spawn(move || {
                jit.compile_method(CompileRequest::new(b, CompLevel::Simple).blocking(true))
            })
        };
        while jit.broker().queue_size(CompLevel::Simple) < 2 {
            std::thread::yield_now();
        }
        assert!(jit
            .compile_method(CompileRequest::new(c.clone(), CompLevel::Simple))
            .task()
            .is_some());

        let queue = jit.broker().queue(CompilerTier::C1);
        let order: Vec<String> = (0..3)
            .map(|_| {
                let task = queue.get().unwrap();
                let name = task.method().name().to_string();
                assert!(jit.broker().invoke_compiler_on_method(task).is_success());
                name
            })
            .collect();
        assert_eq!(order, vec!["Order.b", "Order.a", "Order.c"]);

        let result = requester.join().unwrap();
        let artifact = result.artifact().expect("blocking request returns code");
        assert!(Arc::ptr_eq(
            artifact,
            &jit.lookup(&b, CompLevel::Simple).unwrap()
        ));
        assert!(queue.is_empty());
    });
}

#[test]
fn concurrent_requests_compile_once() {
    panic_after(10_000, || {
        let c1 = Arc::new(MockGenerator::new("c1"));
        c1.set_delay(Duration::from_millis(20));
        let jit = jit_with_workers(c1.clone(), Arc::new(MockGenerator::new("c2")));
        let method = Method::new(MethodId(7), "Hot.loop", 100);
        let barrier = Arc::new(Barrier::new(8));

        let results: Vec<CompileResult> = (0..8)
            .map(|_| {
                let jit = jit.clone();
                let method = method.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    jit.compile_method(
                        CompileRequest::new(method, CompLevel::FullProfile).blocking(true),
                    )
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        let first = results[0].artifact().unwrap().clone();
        for result in results.iter() {
            assert!(Arc::ptr_eq(result.artifact().unwrap(), &first));
        }
        assert_eq!(c1.compile_count(), 1);
        assert_eq!(jit.broker().stats().snapshot().total_compile_count, 1);
        jit.shutdown();
    });
}

#[test]
fn concurrent_background_requests_share_one_task() {
    panic_after(10_000, || {
        let c1 = Arc::new(MockGenerator::new("c1"));
        c1.set_delay(Duration::from_millis(200));
        let jit = jit_with_workers(c1.clone(), Arc::new(MockGenerator::new("c2")));
        let method = Method::new(MethodId(8), "Warm.loop", 100);
        let barrier = Arc::new(Barrier::new(8));

        let results: Vec<CompileResult> = (0..8)
            .map(|_| {
                let jit = jit.clone();
                let method = method.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    jit.compile_method(CompileRequest::new(method, CompLevel::Simple))
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        let tasks: Vec<_> = results.iter().filter_map(|r| r.task()).collect();
        assert!(!tasks.is_empty());
        assert!(tasks.iter().all(|t| Arc::ptr_eq(*t, tasks[0])));
        let artifact = match tasks[0].wait_for_completion() {
            TaskOutcome::Installed(artifact) => artifact,
            other => panic!("unexpected outcome {:?}", other),
        };
        // A request that arrived after installation sees the same code.
        for result in results.iter() {
            if let Some(code) = result.artifact() {
                assert!(Arc::ptr_eq(code, &artifact));
            }
        }
        assert_eq!(c1.compile_count(), 1);
        assert_eq!(jit.code_cache().len(), 1);
        jit.shutdown();
    });
}

#[test]
fn worker_survives_malformed_artifact() {
    panic_after(10_000, || {
        let c1 = Arc::new(MockGenerator::new("c1"));
        c1.mismatch_osr_entry();
        let mut builder = builder(c1.clone(), Arc::new(MockGenerator::new("c2")));
        builder.options.c1_compiler_count = 1;
        let jit = Arc::new(builder.build());
        jit.initialize_compilation().unwrap();

        let broken = Method::new(MethodId(1), "Broken.m", 10);
        let result =
            jit.compile_method(CompileRequest::new(broken, CompLevel::Simple).blocking(true));
        assert!(matches!(
            result,
            CompileResult::NotCompiled(NotCompiledReason::Bailout(_))
        ));
        assert!(jit.code_cache().is_empty());

        // The only C1 worker is still serving its queue.
        c1.succeed();
        let fine = Method::new(MethodId(2), "Fine.m", 10);
        let result =
            jit.compile_method(CompileRequest::new(fine.clone(), CompLevel::Simple).blocking(true));
        assert!(Arc::ptr_eq(
            result.artifact().unwrap(),
            &jit.lookup(&fine, CompLevel::Simple).unwrap()
        ));
        assert_eq!(c1.compile_count(), 2);
        assert_eq!(jit.broker().stats().snapshot().total_bailout_count, 1);
        jit.shutdown();
    });
}

#[test]
fn tiered_code_replaces_lower_tier() {
    panic_after(10_000, || {
        let jit = jit_with_workers(
            Arc::new(MockGenerator::new("c1")),
            Arc::new(MockGenerator::new("c2")),
        );
        let method = Method::new(MethodId(1), "Tier.up", 50);
        let c1_code = jit
            .compile_method(CompileRequest::new(method.clone(), CompLevel::FullProfile).blocking(true))
            .artifact()
            .unwrap()
            .clone();
        assert_eq!(c1_code.comp_level(), CompLevel::FullProfile);

        let result = jit.compile_method(
            CompileRequest::new(method.clone(), CompLevel::FullOptimization)
                .reason(CompileReason::Tiered),
        );
        let task = result.task().unwrap().clone();
        let c2_code = match task.wait_for_completion() {
            TaskOutcome::Installed(artifact) => artifact,
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(c1_code.state(), ArtifactState::NotUsed);
        assert!(c2_code.is_in_use());
        assert!(Arc::ptr_eq(&method.code().unwrap(), &c2_code));
        assert!(jit.lookup(&method, CompLevel::FullOptimization).is_some());

        // OSR code lives beside the standard code.
        let osr = jit.compile_method(
            CompileRequest::new(method.clone(), CompLevel::FullOptimization)
                .osr(17)
                .blocking(true),
        );
        let osr = osr.artifact().unwrap();
        assert!(osr.is_osr_method());
        assert_eq!(osr.osr_entry_bci(), Some(17));
        assert!(Arc::ptr_eq(
            &jit.lookup_osr(&method, 17, CompLevel::Simple).unwrap(),
            osr
        ));
        assert!(Arc::ptr_eq(&method.code().unwrap(), &c2_code));
        jit.shutdown();
    });
}

#[test]
fn workers_drain_queues_and_shut_down() {
    panic_after(10_000, || {
        let c1 = Arc::new(MockGenerator::new("c1"));
        let c2 = Arc::new(MockGenerator::new("c2"));
        c2.set_delay(Duration::from_millis(5));
        let jit = jit_with_workers(c1.clone(), c2.clone());
        assert_eq!(jit.broker().worker_count(), 3);

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let method = Method::new(MethodId(100 + i), format!("Many.m{}", i), 10);
                let level = if i % 2 == 0 {
                    CompLevel::Simple
                } else {
                    CompLevel::FullOptimization
                };
                jit.compile_method(CompileRequest::new(method, level))
                    .task()
                    .unwrap()
                    .clone()
            })
            .collect();
        for task in tasks.iter() {
            assert!(task.wait_for_completion().is_success());
        }
        assert_eq!(c1.compile_count() + c2.compile_count(), 20);
        assert_eq!(jit.code_cache().len(), 20);

        jit.shutdown();
        let processed: usize = jit
            .broker()
            .worker_stats()
            .iter()
            .map(|(_, stat)| stat.tasks_processed)
            .sum();
        assert_eq!(processed, 20);
        assert!(jit.broker().is_compilation_disabled_forever());
        assert!(matches!(
            jit.compile_method(CompileRequest::new(
                Method::new(MethodId(1), "Late.m", 1),
                CompLevel::Simple
            )),
            CompileResult::NotCompiled(NotCompiledReason::CompilationDisabledForever)
        ));
    });
}

#[test]
fn shutdown_completes_queued_tasks() {
    panic_after(10_000, || {
        let c1 = Arc::new(MockGenerator::new("c1"));
        c1.set_delay(Duration::from_millis(20));
        let mut builder = builder(c1, Arc::new(MockGenerator::new("c2")));
        builder.options.c1_compiler_count = 1;
        let jit = Arc::new(builder.build());
        jit.initialize_compilation().unwrap();

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let method = Method::new(MethodId(i), format!("Slow.m{}", i), 10);
                jit.compile_method(CompileRequest::new(method, CompLevel::Simple))
                    .task()
                    .unwrap()
                    .clone()
            })
            .collect();
        jit.shutdown();

        let mut shut_down = 0;
        for task in tasks.iter() {
            assert!(task.is_complete());
            match task.wait_for_completion() {
                TaskOutcome::Installed(_) => {}
                TaskOutcome::Shutdown => shut_down += 1,
                other => panic!("unexpected outcome {:?}", other),
            }
        }
        assert!(shut_down > 0);
    });
}
