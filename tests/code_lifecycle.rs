use jitcore::code::{ArtifactState, ClassId, Dependency, DependencyChange};
use jitcore::compiler::{CompLevel, CompileRequest, CompileResult, NotCompiledReason};
use jitcore::method::{Method, MethodId};
use jitcore::util::test_util::fixtures::{artifact_for, blueprint};
use jitcore::util::test_util::mock_generator::{MockGenerator, MOCK_INSTS_BYTES};
use jitcore::util::test_util::panic_after;
use jitcore::JitCoreBuilder;
use std::sync::Arc;

#[test]
fn full_code_cache_recovers_after_unloading() {
    panic_after(10_000, || {
        let mut builder = JitCoreBuilder::new_no_env_vars();
        // Room for two generated artifacts, but not three.
        builder.options.reserved_code_cache_size = 5 * MOCK_INSTS_BYTES / 2;
        builder.options.code_cache_restart_free_percent = 50;
        builder.options.c1_compiler_count = 1;
        builder.c1_compiler(Arc::new(MockGenerator::new("c1")));
        let jit = builder.build();
        jit.initialize_compilation().unwrap();

        let methods: Vec<_> = (0..3)
            .map(|i| Method::new(MethodId(i), format!("Full.m{}", i), 10))
            .collect();
        let request = |i: usize| {
            jit.compile_method(CompileRequest::new(methods[i].clone(), CompLevel::Simple).blocking(true))
        };
        let first = request(0).artifact().unwrap().clone();
        let second = request(1).artifact().unwrap().clone();
        assert!(matches!(
            request(2),
            CompileResult::NotCompiled(NotCompiledReason::CodeCacheFull)
        ));
        assert!(!jit.broker().should_compile_new_jobs());
        assert!(matches!(
            request(2),
            CompileResult::NotCompiled(NotCompiledReason::CompilationStopped)
        ));

        assert!(first.make_not_entrant());
        assert!(second.make_not_entrant());
        assert!(methods[0].code().is_none());
        for _ in 0..2 {
            jit.on_gc_marking_cycle_start();
            jit.on_gc_marking_cycle_finish();
        }
        assert_eq!(jit.do_unloading(|_| true), 2);
        assert_eq!(jit.purge_unlinked(), 2);
        assert!(jit.broker().should_compile_new_jobs());

        let third = request(2).artifact().unwrap().clone();
        assert!(third.is_in_use());
        assert_eq!(jit.code_cache().len(), 1);
        jit.shutdown();
    });
}

#[test]
fn class_loading_deoptimizes_dependents() {
    let jit = JitCoreBuilder::new_no_env_vars().build();
    let method = Method::new(MethodId(1), "Shape.area", 30);
    let mut bp = blueprint(32);
    bp.dependencies.push(Dependency::LeafType { class: ClassId(10) });
    let dependent = jit
        .code_cache()
        .install(artifact_for(&method, 1, CompLevel::FullOptimization, None, bp))
        .unwrap();
    assert!(jit.lookup(&method, CompLevel::FullOptimization).is_some());

    let change = DependencyChange::ClassLoaded {
        class: ClassId(11),
        supertypes: vec![ClassId(10), ClassId(1)],
    };
    assert_eq!(jit.on_dependency_change(&change), 1);
    assert_eq!(dependent.state(), ArtifactState::NotEntrant);
    assert!(jit.lookup(&method, CompLevel::Simple).is_none());
    // Not entrant is final.
    assert!(!dependent.make_not_entrant());
    assert!(!dependent.make_in_use());
    assert_eq!(method.decompile_count(), 1);
}

#[test]
fn redefinition_invalidates_queued_tasks() {
    let mut builder = JitCoreBuilder::new_no_env_vars();
    builder.c1_compiler(Arc::new(MockGenerator::new("c1")));
    // No workers: the task stays queued.
    let jit = builder.build();
    let method = Method::new(MethodId(3), "Old.version", 12);
    let task = jit
        .compile_method(CompileRequest::new(method.clone(), CompLevel::Simple))
        .task()
        .unwrap()
        .clone();
    assert!(jit.compilation_is_in_queue(&method));

    jit.on_dependency_change(&DependencyChange::MethodRedefined { method: method.id() });
    assert!(task.is_stale());
    assert!(!jit.compilation_is_in_queue(&method));
    // A fresh request after redefinition gets a fresh task.
    let fresh = jit
        .compile_method(CompileRequest::new(method, CompLevel::Simple))
        .task()
        .unwrap()
        .clone();
    assert!(!Arc::ptr_eq(&task, &fresh));
}
