//! End-to-end lowering of small scheduled fusions.

use std::collections::HashSet;

use tessel_dtype::IndexType;
use tessel_ir::kernel::*;
use tessel_ir::*;

use super::device;
use crate::analysis::PredicateReason;
use crate::config::{DumpConfig, LoopRotation, LowerConfig};
use crate::context::{ActiveLowering, LowerGuard};
use crate::error::Error;
use crate::lower;

fn lower_default(fusion: &mut Fusion) -> crate::Result<crate::LoweredKernel> {
    lower(fusion, &device(), &LowerConfig::default())
}

fn only_loop(exprs: &[KirExpr]) -> &ForLoop {
    match exprs {
        [KirExpr::ForLoop(fl)] => fl,
        other => panic!("expected a single loop, got {other:?}"),
    }
}

fn find<'a>(exprs: &'a [KirExpr], pred: impl Fn(&KirExpr) -> bool) -> Option<&'a KirExpr> {
    let mut found = None;
    walk(exprs, &mut |node, _| {
        if found.is_none() && pred(node) {
            found = Some(node);
        }
    });
    found
}

/// `T0[8, 128] -> exp -> T1 (registers) -> exp -> T2`, both on BIDx/TIDx, T1 inlined.
fn parallel_pointwise() -> (Fusion, TvId, TvId) {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[8, 128], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv1).unwrap();
    fusion.add_output(tv2);
    for tv in [tv1, tv2] {
        fusion.parallelize(tv, 0, ParallelType::BIDx).unwrap();
        fusion.parallelize(tv, 1, ParallelType::TIDx).unwrap();
    }
    fusion.inline_at(tv1, 2).unwrap();
    (fusion, tv1, tv2)
}

#[test]
fn test_inlined_pointwise_shares_one_nest() {
    let (mut fusion, tv1, _) = parallel_pointwise();
    let config = LowerConfig::builder().dump(DumpConfig::all()).build();
    let kernel = lower(&mut fusion, &device(), &config).unwrap();

    let block = only_loop(&kernel.top_level_exprs);
    assert_eq!(block.parallel_type, ParallelType::BIDx);
    let thread = only_loop(&block.body);
    assert_eq!(thread.parallel_type, ParallelType::TIDx);
    assert_eq!(fusion.eval_int(thread.stop), Some(128));
    assert!(matches!(&thread.body[..], [KirExpr::Allocate(_), KirExpr::Op(_), KirExpr::Op(_)]));

    let alloc = &kernel.allocations[&tv1];
    assert_eq!(alloc.memory_type, MemoryType::Local);
    assert_eq!(fusion.eval_int(alloc.size), Some(1));
    assert!(kernel.sync_map.is_empty());
    assert_eq!(kernel.predicate_elimination.predicated().count(), 0);
    assert_eq!(kernel.parallel_dimension_map.threads_per_block(&fusion), Some(128));
}

#[test]
fn test_lowering_is_not_reentrant() {
    let (mut fusion, _, _) = parallel_pointwise();
    {
        let _guard = LowerGuard::acquire(ActiveLowering { index_type: IndexType::Int64, warp_size: 32 }).unwrap();
        assert_eq!(lower_default(&mut fusion).unwrap_err(), Error::ReentrantLowering);
    }
    assert!(lower_default(&mut fusion).is_ok());
    assert!(!crate::context::is_active());
}

#[test]
fn test_too_many_threads() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[2048], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    fusion.add_output(tv1);
    fusion.parallelize(tv1, 0, ParallelType::TIDx).unwrap();
    assert!(matches!(lower_default(&mut fusion), Err(Error::Validation { .. })));
}

#[test]
fn test_non_divisible_split_is_guarded() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[100], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    fusion.add_output(tv1);
    fusion.split(tv1, 0, 32).unwrap();
    fusion.parallelize(tv1, 1, ParallelType::TIDx).unwrap();

    let kernel = lower_default(&mut fusion).unwrap();
    let expr = fusion.tv(tv1).definition.unwrap();
    assert!(matches!(kernel.predicate_elimination.reasons(expr), [PredicateReason::NonDivisibleSplit(_)]));

    let outer = only_loop(&kernel.top_level_exprs);
    assert_eq!(fusion.eval_int(outer.stop), Some(4));
    let inner = only_loop(&outer.body);
    let [KirExpr::IfThenElse(guard)] = &inner.body[..] else { panic!("expected a guard, got {:?}", inner.body) };
    assert_eq!(guard.kind, PredicateKind::Inline);
    assert_eq!(fusion.val(guard.condition).dtype, DataType::Bool);
    assert!(matches!(&guard.then_body[..], [KirExpr::Op(_)]));
}

#[test]
fn test_unrolled_replicas_inside_the_split_drop_their_guard() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[10], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    fusion.add_output(tv1);
    fusion.split(tv1, 0, 4).unwrap();
    fusion.parallelize(tv1, 1, ParallelType::Unroll).unwrap();

    let kernel = lower_default(&mut fusion).unwrap();
    let outer = only_loop(&kernel.top_level_exprs);
    // 10 = 2 * 4 + 2: the first two lanes are always in bounds.
    assert!(matches!(
        &outer.body[..],
        [KirExpr::Op(_), KirExpr::Op(_), KirExpr::IfThenElse(_), KirExpr::IfThenElse(_)]
    ));
    let KirExpr::Op(first) = &outer.body[0] else { unreachable!() };
    assert_eq!(first.bindings.len(), 1);
    assert_eq!(fusion.eval_int(first.bindings[0].1), Some(0));
}

#[test]
fn test_aligned_vectorization() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[8, 128], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.set(tv0).unwrap();
    fusion.add_output(tv1);
    fusion.split(tv1, 1, 4).unwrap();
    fusion.parallelize(tv1, 2, ParallelType::Vectorize).unwrap();

    let kernel = lower_default(&mut fusion).unwrap();
    let vector = find(&kernel.top_level_exprs, |n| matches!(n, KirExpr::ForLoop(fl) if fl.vectorize));
    assert!(vector.is_some());
    assert!(find(&kernel.top_level_exprs, |n| matches!(n, KirExpr::IfThenElse(_))).is_none());
}

#[test]
fn test_misaligned_vectorization_falls_back_to_serial() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_symbolic_tensor(2, DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.set(tv0).unwrap();
    fusion.add_output(tv1);
    fusion.split(tv1, 1, 4).unwrap();
    fusion.parallelize(tv1, 2, ParallelType::Vectorize).unwrap();

    let kernel = lower_default(&mut fusion).unwrap();
    let Some(KirExpr::IfThenElse(check)) =
        find(&kernel.top_level_exprs, |n| matches!(n, KirExpr::IfThenElse(ite) if ite.kind == PredicateKind::Misaligned))
    else {
        panic!("no alignment check");
    };
    assert!(matches!(&check.then_body[..], [KirExpr::ForLoop(fl)] if fl.vectorize));
    assert!(matches!(&check.else_body[..], [KirExpr::ForLoop(fl)] if !fl.vectorize && fl.parallel_type == ParallelType::Serial));
    assert!(!kernel.serialization_values(&fusion).is_empty());
    // Both tensors share the innermost extent, so it is checked once.
    assert!(matches!(
        fusion.val(check.condition).def,
        ValDef::Binary { op: BinaryScalarOp::Eq, .. }
    ));
}

#[test]
fn test_serial_fallback_guards_the_partial_tile() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_symbolic_tensor(1, DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.set(tv0).unwrap();
    fusion.add_output(tv1);
    fusion.split(tv1, 0, 4).unwrap();
    fusion.parallelize(tv1, 1, ParallelType::Vectorize).unwrap();

    let kernel = lower_default(&mut fusion).unwrap();
    assert_eq!(kernel.non_divisible.splits_to_validate.len(), 1);
    let expr = fusion.tv(tv1).definition.unwrap();
    assert!(kernel.predicate_elimination.can_omit(expr));

    let Some(KirExpr::IfThenElse(check)) =
        find(&kernel.top_level_exprs, |n| matches!(n, KirExpr::IfThenElse(ite) if ite.kind == PredicateKind::Misaligned))
    else {
        panic!("no alignment check:\n{}", kernel.display(&fusion));
    };
    let [KirExpr::ForLoop(vector)] = &check.then_body[..] else { panic!("expected the vector loop") };
    assert!(matches!(&vector.body[..], [KirExpr::Op(_)]));

    let [KirExpr::ForLoop(serial)] = &check.else_body[..] else { panic!("expected the serial loop") };
    let [KirExpr::IfThenElse(guard)] = &serial.body[..] else {
        panic!("unguarded serial copy:\n{}", kernel.display(&fusion));
    };
    assert_eq!(guard.kind, PredicateKind::Inline);
    assert_eq!(fusion.val(guard.condition).dtype, DataType::Bool);
    assert_eq!(fusion.eval_const(guard.condition), None);
    assert!(matches!(&guard.then_body[..], [KirExpr::Op(op)] if op.expr == expr));
}

#[test]
fn test_shared_memory_transpose_gets_block_sync() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[16, 16], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv1).unwrap();
    fusion.add_output(tv2);
    fusion.set_memory_type(tv1, MemoryType::Shared);
    fusion.parallelize(tv1, 0, ParallelType::TIDx).unwrap();
    fusion.parallelize(tv2, 1, ParallelType::TIDx).unwrap();

    let kernel = lower_default(&mut fusion).unwrap();
    assert!(kernel.sync_map.needs_raw_sync(tv1).contains(ParallelType::TIDx));
    assert!(matches!(
        &kernel.top_level_exprs[..],
        [KirExpr::Allocate(_), KirExpr::ForLoop(_), KirExpr::BlockSync { war_hazard: false }, KirExpr::ForLoop(_)]
    ));
    assert_eq!(fusion.eval_int(kernel.allocations[&tv1].size), Some(256));
}

#[test]
fn test_shared_buffer_in_serial_loop_gets_war_sync() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[8, 16, 16], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv1).unwrap();
    fusion.add_output(tv2);
    fusion.set_memory_type(tv1, MemoryType::Shared);
    fusion.inline_at(tv1, 1).unwrap();
    fusion.parallelize(tv1, 1, ParallelType::TIDx).unwrap();
    fusion.parallelize(tv2, 2, ParallelType::TIDx).unwrap();

    let kernel = lower_default(&mut fusion).unwrap();
    assert!(kernel.sync_map.needs_raw_sync(tv1).contains(ParallelType::TIDx));
    let Some(KirExpr::ForLoop(outer)) =
        find(&kernel.top_level_exprs, |n| matches!(n, KirExpr::ForLoop(fl) if fl.parallel_type == ParallelType::Serial))
    else {
        panic!("no serial loop:\n{}", kernel.display(&fusion));
    };
    assert_eq!(fusion.eval_int(outer.stop), Some(8));
    // The next iteration rewrites T1 while other threads may still read it.
    assert!(matches!(outer.body.last(), Some(KirExpr::BlockSync { war_hazard: true })));
    assert!(outer.body.iter().any(|n| matches!(n, KirExpr::BlockSync { war_hazard: false })));
}

#[test]
fn test_compute_with_shares_the_consumer_loop_and_keeps_the_buffer() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[8, 16], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv1).unwrap();
    let tv3 = fusion.exp(tv1).unwrap();
    fusion.add_output(tv2);
    fusion.add_output(tv3);
    fusion.compute_with(tv1, 1).unwrap();

    let kernel = lower_default(&mut fusion).unwrap();
    assert_eq!(fusion.tv(tv1).compute_with_consumer, Some(tv2));
    let [KirExpr::Allocate(alloc), KirExpr::ForLoop(shared), KirExpr::ForLoop(_)] = &kernel.top_level_exprs[..] else {
        panic!("unexpected nest:\n{}", kernel.display(&fusion));
    };
    assert_eq!(alloc.buffer, tv1);
    assert_eq!(fusion.eval_int(alloc.size), Some(128));

    let outputs: Vec<TvId> = collect_ops(&shared.body).iter().map(|op| fusion.expr(op.expr).output).collect();
    assert_eq!(outputs, vec![tv1, tv2]);
    assert!(matches!(&shared.body[..], [KirExpr::ForLoop(_), KirExpr::ForLoop(_)]));
}

/// `T0[8, 32] -> set -> T1 -> exp -> T2`, T1 inlined at the outer axis and double buffered.
fn double_buffered_copy(memory_type: MemoryType) -> (Fusion, TvId) {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[8, 32], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.set(tv0).unwrap();
    let tv2 = fusion.exp(tv1).unwrap();
    fusion.add_output(tv2);
    fusion.set_memory_type(tv1, memory_type);
    fusion.inline_at(tv1, 1).unwrap();
    fusion.double_buffer(tv1).unwrap();
    if memory_type == MemoryType::Shared {
        fusion.parallelize(tv1, 1, ParallelType::TIDx).unwrap();
        fusion.parallelize(tv2, 1, ParallelType::TIDx).unwrap();
    }
    (fusion, tv1)
}

#[test]
fn test_double_buffer_prefetches_the_next_iteration() {
    let (mut fusion, tv1) = double_buffered_copy(MemoryType::Local);
    let load = fusion.tv(tv1).definition.unwrap();
    let kernel = lower_default(&mut fusion).unwrap();
    assert_eq!(kernel.double_buffer_info.axis(tv1), Some(0));

    // The prologue guard `0 < 8` folds away.
    let [KirExpr::Allocate(alloc), KirExpr::ForLoop(prologue), KirExpr::ForLoop(main)] = &kernel.top_level_exprs[..]
    else {
        panic!("unexpected nest:\n{}", kernel.display(&fusion));
    };
    assert_eq!(alloc.buffer, tv1);
    assert_eq!(fusion.eval_int(alloc.shape[0]), Some(2));
    assert_eq!(fusion.eval_int(alloc.size), Some(64));

    let first = collect_ops(&prologue.body)
        .into_iter()
        .map(|op| (op.expr, op.bindings.clone()))
        .collect::<Vec<_>>();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].0, load);
    assert_eq!(fusion.eval_int(first[0].1[0].1), Some(0));

    assert_eq!(fusion.eval_int(main.stop), Some(8));
    let Some(KirExpr::IfThenElse(ahead)) =
        find(&main.body, |n| matches!(n, KirExpr::IfThenElse(ite) if ite.kind == PredicateKind::DoubleBuffer))
    else {
        panic!("no prefetch in the main loop:\n{}", kernel.display(&fusion));
    };
    let [KirExpr::Op(op)] = &ahead.then_body[..] else { panic!("expected the load") };
    assert_eq!(op.expr, load);
    assert_eq!(op.bindings[0].0, main.index);
    assert!(fusion.eval_const(ahead.condition).is_none());
    assert!(find(&kernel.top_level_exprs, KirExpr::is_sync).is_none());
}

#[test]
fn test_shared_double_buffer_syncs_before_refill() {
    let (mut fusion, tv1) = double_buffered_copy(MemoryType::Shared);
    let kernel = lower_default(&mut fusion).unwrap();
    assert_eq!(fusion.eval_int(kernel.allocations[&tv1].size), Some(64));
    let Some(KirExpr::ForLoop(main)) =
        find(&kernel.top_level_exprs, |n| matches!(n, KirExpr::ForLoop(fl) if fusion.eval_int(fl.stop) == Some(8)))
    else {
        panic!("no prefetch loop:\n{}", kernel.display(&fusion));
    };
    assert!(matches!(main.body.last(), Some(KirExpr::BlockSync { .. })));
}

#[test]
fn test_double_buffer_rejections() {
    // Not a plain copy.
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[8, 32], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv1).unwrap();
    fusion.add_output(tv2);
    fusion.inline_at(tv1, 1).unwrap();
    fusion.double_buffer(tv1).unwrap();
    assert!(matches!(lower_default(&mut fusion), Err(Error::Validation { .. })));

    // No loop outside the compute-at position.
    let (mut fusion, tv1) = double_buffered_copy(MemoryType::Local);
    fusion.inline_at(tv1, 0).unwrap();
    assert!(matches!(lower_default(&mut fusion), Err(Error::Validation { .. })));
}

#[test]
fn test_register_producer_read_across_threads_is_rejected() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[16, 16], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv1).unwrap();
    fusion.add_output(tv2);
    fusion.parallelize(tv1, 0, ParallelType::TIDx).unwrap();
    fusion.parallelize(tv2, 1, ParallelType::TIDx).unwrap();
    assert!(matches!(lower_default(&mut fusion), Err(Error::Validation { .. })));
}

#[test]
fn test_dead_register_buffer_is_reused() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[16], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv1).unwrap();
    let tv3 = fusion.exp(tv2).unwrap();
    let tv4 = fusion.exp(tv3).unwrap();
    fusion.add_output(tv4);

    let kernel = lower_default(&mut fusion).unwrap();
    assert_eq!(kernel.allocations[&tv1].alias, None);
    assert_eq!(kernel.allocations[&tv2].alias, None);
    assert_eq!(kernel.allocations[&tv3].alias, Some(tv1));
}

#[test]
fn test_block_reduction_initializes_and_masks() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[8, 32], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.sum(tv0, &[1]).unwrap();
    fusion.add_output(tv1);
    fusion.parallelize(tv1, 0, ParallelType::BIDx).unwrap();
    fusion.parallelize(tv1, 1, ParallelType::TIDx).unwrap();

    let kernel = lower_default(&mut fusion).unwrap();
    assert!(kernel.thread_predicates.get(tv1).block_reduction.contains(ParallelType::TIDx));
    let expr = fusion.tv(tv1).definition.unwrap();
    assert!(kernel.predicate_elimination.reasons(expr).contains(&PredicateReason::ThreadPredicate));

    let block = only_loop(&kernel.top_level_exprs);
    assert!(matches!(&block.body[0], KirExpr::Init(init) if init.buffer == tv1));
}

#[test]
fn test_loop_rotation_peels_the_selected_prefix() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[8, 16], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv1).unwrap();
    fusion.add_output(tv2);
    fusion.inline_at(tv1, 1).unwrap();

    let rotation = LoopRotation { tv: tv2, axis: 0, selection: HashSet::from([tv1]) };
    let config = LowerConfig::builder().loop_rotation(vec![rotation]).build();
    let kernel = lower(&mut fusion, &device(), &config).unwrap();

    // The prologue guard `0 < 8` folds away.
    let [KirExpr::Allocate(alloc), KirExpr::ForLoop(prologue), KirExpr::ForLoop(main)] = &kernel.top_level_exprs[..]
    else {
        panic!("unexpected rotation result:\n{}", kernel.display(&fusion));
    };
    assert_eq!(alloc.buffer, tv1);
    let ops = collect_ops(std::slice::from_ref(&kernel.top_level_exprs[1]));
    assert_eq!(ops[0].bindings.len(), 1);
    assert!(prologue.body.iter().all(|n| matches!(n, KirExpr::Op(_))));
    assert!(matches!(main.body.last(), Some(KirExpr::IfThenElse(ite)) if ite.kind == PredicateKind::Rotation));
}

#[test]
fn test_rotation_selection_must_be_a_prefix() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[8, 16], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv1).unwrap();
    fusion.add_output(tv2);
    fusion.inline_at(tv1, 1).unwrap();

    let rotation = LoopRotation { tv: tv2, axis: 0, selection: HashSet::from([tv2]) };
    let config = LowerConfig::builder().loop_rotation(vec![rotation]).build();
    assert!(matches!(lower(&mut fusion, &device(), &config), Err(Error::Validation { .. })));
}

#[test]
fn test_rng_offsets_follow_execution_order() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[16], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.rand_like(tv0, RngOpType::Uniform).unwrap();
    let tv2 = fusion.rand_like(tv0, RngOpType::Uniform).unwrap();
    let tv3 = fusion.add_tensors(tv1, tv2).unwrap();
    fusion.add_output(tv3);

    lower_default(&mut fusion).unwrap();
    let offset = |tv: TvId| match fusion.expr(fusion.tv(tv).definition.unwrap()).kind {
        ExprKind::Rng { offset, .. } => offset,
        _ => None,
    };
    assert_eq!(offset(tv1), Some(0));
    assert_eq!(offset(tv2), Some(1));
}
