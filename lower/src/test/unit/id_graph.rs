//! Exact, permissive and loop mapping.

use tessel_ir::*;

use crate::error::Error;
use crate::id_graph::*;

#[test]
fn test_independent_merges_of_same_inputs_are_exact() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[4, 8], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv0).unwrap();
    fusion.add_output(tv1);
    fusion.add_output(tv2);
    fusion.merge(tv1, 0).unwrap();
    fusion.merge(tv2, 0).unwrap();

    let graphs = IdGraphs::build(&fusion).unwrap();
    let (a, b) = (fusion.tv(tv1).leaf[0], fusion.tv(tv2).leaf[0]);
    assert!(graphs.exact.are_mapped(a, b));
    assert!(graphs.permissive.are_mapped(a, b));
    // Not inlined: separate loops.
    assert!(!graphs.loops.are_mapped(a, b));
}

#[test]
fn test_merges_built_directly_from_one_pair() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[4, 8], DataType::Float32);
    let (x, y) = (fusion.tv(tv0).root[0], fusion.tv(tv0).root[1]);
    let a = fusion.merge_iter_domains(x, y).unwrap();
    let b = fusion.merge_iter_domains(x, y).unwrap();

    let graphs = IdGraphs::build(&fusion).unwrap();
    assert!(graphs.exact.are_mapped(a, b));
    assert_eq!(graphs.exact.group(a), vec![a, b]);
}

#[test]
fn test_split_factor_decides_mapping() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[64], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv0).unwrap();
    let tv3 = fusion.exp(tv0).unwrap();
    fusion.split(tv1, 0, 8).unwrap();
    fusion.split(tv2, 0, 8).unwrap();
    fusion.split(tv3, 0, 4).unwrap();

    let graphs = IdGraphs::build(&fusion).unwrap();
    let inner = |tv: TvId| fusion.tv(tv).leaf[1];
    assert!(graphs.exact.are_mapped(inner(tv1), inner(tv2)));
    assert!(!graphs.exact.are_mapped(inner(tv1), inner(tv3)));
}

#[test]
fn test_broadcast_is_only_permissively_mapped() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[4], DataType::Float32);
    let tv1 = fusion.make_concrete_tensor(&[4, 8], DataType::Float32);
    fusion.add_input(tv0);
    fusion.add_input(tv1);
    let tv2 = fusion.broadcast(tv0, &[false, true]).unwrap();
    let tv3 = fusion.add_tensors(tv2, tv1).unwrap();
    fusion.add_output(tv3);

    let graphs = IdGraphs::build(&fusion).unwrap();
    let (b, c) = (fusion.tv(tv2).root[1], fusion.tv(tv3).root[1]);
    assert!(graphs.permissive.are_mapped(b, c));
    assert!(!graphs.exact.are_mapped(b, c));
    assert!(graphs.exact.are_mapped(fusion.tv(tv2).root[0], fusion.tv(tv3).root[0]));
}

#[test]
fn test_inlining_maps_loops_and_promotes_broadcast() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[4], DataType::Float32);
    let tv1 = fusion.make_concrete_tensor(&[4, 8], DataType::Float32);
    fusion.add_input(tv0);
    fusion.add_input(tv1);
    let tv2 = fusion.broadcast(tv0, &[false, true]).unwrap();
    let tv3 = fusion.add_tensors(tv2, tv1).unwrap();
    fusion.add_output(tv3);
    fusion.inline_at(tv2, 2).unwrap();

    let graphs = IdGraphs::build(&fusion).unwrap();
    let (b, c) = (fusion.tv(tv2).leaf[1], fusion.tv(tv3).leaf[1]);
    assert!(graphs.loops.are_mapped(b, c));
    assert_eq!(graphs.loop_group(b), graphs.loop_group(c));
    assert_eq!(graphs.promoted(b), c);
}

#[test]
fn test_conflicting_promotion_is_rejected_eagerly() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[4], DataType::Float32);
    let tv1 = fusion.make_concrete_tensor(&[4, 8], DataType::Float32);
    let tv2 = fusion.make_concrete_tensor(&[4, 16], DataType::Float32);
    for tv in [tv0, tv1, tv2] {
        fusion.add_input(tv);
    }
    let tv3 = fusion.broadcast(tv0, &[false, true]).unwrap();
    let tv4 = fusion.add_tensors(tv3, tv1).unwrap();
    let tv5 = fusion.add_tensors(tv3, tv2).unwrap();
    fusion.add_output(tv4);
    fusion.add_output(tv5);
    fusion.inline_at(tv3, 2).unwrap();

    assert!(matches!(IdGraphs::build(&fusion), Err(Error::InconsistentLoopPromotion { .. })));
}

#[test]
fn test_parallel_type_conflict_in_loop_group() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[32], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv1).unwrap();
    fusion.add_output(tv2);
    fusion.inline_at(tv1, 1).unwrap();
    fusion.parallelize(tv1, 0, ParallelType::TIDx).unwrap();
    fusion.parallelize(tv2, 0, ParallelType::BIDx).unwrap();

    let graphs = IdGraphs::build(&fusion).unwrap();
    assert!(matches!(validate_and_propagate_ptype(&mut fusion, &graphs), Err(Error::Validation { .. })));
}

#[test]
fn test_parallel_type_propagates_to_loop_group() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[32], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv1).unwrap();
    fusion.add_output(tv2);
    fusion.inline_at(tv1, 1).unwrap();
    fusion.parallelize(tv2, 0, ParallelType::TIDx).unwrap();

    let graphs = IdGraphs::build(&fusion).unwrap();
    validate_and_propagate_ptype(&mut fusion, &graphs).unwrap();
    assert_eq!(fusion.iter_domain(fusion.tv(tv1).leaf[0]).parallel_type, ParallelType::TIDx);
}

#[test]
fn test_compute_with_joins_the_first_consumer_loop() {
    let mut fusion = Fusion::new();
    let tv0 = fusion.make_concrete_tensor(&[8, 16], DataType::Float32);
    fusion.add_input(tv0);
    let tv1 = fusion.exp(tv0).unwrap();
    let tv2 = fusion.exp(tv1).unwrap();
    let tv3 = fusion.exp(tv1).unwrap();
    fusion.add_output(tv2);
    fusion.add_output(tv3);
    fusion.compute_with(tv1, 1).unwrap();

    let mut graphs = IdGraphs::build(&fusion).unwrap();
    let leaf = |fusion: &Fusion, tv: TvId| fusion.tv(tv).leaf.clone();
    assert!(!graphs.loops.are_mapped(leaf(&fusion, tv1)[0], leaf(&fusion, tv2)[0]));

    graphs.resolve_compute_with(&mut fusion).unwrap();
    assert_eq!(fusion.tv(tv1).compute_with_consumer, Some(tv2));
    let (p, c) = (leaf(&fusion, tv1), leaf(&fusion, tv2));
    assert!(graphs.loops.are_mapped(p[0], c[0]));
    assert!(!graphs.loops.are_mapped(p[1], c[1]));
    assert!(!graphs.loops.are_mapped(p[0], leaf(&fusion, tv3)[0]));
    assert!(graphs.exact.are_mapped(graphs.promoted(p[0]), c[0]));
}
