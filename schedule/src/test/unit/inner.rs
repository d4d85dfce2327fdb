//! Search and shared-memory heuristics on hand-checked A100 problems.

use std::cmp::Ordering;

use tessel_device::DeviceProperties;
use tessel_ir::ParallelType;

use super::row_14k;
use crate::*;

fn search(props: &PersistentKernelProperties) -> ReductionParams {
    inner_persistent_heuristic(props, &DeviceProperties::a100(), &HeuristicConfig::default()).unwrap()
}

fn candidate(persistent_batch: i64, bdimx: i64, thread_tails: i64, persistent_tails: i64) -> PersistentCandidate {
    PersistentCandidate {
        persistent_batch,
        bdimx,
        bdimy: 1,
        register_per_thread: 64,
        warps_per_sm: 32,
        persistent_tails,
        thread_tails,
    }
}

// ============================================================================
// SEARCH
// ============================================================================

#[test]
fn test_search_range() {
    let device = DeviceProperties::a100();
    let calculator = HeuristicCalculator::new(&row_14k(), &device);
    assert_eq!(calculator.vectorize(), 4);
    assert_eq!(calculator.persistent_range(), (4, 10));
    assert!(!calculator.prioritize_divisible_split());
}

#[test]
fn test_search_ranks_pow2_block_above_four_batch_baseline() {
    let device = DeviceProperties::a100();
    let calculator = HeuristicCalculator::new(&row_14k(), &device);

    // Four batches need 896 threads at 28 warps per SM; seven fit a 512-thread block at 32.
    let four = calculator.candidate(4);
    assert_eq!((four.bdimx, four.warps_per_sm, four.register_per_thread), (896, 28, 72));

    let best = calculator.best();
    assert_eq!(
        best,
        PersistentCandidate {
            persistent_batch: 7,
            bdimx: 512,
            bdimy: 1,
            register_per_thread: 64,
            warps_per_sm: 32,
            persistent_tails: 0,
            thread_tails: 12,
        }
    );

    let prioritize = calculator.prioritize_divisible_split();
    assert_eq!(HeuristicCalculator::rank(prioritize, device.warp_size, &best, &four), Ordering::Less);

    let order: Vec<i64> = calculator.ranked().iter().map(|c| c.persistent_batch).collect();
    assert_eq!(order, [7, 8, 9, 4, 10, 5, 6]);
}

#[test]
fn test_search_params() {
    let params = search(&row_14k());
    assert_eq!(params.heuristic, PersistentHeuristicKind::Search);
    assert!(params.persistent_kernel);
    assert!(params.fastest_dim);
    assert_eq!(params.max_register_count, Some(64));
    assert!(params.pad_inner_reduction_to_warp);
    assert_eq!(params.batches_per_block_inner_reduction, 7);
    assert!(params.vectorize_inner_reduction);
    assert_eq!(params.unroll_factor_inner_reduction, 4);
    assert_eq!(params.block_dim_inner_reduction, Some(ParallelType::TIDx));
    assert!(!params.multiple_reds_per_blk);
    assert_eq!(params.block_dim_iter_dom, None);
    assert_eq!(params.grid_dim_iter_dom, Some(ParallelType::BIDx));
    assert!(!params.split_grid_dim_iter_dom_outer);
    assert_eq!(params.launch, LaunchParams { bdimy: Some(1), ..Default::default() });
    assert!(!params.shared_mem_persistent_buffer);
}

#[test]
fn test_search_multiple_rows_per_block() {
    let props = PersistentKernelProperties::builder().total_reduction_numel(512).total_iteration_numel(65536).build();
    let device = DeviceProperties::a100();
    let calculator = HeuristicCalculator::new(&props, &device);
    assert_eq!(calculator.persistent_range(), (1, 4));

    let single = calculator.candidate(1);
    assert_eq!((single.bdimx, single.bdimy, single.warps_per_sm), (128, 1, 64));
    let best = calculator.best();
    assert_eq!((best.persistent_batch, best.bdimx, best.bdimy), (4, 32, 4));
    assert_eq!((best.register_per_thread, best.warps_per_sm), (40, 48));

    let params = search(&props);
    assert!(params.multiple_reds_per_blk);
    assert_eq!(params.block_dim_iter_dom, Some(ParallelType::TIDy));
    assert_eq!(params.grid_dim_iter_dom, Some(ParallelType::BIDx));
    assert_eq!(params.launch.bdimy, Some(4));
    assert_eq!(params.max_register_count, Some(40));
}

#[test]
fn test_rank_single_warp_first() {
    let single_warp = candidate(8, 32, 5, 0);
    let wide = candidate(1, 512, 0, 0);
    assert_eq!(HeuristicCalculator::rank(false, 32, &single_warp, &wide), Ordering::Less);
    // Divisible splits outrank block shape under priority.
    assert_eq!(HeuristicCalculator::rank(true, 32, &single_warp, &wide), Ordering::Greater);
}

#[test]
fn test_rank_batch_tie_break() {
    let small = candidate(4, 512, 12, 0);
    let large = candidate(8, 512, 12, 0);
    assert_eq!(HeuristicCalculator::rank(false, 32, &large, &small), Ordering::Less);
    assert_eq!(HeuristicCalculator::rank(true, 32, &small, &large), Ordering::Less);

    let exact_small = candidate(4, 512, 0, 0);
    let exact_large = candidate(8, 512, 0, 0);
    assert_eq!(HeuristicCalculator::rank(true, 32, &exact_large, &exact_small), Ordering::Less);
}

#[test]
fn test_prioritize_divisible_split() {
    let device = DeviceProperties::a100();
    let rng = PersistentKernelProperties::builder()
        .total_reduction_numel(14000)
        .total_iteration_numel(8192)
        .has_rng_op(true)
        .build();
    assert!(HeuristicCalculator::new(&rng, &device).prioritize_divisible_split());

    let fused = |buffer| {
        PersistentKernelProperties::builder()
            .total_reduction_numel(4096)
            .total_iteration_numel(8192)
            .max_persistent_buffer_size(buffer)
            .has_fused_op_before_reduction(true)
            .build()
    };
    assert!(HeuristicCalculator::new(&fused(16384), &device).prioritize_divisible_split());
    assert!(!HeuristicCalculator::new(&fused(32768), &device).prioritize_divisible_split());
}

#[test]
fn test_non_vectorized_uses_legacy() {
    let props = PersistentKernelProperties::builder().total_reduction_numel(999).total_iteration_numel(4096).build();
    assert_eq!(props.vectorize_factor, 1);
    let params = search(&props);
    assert_eq!(params.heuristic, PersistentHeuristicKind::Legacy);
    assert!(!params.vectorize_inner_reduction);
}

// ============================================================================
// SHARED MEMORY
// ============================================================================

#[test]
fn test_shared_memory_fallback() {
    let props = PersistentKernelProperties::builder().total_reduction_numel(65536).total_iteration_numel(1024).build();
    assert_eq!(props.max_persistent_buffer_size, 262144);

    let params = search(&props);
    assert_eq!(params.heuristic, PersistentHeuristicKind::SharedMemory);
    assert!(params.shared_mem_persistent_buffer);
    assert!(params.pad_inner_reduction_to_warp);
    assert_eq!(params.batches_per_block_inner_reduction, 16);
    assert_eq!(params.unroll_factor_inner_reduction, 4);
    assert_eq!(params.grid_dim_iter_dom, Some(ParallelType::BIDx));
}

#[test]
fn test_shared_memory_too_small() {
    let props = PersistentKernelProperties::builder()
        .total_reduction_numel(2048)
        .total_iteration_numel(1024)
        .max_persistent_buffer_size(200_000)
        .build();
    let err = inner_persistent_heuristic(&props, &DeviceProperties::a100(), &HeuristicConfig::default()).unwrap_err();
    assert!(matches!(err, Error::ReductionTooSmall { reduction: 2048, vectorize: 4, bdimx: 1024 }));
}

// ============================================================================
// VALIDATION
// ============================================================================

#[test]
fn test_rejects_invalid_problems() {
    let device = DeviceProperties::a100();
    let config = HeuristicConfig::default();
    let check = |props: PersistentKernelProperties| inner_persistent_heuristic(&props, &device, &config).unwrap_err();

    let err = check(PersistentKernelProperties::builder().total_reduction_numel(0).total_iteration_numel(1).build());
    assert!(matches!(err, Error::InvalidProblem { field: "total_reduction_numel", .. }));

    let err = check(
        PersistentKernelProperties::builder()
            .total_reduction_numel(1000)
            .total_iteration_numel(8)
            .inner_most_dimension_numel(300)
            .build(),
    );
    assert!(matches!(err, Error::InvalidProblem { field: "inner_most_dimension_numel", .. }));

    let err = check(
        PersistentKernelProperties::builder()
            .total_reduction_numel(1024)
            .total_iteration_numel(8)
            .vectorize_factor(8)
            .build(),
    );
    assert!(matches!(err, Error::InvalidProblem { field: "vectorize_factor", value: 8, .. }));
}
