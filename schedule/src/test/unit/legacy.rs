use tessel_device::DeviceProperties;
use tessel_ir::ParallelType;

use super::row_14k;
use crate::*;

fn legacy_config() -> HeuristicConfig {
    HeuristicConfig::builder().variant(PersistentHeuristicVariant::Legacy).build()
}

#[test]
fn test_legacy_2d() {
    let params = inner_persistent_heuristic(&row_14k(), &DeviceProperties::a100(), &legacy_config()).unwrap();
    assert_eq!(params.heuristic, PersistentHeuristicKind::Legacy);

    // 500 threads of seven batches, padded to 512.
    assert_eq!(params.batches_per_block_inner_reduction, 7);
    assert!(params.pad_inner_reduction_to_warp);
    assert!(params.vectorize_inner_reduction);
    assert_eq!(params.unroll_factor_inner_reduction, 4);
    assert_eq!(params.max_register_count, Some(64));

    assert!(!params.multiple_reds_per_blk);
    assert_eq!(params.grid_dim_iter_dom, Some(ParallelType::BIDx));
    assert!(!params.schedule_3d);
    assert_eq!(params.launch, LaunchParams { bdimy: Some(1), ..Default::default() });
}

#[test]
fn test_legacy_matches_direct_call() {
    let device = DeviceProperties::a100();
    let via_dispatch = inner_persistent_heuristic(&row_14k(), &device, &legacy_config()).unwrap();
    assert_eq!(via_dispatch, legacy_heuristic(&row_14k(), &device));
}

#[test]
fn test_legacy_unvectorized_keeps_register_cap() {
    let props = PersistentKernelProperties::builder().total_reduction_numel(999).total_iteration_numel(4096).build();
    let params = legacy_heuristic(&props, &DeviceProperties::a100());
    assert!(!params.vectorize_inner_reduction);
    assert_eq!(params.max_register_count, Some(255));
    assert!(params.batches_per_block_inner_reduction >= 1);
}

#[test]
fn test_legacy_3d() {
    let props = PersistentKernelProperties::builder()
        .total_reduction_numel(1024)
        .inner_most_dimension_numel(128)
        .total_iteration_numel(4096)
        .build();
    // Search only handles reductions over the innermost dimension alone.
    let params = inner_persistent_heuristic(&props, &DeviceProperties::a100(), &HeuristicConfig::default()).unwrap();
    assert_eq!(params.heuristic, PersistentHeuristicKind::Legacy);
    assert!(params.schedule_3d);
    assert_eq!(params.block_dim_outer_reduction, Some(ParallelType::TIDz));
    assert!(params.cross_block_outer_reduction);
    assert!(params.batches_per_block_outer_reduction >= 1);
}
