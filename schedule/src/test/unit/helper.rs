//! Applicability checks for the inner persistent strategy.

use tessel_device::DeviceProperties;
use tessel_ir::*;

use super::row_14k;
use crate::{INNER_PERSISTENT, PersistentKernelProperties, can_schedule_compile_time, can_schedule_run_time};

fn reason(result: Result<(), crate::Rejection>) -> String {
    let rejection = result.unwrap_err();
    assert_eq!(rejection.heuristic, INNER_PERSISTENT);
    rejection.reason
}

/// `out = x - broadcast(sum(x, axis))` over a 2D input.
fn normalize_along(axis: usize) -> Fusion {
    let mut fusion = Fusion::new();
    let x = fusion.make_symbolic_tensor(2, DataType::Float32);
    fusion.add_input(x);
    let sum = fusion.sum(x, &[axis]).unwrap();
    let flags = if axis == 1 { [false, true] } else { [true, false] };
    let mean = fusion.broadcast(sum, &flags).unwrap();
    let out = fusion.sub_tensors(x, mean).unwrap();
    fusion.add_output(out);
    fusion
}

// ============================================================================
// COMPILE TIME
// ============================================================================

#[test]
fn test_accepts_layer_norm() {
    assert_eq!(can_schedule_compile_time(&normalize_along(1)), Ok(()));
}

#[test]
fn test_rejects_pointwise() {
    let mut fusion = Fusion::new();
    let x = fusion.make_symbolic_tensor(2, DataType::Float32);
    fusion.add_input(x);
    let y = fusion.exp(x).unwrap();
    fusion.add_output(y);
    assert_eq!(reason(can_schedule_compile_time(&fusion)), "needs a reduction op");
}

#[test]
fn test_rejects_outer_reduction() {
    let reason = reason(can_schedule_compile_time(&normalize_along(0)));
    assert!(reason.ends_with("does not reduce its innermost dimension"), "{reason}");
}

#[test]
fn test_rejects_mixed_reduction_ranks() {
    let mut fusion = Fusion::new();
    let x = fusion.make_symbolic_tensor(2, DataType::Float32);
    let y = fusion.make_symbolic_tensor(3, DataType::Float32);
    fusion.add_input(x);
    fusion.add_input(y);
    let sx = fusion.sum(x, &[1]).unwrap();
    let sy = fusion.sum(y, &[2]).unwrap();
    fusion.add_output(sx);
    fusion.add_output(sy);
    let reason = reason(can_schedule_compile_time(&fusion));
    assert!(reason.starts_with("inconsistent reduction root size"), "{reason}");
    assert!(reason.ends_with("expected: 2"), "{reason}");
}

#[test]
fn test_rejects_plain_reduction() {
    let mut fusion = Fusion::new();
    let x = fusion.make_symbolic_tensor(2, DataType::Float32);
    fusion.add_input(x);
    let sum = fusion.sum(x, &[1]).unwrap();
    fusion.add_output(sum);
    assert_eq!(reason(can_schedule_compile_time(&fusion)), "no persistent buffer identified");
}

#[test]
fn test_rejects_gather_before_reduction() {
    let mut fusion = Fusion::new();
    let lookup = fusion.make_symbolic_tensor(2, DataType::Float32);
    let index = fusion.make_symbolic_tensor(1, DataType::Int64);
    fusion.add_input(lookup);
    fusion.add_input(index);
    let rows = fusion.index_select(lookup, 0, index).unwrap();
    let sum = fusion.sum(rows, &[1]).unwrap();
    let mean = fusion.broadcast(sum, &[false, true]).unwrap();
    let out = fusion.sub_tensors(rows, mean).unwrap();
    fusion.add_output(out);
    assert_eq!(reason(can_schedule_compile_time(&fusion)), "has unsupported gather-like ops before normalization");
}

// ============================================================================
// RUN TIME
// ============================================================================

#[test]
fn test_accepts_row_14k() {
    assert_eq!(can_schedule_run_time(&row_14k(), &DeviceProperties::a100()), Ok(()));
}

#[test]
fn test_rejects_oversized_buffers() {
    // Shared memory left on an A100: 166912 - 1024 - 1024 * 4 = 161792 bytes.
    let props = |buffer| {
        PersistentKernelProperties::builder()
            .total_reduction_numel(65536)
            .total_iteration_numel(1024)
            .max_persistent_buffer_size(buffer)
            .build()
    };
    let device = DeviceProperties::a100();
    assert_eq!(can_schedule_run_time(&props(161792), &device), Ok(()));
    assert_eq!(
        reason(can_schedule_run_time(&props(161793), &device)),
        "not enough registers or shared memory for persistence"
    );
}

#[test]
fn test_rejects_grid_wide_persistence() {
    let device = DeviceProperties::builder().multiprocessor_count(2).build().unwrap();
    let props = PersistentKernelProperties::builder()
        .total_reduction_numel(65536)
        .total_iteration_numel(1024)
        .max_persistent_buffer_size(150_000)
        .build();
    assert_eq!(reason(can_schedule_run_time(&props, &device)), "requires over half GPU persistence.");
}

#[test]
fn test_rejects_too_few_rows() {
    let device = DeviceProperties::a100();
    let props = |iteration, fastest| {
        PersistentKernelProperties::builder()
            .total_reduction_numel(8192)
            .total_iteration_numel(iteration)
            .fastest_dim_reduction(fastest)
            .build()
    };
    // 108 / 8 rows for inner reductions, (32 / 8) * 108 otherwise.
    assert_eq!(reason(can_schedule_run_time(&props(12, true), &device)), "not enough blocks");
    assert_eq!(can_schedule_run_time(&props(13, true), &device), Ok(()));
    assert_eq!(reason(can_schedule_run_time(&props(431, false), &device)), "not enough blocks");
    assert_eq!(can_schedule_run_time(&props(432, false), &device), Ok(()));
}
