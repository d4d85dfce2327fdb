//! Whether the inner persistent strategy applies to a fusion.
//!
//! Both checks answer with a [`Rejection`] rather than an error: a declined fusion is still
//! valid and goes to another strategy.

use std::collections::HashSet;

use tessel_device::DeviceProperties;
use tessel_ir::{ExprId, ExprKind, Fusion};

use crate::error::Rejection;
use crate::properties::{PersistentKernelProperties, persistent_buffers, reduction_tvs, upstream};
use crate::utils::{ceil_div, safe_div};

/// Name reported in rejections.
pub const INNER_PERSISTENT: &str = "inner_persistent";

/// Shape checks that do not depend on run-time sizes.
#[tracing::instrument(skip_all)]
pub fn can_schedule_compile_time(fusion: &Fusion) -> Result<(), Rejection> {
    let reductions = reduction_tvs(fusion);
    if reductions.is_empty() {
        return Err(Rejection::new(INNER_PERSISTENT, "needs a reduction op"));
    }
    if fusion.inputs().is_empty() {
        return Err(Rejection::new(INNER_PERSISTENT, "scheduling not supported with no input"));
    }

    for &red in &reductions {
        let innermost = fusion.tv(red).root.iter().rev().map(|id| fusion.iter_domain(*id)).find(|d| !d.is_broadcast());
        if !innermost.is_some_and(|d| d.is_reduction()) {
            return Err(Rejection::new(
                INNER_PERSISTENT,
                format!("{} does not reduce its innermost dimension", fusion.display_tv(red)),
            ));
        }
    }

    let root_size = |tv| fusion.tv(tv).root.iter().filter(|id| !fusion.iter_domain(**id).is_broadcast()).count();
    let expected = root_size(reductions[0]);
    if let Some(&red) = reductions.iter().find(|red| root_size(**red) != expected) {
        return Err(Rejection::new(
            INNER_PERSISTENT,
            format!("inconsistent reduction root size: {}, expected: {expected}", fusion.display_tv(red)),
        ));
    }

    if persistent_buffers(fusion).is_empty() {
        return Err(Rejection::new(INNER_PERSISTENT, "no persistent buffer identified"));
    }

    let live: HashSet<ExprId> = fusion.exprs().into_iter().collect();
    let gather_before_reduction = reductions.iter().any(|&red| {
        let (_, exprs) = upstream(fusion, &live, red);
        exprs.iter().any(|e| matches!(fusion.expr(*e).kind, ExprKind::IndexSelect { .. }))
    });
    if gather_before_reduction {
        return Err(Rejection::new(INNER_PERSISTENT, "has unsupported gather-like ops before normalization"));
    }
    Ok(())
}

/// Size checks for one set of run-time shapes.
#[tracing::instrument(skip_all)]
pub fn can_schedule_run_time(props: &PersistentKernelProperties, device: &DeviceProperties) -> Result<(), Rejection> {
    // Buffers go to registers or, failing that, to the shared memory left after the launch
    // reservation and the block-wide reduction workspace.
    let workspace = device.max_threads_per_block * props.max_buffer_dtype_size;
    let shared_memory = device.shared_mem_per_block_optin - device.reserved_shared_mem_per_block - workspace;
    let available = device.register_file_size().max(shared_memory);
    if props.max_persistent_buffer_size > available {
        return Err(Rejection::new(INNER_PERSISTENT, "not enough registers or shared memory for persistence"));
    }

    // Grid persistence over half the device cannot overlap its communication.
    let required_sm_per_norm = ceil_div(props.max_persistent_buffer_size, device.register_file_size());
    if required_sm_per_norm > safe_div(device.multiprocessor_count, 2) {
        return Err(Rejection::new(INNER_PERSISTENT, "requires over half GPU persistence."));
    }

    // A large reduction that cannot fill a small fraction of the SMs is better left to a
    // non-persistent kernel.
    let min_iteration = if props.fastest_dim_reduction {
        safe_div(device.multiprocessor_count, 8)
    } else {
        (device.warp_size / 8) * device.multiprocessor_count
    };
    if props.total_reduction_numel >= device.max_threads_per_multiprocessor * 4
        && props.total_iteration_numel < min_iteration
    {
        return Err(Rejection::new(INNER_PERSISTENT, "not enough blocks"));
    }
    Ok(())
}
