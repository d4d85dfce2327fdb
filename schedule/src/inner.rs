//! Heuristics for persistent kernels reducing over the innermost dimensions.
//!
//! A persistent kernel keeps a whole reduction row on chip, so block width, persistent batch
//! count and register budget trade off against each other through occupancy. Three
//! strategies cover the problem space:
//!
//! - buffers larger than the register budget live in shared memory ([`shared_memory_heuristic`]);
//! - vectorized 2D problems enumerate persistent batch sizes and rank them ([`HeuristicCalculator`]);
//! - everything else uses the closed-form [`legacy_heuristic`].

use std::cmp::Ordering;

use derive_more::Display;
use snafu::ensure;
use tessel_device::{BYTES_PER_REGISTER, DeviceProperties, MAX_REGISTERS_PER_THREAD, REGISTER_OVERHEAD};
use tessel_ir::{ExpressionEvaluator, Fusion, ParallelType};

use crate::config::{HeuristicConfig, PersistentHeuristicVariant};
use crate::error::{InvalidProblemSnafu, ReductionTooSmallSnafu, Result};
use crate::params::{LaunchParams, PersistentHeuristicKind, ReductionParams};
use crate::properties::PersistentKernelProperties;
use crate::utils::{
    MAX_VECTOR_BYTES, X_GRID_LIMIT, Y_GRID_LIMIT, Z_BLOCK_LIMIT, ceil_div, last_pow2, round_up_pow2,
    round_up_pow2_or_8, safe_div,
};

// ============================================================================
// ENTRY POINT
// ============================================================================

/// Pick launch and tiling parameters for an inner persistent reduction.
#[tracing::instrument(skip_all, fields(
    reduction = props.total_reduction_numel,
    iteration = props.total_iteration_numel,
    buffer = props.max_persistent_buffer_size,
))]
pub fn inner_persistent_heuristic(
    props: &PersistentKernelProperties,
    device: &DeviceProperties,
    config: &HeuristicConfig,
) -> Result<ReductionParams> {
    validate(props)?;

    if props.max_persistent_buffer_size > device.register_file_size() {
        return shared_memory_heuristic(props, device);
    }
    let is_2d = props.total_reduction_numel == props.inner_most_dimension_numel;
    if config.variant == PersistentHeuristicVariant::Search && is_2d && props.vectorize_factor > 1 {
        return Ok(search_heuristic(props, device));
    }
    Ok(legacy_heuristic(props, device))
}

/// [`inner_persistent_heuristic`] for the sizes bound in `evaluator`.
pub fn get_inner_persistent_heuristics(
    fusion: &Fusion,
    evaluator: &ExpressionEvaluator,
    device: &DeviceProperties,
    config: &HeuristicConfig,
) -> Result<ReductionParams> {
    let props = PersistentKernelProperties::from_fusion(fusion, evaluator, device)?;
    inner_persistent_heuristic(&props, device, config)
}

fn validate(props: &PersistentKernelProperties) -> Result<()> {
    let positive = [
        ("total_reduction_numel", props.total_reduction_numel),
        ("total_iteration_numel", props.total_iteration_numel),
        ("inner_most_dimension_numel", props.inner_most_dimension_numel),
        ("n_tensor_inputs", props.n_tensor_inputs),
        ("max_dtype_size", props.max_dtype_size),
        ("max_persistent_buffer_size", props.max_persistent_buffer_size),
    ];
    for (field, value) in positive {
        ensure!(value > 0, InvalidProblemSnafu { field, value, reason: "must be positive" });
    }
    ensure!(
        props.total_reduction_numel % props.inner_most_dimension_numel == 0,
        InvalidProblemSnafu {
            field: "inner_most_dimension_numel",
            value: props.inner_most_dimension_numel,
            reason: "must divide the reduction size"
        }
    );
    let vectorize = props.vectorize_factor;
    ensure!(
        vectorize > 0
            && (vectorize & (vectorize - 1)) == 0
            && props.inner_most_dimension_numel % vectorize == 0
            && vectorize * props.max_dtype_size <= MAX_VECTOR_BYTES.max(props.max_dtype_size),
        InvalidProblemSnafu {
            field: "vectorize_factor",
            value: vectorize,
            reason: "must be a power of two dividing the innermost dimension within one vector access"
        }
    );
    ensure!(
        props.total_iteration_numel <= X_GRID_LIMIT.saturating_mul(Y_GRID_LIMIT),
        InvalidProblemSnafu {
            field: "total_iteration_numel",
            value: props.total_iteration_numel,
            reason: "exceeds the largest launchable grid"
        }
    );
    Ok(())
}

// ============================================================================
// SEARCH
// ============================================================================

/// Registers a thread needs besides its share of the persistent buffers.
const SEARCH_REGISTER_OVERHEAD: i64 = 24;
/// Threads per block when several rows share a block.
const MRPB_THREADS_PER_BLOCK: i64 = 128;

/// Scored configuration for one persistent batch size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(
    "persistent {persistent_batch}, bdimx {bdimx}, bdimy {bdimy}, registers {register_per_thread}, \
     warps/SM {warps_per_sm}, persistent tails {persistent_tails}, thread tails {thread_tails}"
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PersistentCandidate {
    pub persistent_batch: i64,
    pub bdimx: i64,
    pub bdimy: i64,
    pub register_per_thread: i64,
    pub warps_per_sm: i64,
    /// Idle vector slots in the last persistent batch.
    pub persistent_tails: i64,
    /// Threads added to round the block up to whole warps.
    pub thread_tails: i64,
}

impl PersistentCandidate {
    fn pow2_distance(&self) -> i64 {
        round_up_pow2(self.bdimx) - self.bdimx
    }
}

/// Bounded search over persistent batch sizes for a vectorized `[iteration, reduction]` problem.
///
/// The vector width is fixed to the widest allowed. Every persistent batch size in a range
/// narrowed by problem-specific experiments is turned into a block shape, a register budget
/// and an occupancy estimate; candidates reaching the target occupancy are then ranked.
#[derive(Debug, Clone)]
pub struct HeuristicCalculator<'a> {
    device: &'a DeviceProperties,
    vectorize: i64,
    after_vect: i64,
    total_reduction_numel: i64,
    max_persistent_buffer_size: i64,
    has_multiple_inputs: bool,
    has_exp_ops: bool,
    has_rng_ops: bool,
    n_waves_max: i64,
    target_warps_per_sm: i64,
    max_adjust_count: i64,
    may_use_mrpb: bool,
    persistent_min: i64,
    persistent_max: i64,
}

impl<'a> HeuristicCalculator<'a> {
    pub fn new(props: &PersistentKernelProperties, device: &'a DeviceProperties) -> Self {
        let total_reduction_numel = props.total_reduction_numel;
        let max_persistent_buffer_size = props.max_persistent_buffer_size;
        let has_multiple_inputs = props.has_fused_op_before_reduction;
        let vectorize = props.vectorize_factor;
        let after_vect = safe_div(total_reduction_numel, vectorize);
        let n_waves_max = ceil_div(props.total_iteration_numel, device.multiprocessor_count);

        // Half occupancy, lowered for large buffers.
        let target_warps_per_sm = if max_persistent_buffer_size >= 24 * 1024 * 2 { 22 } else { 32 };

        // Registers the estimate may give up for occupancy; only fused multi-input kernels
        // profit, and not the expensive ones with large buffers.
        let max_adjust_count = if !has_multiple_inputs
            || (props.has_exp_op && max_persistent_buffer_size >= 24 * 1024 * 4)
        {
            0
        } else {
            8
        };

        // With more than one wave use at least four warps per block; otherwise each SM gets a
        // single block that should be as wide as possible.
        let min_threads_per_block = if n_waves_max > 1 { 128 } else { device.max_threads_per_block };
        let max_threads_per_block = device.max_threads_per_block;

        // Small rows are reduced one warp each, several rows per block.
        let may_use_mrpb = total_reduction_numel < 1024 && n_waves_max > 4;

        let (experiment_min, experiment_max) = if has_multiple_inputs {
            let (mut lo, mut hi) = match total_reduction_numel {
                n if n >= 20480 => (4, 7),
                n if n >= 16 * 1024 => (4, 4),
                n if n >= 6144 => (2, 4),
                n if n >= 3072 => (1, 3),
                n if n >= 1024 => (1, 2),
                _ => (1, 1),
            };
            if vectorize < 8 {
                let factor = 8 / vectorize;
                lo *= factor;
                hi *= factor;
                if (2048..=4096).contains(&total_reduction_numel) {
                    hi = 2;
                }
                if total_reduction_numel <= 22 * 1024 {
                    lo = lo.max(ceil_div(after_vect, 512));
                } else {
                    hi = 8;
                }
                hi = hi.min(12).max(lo);
            }
            (lo, hi)
        } else if may_use_mrpb {
            (1, 4)
        } else {
            (1, 10)
        };

        let mut bdimx_min = after_vect.min(min_threads_per_block);
        if may_use_mrpb {
            bdimx_min = bdimx_min.min(device.warp_size);
        }
        let persistent_min_hardware = ceil_div(after_vect, max_threads_per_block);
        let persistent_min = experiment_min.max(persistent_min_hardware);
        let persistent_max = persistent_min.max(experiment_max.min(ceil_div(after_vect, bdimx_min)));
        tracing::debug!(persistent_min, persistent_max, experiment_min, persistent_min_hardware, bdimx_min, "search range");

        Self {
            device,
            vectorize,
            after_vect,
            total_reduction_numel,
            max_persistent_buffer_size,
            has_multiple_inputs,
            has_exp_ops: props.has_exp_op,
            has_rng_ops: props.has_rng_op,
            n_waves_max,
            target_warps_per_sm,
            max_adjust_count,
            may_use_mrpb,
            persistent_min,
            persistent_max,
        }
    }

    pub fn vectorize(&self) -> i64 {
        self.vectorize
    }

    /// Inclusive range of persistent batch sizes searched.
    pub fn persistent_range(&self) -> (i64, i64) {
        (self.persistent_min, self.persistent_max)
    }

    /// Ties between divisible splits are decided before block shape.
    pub fn prioritize_divisible_split(&self) -> bool {
        self.has_rng_ops || (self.has_multiple_inputs && self.max_persistent_buffer_size <= 5 * 4 * 1024)
    }

    /// Every candidate, best first.
    ///
    /// Candidates are ordered by occupancy; those reaching the target occupancy are then
    /// reordered by [`rank`](Self::rank). The rest keep their occupancy order.
    pub fn ranked(&self) -> Vec<PersistentCandidate> {
        let mut candidates: Vec<PersistentCandidate> =
            (self.persistent_min..=self.persistent_max).map(|pb| self.candidate(pb)).collect();
        candidates.sort_by(|a, b| b.warps_per_sm.cmp(&a.warps_per_sm));
        let n_items = candidates.iter().filter(|c| c.warps_per_sm >= self.target_warps_per_sm).count();
        if n_items > 1 {
            let prioritize = self.prioritize_divisible_split();
            let warp_size = self.device.warp_size;
            candidates[..n_items].sort_by(|a, b| Self::rank(prioritize, warp_size, a, b));
        }
        for candidate in &candidates {
            tracing::trace!(%candidate, "candidate");
        }
        candidates
    }

    pub fn best(&self) -> PersistentCandidate {
        // The range is never empty: persistent_max >= persistent_min.
        self.ranked()[0]
    }

    /// `Less` when `a` is the better candidate.
    ///
    /// Criteria, in order: without divisibility priority, single-warp reduction, distance of
    /// `bdimx` to the next power of two, no padded threads, no tail in the last batch; with
    /// it, no padded threads, no tail in the last batch, power-of-two distance, occupancy and
    /// single-warp reduction. Remaining ties prefer a smaller batch when padded threads exist
    /// under divisibility priority, a larger one otherwise.
    pub fn rank(prioritize_divisible_split: bool, warp_size: i64, a: &PersistentCandidate, b: &PersistentCandidate) -> Ordering {
        let thread_tails = (b.thread_tails == 0).cmp(&(a.thread_tails == 0));
        let persistent_tails = (b.persistent_tails == 0).cmp(&(a.persistent_tails == 0));
        let occupancy = b.warps_per_sm.cmp(&a.warps_per_sm);
        let single_warp = (b.bdimx == warp_size).cmp(&(a.bdimx == warp_size));
        let pow2_distance = a.pow2_distance().cmp(&b.pow2_distance());

        let criteria = if prioritize_divisible_split {
            [thread_tails, persistent_tails, pow2_distance, occupancy, single_warp]
        } else {
            [single_warp, pow2_distance, thread_tails, persistent_tails, Ordering::Equal]
        };
        // Under divisibility priority both sides agree on `thread_tails != 0` once the
        // criteria tie, so this stays a total order.
        let batch = if prioritize_divisible_split && a.thread_tails != 0 {
            a.persistent_batch.cmp(&b.persistent_batch)
        } else {
            b.persistent_batch.cmp(&a.persistent_batch)
        };
        criteria.into_iter().fold(Ordering::Equal, Ordering::then).then(batch)
    }

    pub fn candidate(&self, persistent_batch: i64) -> PersistentCandidate {
        let bdimx = self.bdimx(persistent_batch);
        let bdimy = self.bdimy(bdimx);
        let (register_per_thread, warps_per_sm) = self.register_and_occupancy(persistent_batch, bdimx, bdimy);
        let per_batch = ceil_div(self.after_vect, persistent_batch);
        PersistentCandidate {
            persistent_batch,
            bdimx,
            bdimy,
            register_per_thread,
            warps_per_sm,
            persistent_tails: per_batch * persistent_batch - self.after_vect,
            thread_tails: bdimx - per_batch,
        }
    }

    fn bdimx(&self, persistent_batch: i64) -> i64 {
        let warp = self.device.warp_size;
        let bdimx = ceil_div(self.after_vect, persistent_batch);
        if bdimx > 16 && bdimx % warp != 0 { ceil_div(bdimx, warp) * warp } else { bdimx }
    }

    fn bdimy(&self, bdimx: i64) -> i64 {
        if !self.may_use_mrpb {
            return 1;
        }
        // Rows per block are bounded by the buffers that fit and by the waves available.
        let max_multi_reduction_factor =
            safe_div(self.device.register_file_size(), self.max_persistent_buffer_size).min(self.n_waves_max);
        safe_div(MRPB_THREADS_PER_BLOCK, bdimx).min(max_multi_reduction_factor)
    }

    fn register_and_occupancy(&self, persistent_batch: i64, bdimx: i64, bdimy: i64) -> (i64, i64) {
        let device = self.device;
        let warp = device.warp_size;
        let threads_per_block = bdimx * bdimy;
        let warps_per_block = ceil_div(threads_per_block, warp);
        let target_blocks_per_sm = ceil_div(self.target_warps_per_sm, warps_per_block);

        let buffer_per_thread =
            self.max_persistent_buffer_size / self.total_reduction_numel * self.vectorize * persistent_batch;
        let estimated_reg_per_thread = SEARCH_REGISTER_OVERHEAD + ceil_div(buffer_per_thread, BYTES_PER_REGISTER);
        let min_reg_per_thread = estimated_reg_per_thread - self.max_adjust_count;
        let target_reg_per_thread =
            device.reg_per_thread_given_threads_per_sm(target_blocks_per_sm * threads_per_block);

        let (blocks_per_sm, register_per_thread) = if !self.has_multiple_inputs && !self.has_exp_ops {
            // Maximize occupancy, giving up registers down to the minimum if needed.
            let mut blocks_per_sm =
                device.threads_per_sm_given_reg_per_thread(estimated_reg_per_thread) / threads_per_block;
            if blocks_per_sm < target_blocks_per_sm {
                blocks_per_sm = device.threads_per_sm_given_reg_per_thread(min_reg_per_thread) / threads_per_block;
            }
            (blocks_per_sm, device.reg_per_thread_given_threads_per_sm(blocks_per_sm * warps_per_block * warp))
        } else if target_reg_per_thread >= min_reg_per_thread {
            // Expensive kernels settle for the target occupancy and keep the registers.
            (target_blocks_per_sm, target_reg_per_thread)
        } else {
            let blocks_per_sm = device.threads_per_sm_given_reg_per_thread(min_reg_per_thread) / threads_per_block;
            (blocks_per_sm, device.reg_per_thread_given_threads_per_sm(blocks_per_sm * warps_per_block * warp))
        };

        let warps_per_sm = (blocks_per_sm * warps_per_block).min(device.max_warps_per_multiprocessor());
        (register_per_thread, warps_per_sm)
    }
}

/// Vectorized 2D problems: the best ranked persistent batch size.
pub fn search_heuristic(props: &PersistentKernelProperties, device: &DeviceProperties) -> ReductionParams {
    let calculator = HeuristicCalculator::new(props, device);
    let best = calculator.best();

    let mut gdimx = ceil_div(props.total_iteration_numel, best.bdimy);
    let mut gdimy = None;
    if gdimx > X_GRID_LIMIT {
        gdimy = Some(ceil_div(gdimx, X_GRID_LIMIT));
        gdimx = X_GRID_LIMIT;
    }
    let split_grid = gdimy.is_some_and(|y| y > 1);

    let mut params = ReductionParams::new(PersistentHeuristicKind::Search, props.index_type);
    params.max_register_count = Some(best.register_per_thread);
    params.project_persistent_buffers = props.project_persistent_buffers;
    params.pad_inner_reduction_to_warp = best.bdimx % device.warp_size == 0;
    params.batches_per_block_inner_reduction = best.persistent_batch;
    params.vectorize_inner_reduction = calculator.vectorize() > 1;
    params.unroll_factor_inner_reduction = calculator.vectorize();

    params.multiple_reds_per_blk = best.bdimy > 1;
    if params.multiple_reds_per_blk {
        params.block_dim_iter_dom = Some(ParallelType::TIDy);
    }
    if gdimx > 1 {
        params.grid_dim_iter_dom = Some(ParallelType::BIDx);
        params.split_grid_dim_iter_dom_outer = split_grid;
    }
    params.launch = LaunchParams { gdimx: split_grid.then_some(gdimx), bdimy: Some(best.bdimy), ..Default::default() };

    tracing::debug!(
        persistent = best.persistent_batch,
        bdimx = best.bdimx,
        bdimy = best.bdimy,
        warps_per_sm = best.warps_per_sm,
        registers = best.register_per_thread,
        "selected"
    );
    params
}

// ============================================================================
// SHARED MEMORY
// ============================================================================

/// Buffers beyond the register budget: full-width blocks with buffers in shared memory.
pub fn shared_memory_heuristic(props: &PersistentKernelProperties, device: &DeviceProperties) -> Result<ReductionParams> {
    let vectorize = props.vectorize_factor;
    let bdimx = device.max_threads_per_block;
    ensure!(
        props.total_reduction_numel >= vectorize * bdimx,
        ReductionTooSmallSnafu { reduction: props.total_reduction_numel, vectorize, bdimx }
    );
    let persistent_batch = ceil_div(props.total_reduction_numel, vectorize * bdimx);

    let mut params = ReductionParams::new(PersistentHeuristicKind::SharedMemory, props.index_type);
    params.shared_mem_persistent_buffer = true;
    params.project_persistent_buffers = props.project_persistent_buffers;
    params.pad_inner_reduction_to_warp = true;
    params.batches_per_block_inner_reduction = persistent_batch;
    params.unroll_factor_inner_reduction = vectorize;
    params.vectorize_inner_reduction = vectorize > 1;
    params.grid_dim_iter_dom = Some(ParallelType::BIDx);

    tracing::debug!(persistent = persistent_batch, bdimx, vectorize, "shared memory persistence");
    Ok(params)
}

// ============================================================================
// LEGACY
// ============================================================================

/// Persistent batches per thread above which block width grows instead.
const BATCHES_PER_BLOCK_INNER_REDUCTION_MAX: i64 = 10;
const L1_CACHE_BYTES: i64 = 32 * 1024;
const L1_ACTIVE_THREADS: i64 = 1024;

/// Closed-form sizing: threads first, then unrolling, then rows per block, followed by a
/// register/occupancy adjustment for vectorized kernels with more blocks than SMs.
pub fn legacy_heuristic(props: &PersistentKernelProperties, device: &DeviceProperties) -> ReductionParams {
    let total_reduction_numel = props.total_reduction_numel;
    let total_iteration_numel = props.total_iteration_numel;
    let inner_most_dimension_numel = props.inner_most_dimension_numel;
    let n_tensor_inputs = props.n_tensor_inputs;
    let max_input_dtype_size = props.max_dtype_size;
    let vectorize_factor = props.vectorize_factor;

    let n_elems = total_reduction_numel.saturating_mul(total_iteration_numel);
    let outer_reduction_numel = total_reduction_numel / inner_most_dimension_numel;
    let sm_count = device.multiprocessor_count;
    let max_threads_per_sm = device.max_threads_per_multiprocessor;

    // Unrolling shrinks with the data type and with many inputs (from four inputs on).
    let max_unroll =
        ceil_div((MAX_VECTOR_BYTES / max_input_dtype_size).max(1), last_pow2((n_tensor_inputs >> 2).max(1)));

    // Narrow "warps" help small reductions whose data stays in cache.
    let fits_in_l2 =
        n_elems.saturating_mul(max_input_dtype_size).saturating_mul(n_tensor_inputs) < device.l2_cache_size;
    let warp_size_based_on_l2 = if fits_in_l2 { (32 / max_input_dtype_size).max(1) } else { 16 };
    let warp_size_based_on_l1 = ceil_div(
        total_reduction_numel,
        safe_div(L1_CACHE_BYTES, n_tensor_inputs * max_input_dtype_size * L1_ACTIVE_THREADS),
    )
    .min(16);
    let warp_size = warp_size_based_on_l1.min(warp_size_based_on_l2);

    let mut target_unroll = 1;
    let mut target_iterations = 1;
    let min_target_iterations = safe_div(32, max_input_dtype_size);
    let mut max_threads_in_block = warp_size.max(ceil_div(total_reduction_numel, min_target_iterations));

    let mut target_blocks = ceil_div(n_elems, warp_size);
    if target_blocks > sm_count {
        let mut available_unroll = safe_div(n_elems, warp_size * sm_count);
        let mut flip = true;
        // Alternate between unrolling and iterations.
        while available_unroll > 1 && (target_unroll * 2 <= max_unroll || target_iterations * 2 <= max_unroll) {
            if target_unroll * 2 <= max_unroll && flip {
                target_unroll *= 2;
            }
            if target_iterations * 2 <= max_unroll && !flip {
                target_iterations *= 2;
            }
            available_unroll = safe_div(n_elems, warp_size * sm_count * target_unroll * target_iterations);
            flip = !flip;
        }
        target_blocks = ceil_div(n_elems, warp_size * target_unroll * target_iterations);
    }
    target_blocks = target_blocks.min(sm_count * 4);

    if target_blocks * target_unroll * target_iterations < n_elems {
        let cap = if outer_reduction_numel == 1 { device.max_threads_per_block } else { ceil_div(max_threads_per_sm, 4) };
        max_threads_in_block = ceil_div(n_elems, target_blocks * target_unroll).min(cap);
    }
    if max_threads_in_block % warp_size != 0 {
        max_threads_in_block += warp_size - max_threads_in_block % warp_size;
        max_threads_in_block = max_threads_in_block.min(device.max_threads_per_block);
    }

    let max_multi_reduction_factor = safe_div(device.register_file_size(), props.max_persistent_buffer_size)
        .min(ceil_div(total_iteration_numel, sm_count));

    let mut inner_reduction_unroll_factor = vectorize_factor.max(1);
    let mut outer_reduction_unroll_factor = 1;

    let mut bdimx = ceil_div(inner_most_dimension_numel, inner_reduction_unroll_factor)
        .max(warp_size)
        .min(max_threads_in_block);
    if bdimx * inner_reduction_unroll_factor != inner_most_dimension_numel {
        bdimx = if bdimx > warp_size { bdimx - bdimx % warp_size } else { last_pow2(bdimx) };
        bdimx = if bdimx < warp_size { last_pow2(bdimx) } else { bdimx - bdimx % warp_size };
    }
    let mut bdimy = safe_div(warp_size, bdimx).min(max_multi_reduction_factor);
    let mut bdimz =
        safe_div(max_threads_in_block, bdimx * bdimy).min(outer_reduction_numel).min(Z_BLOCK_LIMIT);

    let mut vectorize = false;
    if vectorize_factor > 1 && inner_reduction_unroll_factor > 1 {
        vectorize = true;
        inner_reduction_unroll_factor = last_pow2(inner_reduction_unroll_factor).min(vectorize_factor);
    }

    // Start from four warps to keep the cross-thread reduction cheap.
    let threads_after_vectorize = inner_most_dimension_numel / inner_reduction_unroll_factor;
    let min_threads_per_block = 4 * device.warp_size;
    if outer_reduction_numel == 1 && vectorize {
        bdimx = min_threads_per_block.min(threads_after_vectorize).max(1);
    }
    if bdimx * bdimy * bdimz < min_threads_per_block {
        bdimy = safe_div(min_threads_per_block, bdimx * bdimz).min(max_multi_reduction_factor);
    }

    let mut batches_inner = ceil_div(inner_most_dimension_numel, bdimx * inner_reduction_unroll_factor);
    if inner_reduction_unroll_factor < max_unroll {
        outer_reduction_unroll_factor = ceil_div(max_unroll, inner_reduction_unroll_factor)
            .min(ceil_div(outer_reduction_numel, bdimz));
    }
    let godim = ceil_div(total_iteration_numel, bdimy);

    // Unroll rather than grow the persistent buffer.
    while !vectorize && inner_reduction_unroll_factor < max_unroll && batches_inner >= 2 {
        inner_reduction_unroll_factor *= 2;
        batches_inner =
            round_up_pow2_or_8(ceil_div(inner_most_dimension_numel, bdimx * inner_reduction_unroll_factor));
    }
    let mut batches_outer = round_up_pow2_or_8(ceil_div(
        ceil_div(total_reduction_numel, inner_most_dimension_numel),
        bdimz * outer_reduction_unroll_factor,
    ));
    while outer_reduction_unroll_factor < max_unroll && batches_outer >= 2 {
        outer_reduction_unroll_factor *= 2;
        batches_outer = round_up_pow2_or_8(ceil_div(outer_reduction_numel, bdimz * outer_reduction_unroll_factor));
    }

    bdimx = ceil_div(inner_most_dimension_numel, inner_reduction_unroll_factor * batches_inner);
    bdimz = ceil_div(outer_reduction_numel, outer_reduction_unroll_factor * batches_outer);

    // Move persistent batches into threads while the block can still double.
    while bdimx * bdimy * bdimz * 2 <= max_threads_in_block
        && (batches_inner > BATCHES_PER_BLOCK_INNER_REDUCTION_MAX || batches_outer >= 2)
    {
        if batches_inner > BATCHES_PER_BLOCK_INNER_REDUCTION_MAX {
            bdimx *= 2;
            batches_inner = ceil_div(inner_most_dimension_numel, inner_reduction_unroll_factor * bdimx);
            continue;
        }
        if batches_outer >= 2
            && batches_outer != round_up_pow2_or_8(batches_outer / 2)
            && bdimz * 2 <= Z_BLOCK_LIMIT
        {
            batches_outer = round_up_pow2_or_8(batches_outer / 2);
            bdimz = ceil_div(outer_reduction_numel, batches_outer * outer_reduction_unroll_factor);
            continue;
        }
        break;
    }

    // Very high register pressure spills; halve the batches when the block can grow.
    let buffer_registers =
        |inner: i64, outer: i64| inner * outer * inner_reduction_unroll_factor * outer_reduction_unroll_factor * 4;
    if buffer_registers(batches_inner, batches_outer) > MAX_REGISTERS_PER_THREAD * 3
        && bdimx * bdimy * bdimz * 2 <= max_threads_in_block
        && batches_inner > BATCHES_PER_BLOCK_INNER_REDUCTION_MAX
    {
        batches_inner /= 2;
    }
    if buffer_registers(batches_inner, batches_outer) > MAX_REGISTERS_PER_THREAD * 3
        && bdimx * bdimy * bdimz * 2 <= max_threads_per_sm
        && batches_outer >= 2
    {
        batches_outer /= 2;
    }

    let device_warp = device.warp_size;
    let padded_bdimx = if bdimx % device_warp == 0 { bdimx } else { bdimx + (device_warp - bdimx % device_warp) };
    let pad_bdimx = bdimx > 16 && padded_bdimx * bdimy * bdimz < device.max_threads_per_block;

    // The register estimate only holds for vectorized accesses, and only matters with enough
    // blocks and batches to fill the device.
    let mut register_per_thread = MAX_REGISTERS_PER_THREAD;
    if vectorize && godim > sm_count && batches_inner > 1 {
        let buffer_per_thread = props.max_persistent_buffer_size / inner_most_dimension_numel
            * batches_inner
            * inner_reduction_unroll_factor;
        let estimated_register_count = buffer_per_thread / BYTES_PER_REGISTER + REGISTER_OVERHEAD;

        let threads_per_block = (if pad_bdimx { padded_bdimx } else { bdimx }) * bdimy * bdimz;
        let blocks_per_sm_estimated =
            device.threads_per_sm_given_reg_per_thread(estimated_register_count) / threads_per_block;

        // Give up at most a tenth of the estimate.
        let register_count_minimum = estimated_register_count * 9 / 10;
        let blocks_per_sm_maximum =
            device.threads_per_sm_given_reg_per_thread(register_count_minimum) / threads_per_block;
        let register_count_minimum =
            device.reg_per_thread_given_threads_per_sm(blocks_per_sm_maximum * threads_per_block);

        // 40% occupancy.
        let blocks_per_sm_wanted = ceil_div(max_threads_per_sm * 2 / 5, threads_per_block);

        register_per_thread = if blocks_per_sm_estimated < blocks_per_sm_wanted
            && blocks_per_sm_maximum > blocks_per_sm_estimated
        {
            let register_count_occupancy =
                device.reg_per_thread_given_threads_per_sm(blocks_per_sm_wanted * threads_per_block);
            register_count_minimum.max(register_count_occupancy)
        } else {
            device.reg_per_thread_given_threads_per_sm(blocks_per_sm_estimated * threads_per_block)
        };
    }

    let mut params = ReductionParams::new(PersistentHeuristicKind::Legacy, props.index_type);
    params.max_register_count = Some(register_per_thread);
    params.project_persistent_buffers = props.project_persistent_buffers;
    params.pad_inner_reduction_to_warp = pad_bdimx;
    params.batches_per_block_inner_reduction = batches_inner;
    params.unroll_factor_inner_reduction = inner_reduction_unroll_factor;
    params.vectorize_inner_reduction = vectorize;

    params.multiple_reds_per_blk = bdimy > 1;
    if params.multiple_reds_per_blk {
        params.block_dim_iter_dom = Some(ParallelType::TIDy);
    }
    let mut gdimx = None;
    if godim > 1 {
        params.grid_dim_iter_dom = Some(ParallelType::BIDx);
        if godim > X_GRID_LIMIT {
            params.split_grid_dim_iter_dom_outer = true;
            gdimx = Some(X_GRID_LIMIT);
        }
    }

    params.schedule_3d = total_reduction_numel != inner_most_dimension_numel;
    if params.schedule_3d {
        params.batches_per_block_outer_reduction = batches_outer;
        params.block_dim_outer_reduction = Some(ParallelType::TIDz);
        params.cross_block_outer_reduction = true;
        params.unroll_factor_outer_reduction = outer_reduction_unroll_factor;
    }
    params.launch = LaunchParams { gdimx, bdimy: Some(bdimy), ..Default::default() };

    tracing::debug!(
        bdimx = if pad_bdimx { padded_bdimx } else { bdimx },
        bdimy,
        bdimz,
        batches_inner,
        batches_outer,
        registers = register_per_thread,
        "legacy persistent heuristic"
    );
    params
}
