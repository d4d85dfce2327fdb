//! The lowering driver.
//!
//! [`lower`] turns a scheduled fusion into a [`LoweredKernel`]: analyses first, then the
//! kernel IR passes in a fixed order. The fusion is mutated along the way (symbolic sizes are
//! replaced, parallel types propagated, loop indices and predicates added to the value
//! table), so a fusion is lowered once.

use std::collections::BTreeMap;

use tessel_device::DeviceProperties;
use tessel_ir::instructions::sorted_evaluation_list;
use tessel_ir::kernel::{Allocate, KernelDisplay, KirExpr, walk};
use tessel_ir::{ExprId, ExprKind, Fusion, IndexType, TvId, ValId};

use crate::analysis::{
    DoubleBufferInfo, NonDivisibleSplitInfo, ParallelDimensionMap, PredicateElimination, SyncMap, ThreadPredicateMap,
    WarpPaddedParallelInfo, collect_padded_parallel_dims, get_all_divisible_splits, replace_symbolic_sizes,
};
use crate::config::{LowerConfig, LowerStage};
use crate::context::{ActiveLowering, LowerGuard};
use crate::error::{Error, Result};
use crate::id_graph::{IdGraphs, validate_and_propagate_ptype};
use crate::pass::{self, PredicateBuilder};
use crate::validation::validate_ir;

/// Result of lowering one fusion.
#[derive(Debug, Clone)]
pub struct LoweredKernel {
    pub top_level_exprs: Vec<KirExpr>,
    pub allocations: BTreeMap<TvId, Allocate>,
    pub sync_map: SyncMap,
    pub predicate_elimination: PredicateElimination,
    pub parallel_dimension_map: ParallelDimensionMap,
    pub warp_padded_info: WarpPaddedParallelInfo,
    pub thread_predicates: ThreadPredicateMap,
    pub non_divisible: NonDivisibleSplitInfo,
    pub double_buffer_info: DoubleBufferInfo,
    pub index_type: IndexType,
}

impl LoweredKernel {
    /// Scalar values the kernel needs at launch, each after its operands.
    pub fn serialization_values(&self, fusion: &Fusion) -> Vec<ValId> {
        let mut roots = Vec::new();
        for alloc in self.allocations.values() {
            roots.extend(alloc.shape.iter().copied());
            roots.push(alloc.size);
        }
        walk(&self.top_level_exprs, &mut |node, _| match node {
            KirExpr::ForLoop(fl) => roots.extend([fl.start, fl.stop, fl.step]),
            KirExpr::IfThenElse(ite) => roots.push(ite.condition),
            _ => {}
        });
        roots.extend(self.parallel_dimension_map.iter().map(|(_, dim)| dim.extent));
        sorted_evaluation_list(fusion, &roots)
    }

    pub fn display<'a>(&'a self, fusion: &'a Fusion) -> KernelDisplay<'a> {
        KernelDisplay::new(fusion, &self.top_level_exprs)
    }
}

/// Lower a scheduled fusion for `device`.
///
/// Fails with [`Error::ReentrantLowering`] when another lowering is active on this thread.
#[tracing::instrument(skip_all, fields(index_type = %config.index_type))]
pub fn lower(fusion: &mut Fusion, device: &DeviceProperties, config: &LowerConfig) -> Result<LoweredKernel> {
    let _guard = LowerGuard::acquire(ActiveLowering { index_type: config.index_type, warp_size: device.warp_size })?;
    let dump = |fusion: &Fusion, stage: LowerStage, exprs: &[KirExpr]| {
        if config.dump.enabled(stage) {
            let ir = KernelDisplay::new(fusion, exprs).verbose(config.dump.verbose);
            tracing::debug!(target: "tessel_lower::dump", stage = %stage, "\n{ir}");
        }
    };

    // ========================================================================
    // ANALYSES
    // ========================================================================

    validate_ir(fusion)?;
    let warp_padded_info = collect_padded_parallel_dims(fusion, device.warp_size)?;
    let replaced = replace_symbolic_sizes(fusion);
    tracing::debug!(replaced = replaced.len(), "symbolic sizes replaced");

    let mut graphs = IdGraphs::build(fusion)?;
    graphs.resolve_compute_with(fusion)?;
    validate_and_propagate_ptype(fusion, &graphs)?;
    if config.dump.enabled(LowerStage::Fusion) {
        for expr in fusion.exprs() {
            tracing::debug!(target: "tessel_lower::dump", stage = %LowerStage::Fusion, "{}", fusion.display_expr(expr));
        }
    }

    let double_buffer_info = DoubleBufferInfo::build(fusion, &graphs)?;
    let divisible_splits = get_all_divisible_splits(fusion, &graphs);
    let parallel_dimension_map = ParallelDimensionMap::build(fusion, &graphs, device.warp_size);
    if let Some(threads) = parallel_dimension_map.threads_per_block(fusion)
        && threads > device.max_threads_per_block
    {
        return Err(Error::validation(
            "kernel",
            format!("{threads} threads per block exceed the device limit of {}", device.max_threads_per_block),
        ));
    }
    let thread_predicates = ThreadPredicateMap::build(fusion, &parallel_dimension_map);
    let sync_map = SyncMap::build(fusion, &graphs, &thread_predicates)?;
    let non_divisible = NonDivisibleSplitInfo::build(fusion, &divisible_splits);
    let predicate_elimination =
        PredicateElimination::build(fusion, &non_divisible, &parallel_dimension_map, &thread_predicates);

    // ========================================================================
    // KERNEL IR
    // ========================================================================

    let sorted = pass::reorder_exprs_for_compute_at(fusion, &graphs)?;
    assign_rng_offsets(fusion, &sorted);
    if config.dump.enabled(LowerStage::ExprSort) {
        for &expr in &sorted {
            tracing::debug!(target: "tessel_lower::dump", stage = %LowerStage::ExprSort, "{}", fusion.display_expr(expr));
        }
    }

    let (exprs, loop_indices) = pass::generate_loop_nests(fusion, &graphs, &sorted);
    dump(fusion, LowerStage::LoopNests, &exprs);
    let exprs = pass::insert_allocations(fusion, &graphs, &double_buffer_info, exprs);
    dump(fusion, LowerStage::Allocation, &exprs);
    let exprs = pass::insert_raw_syncs(fusion, &sync_map, exprs);
    dump(fusion, LowerStage::RawSync, &exprs);
    let exprs = pass::reuse_memory_allocations(fusion, exprs)?;
    dump(fusion, LowerStage::ReuseMemory, &exprs);
    let exprs = pass::insert_war_syncs(fusion, exprs);
    dump(fusion, LowerStage::WarSync, &exprs);
    let exprs = pass::double_buffer_loops(fusion, &graphs, &double_buffer_info, exprs);
    dump(fusion, LowerStage::DoubleBuffer, &exprs);
    let exprs = pass::rotate_loops(fusion, &graphs, &config.loop_rotation, exprs)?;
    dump(fusion, LowerStage::LoopRotation, &exprs);

    let builder = PredicateBuilder {
        graphs: &graphs,
        loop_indices: &loop_indices,
        elimination: &predicate_elimination,
        thread_predicates: &thread_predicates,
        non_divisible: &non_divisible,
    };
    let exprs = pass::unroll_pass(fusion, &builder, exprs);
    dump(fusion, LowerStage::Unroll, &exprs);
    let exprs = pass::vectorize_pass(fusion, &builder, exprs);
    dump(fusion, LowerStage::Vectorize, &exprs);
    let exprs = pass::insert_predicates(fusion, &builder, exprs)?;
    dump(fusion, LowerStage::Predicates, &exprs);
    let exprs = pass::cleanup(fusion, exprs);
    dump(fusion, LowerStage::Cleanup, &exprs);

    let mut allocations = BTreeMap::new();
    walk(&exprs, &mut |node, _| {
        if let KirExpr::Allocate(alloc) = node {
            allocations.insert(alloc.buffer, alloc.clone());
        }
    });
    tracing::debug!(top_level = exprs.len(), allocations = allocations.len(), "lowered");

    Ok(LoweredKernel {
        top_level_exprs: exprs,
        allocations,
        sync_map,
        predicate_elimination,
        parallel_dimension_map,
        warp_padded_info,
        thread_predicates,
        non_divisible,
        double_buffer_info,
        index_type: config.index_type,
    })
}

/// Number random-number expressions in execution order so each draws its own stream.
fn assign_rng_offsets(fusion: &mut Fusion, sorted: &[ExprId]) {
    let mut next = 0u32;
    for &expr in sorted {
        if let ExprKind::Rng { offset, .. } = &mut fusion.expr_mut(expr).kind {
            *offset = Some(next);
            next += 1;
        }
    }
}
