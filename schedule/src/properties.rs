//! Problem description the persistent heuristics consume, and its extraction from a fusion.

use std::collections::HashSet;

use bon::bon;
use tessel_device::DeviceProperties;
use tessel_dtype::IndexType;
use tessel_ir::{ExprId, ExprKind, ExpressionEvaluator, Fusion, IdId, TvId};

use crate::error::{NoReductionSnafu, Result, UnknownExtentSnafu};
use crate::utils::MAX_VECTOR_BYTES;

// ============================================================================
// PROPERTIES
// ============================================================================

/// Sizes and traits of a normalization fusion, all evaluated for one set of run-time shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PersistentKernelProperties {
    /// Elements reduced into each output element.
    pub total_reduction_numel: i64,
    /// Independent reductions (rows).
    pub total_iteration_numel: i64,
    /// Elements of the contiguous innermost reduction dimensions.
    pub inner_most_dimension_numel: i64,
    /// The innermost axis is reduced.
    pub fastest_dim_reduction: bool,
    pub n_tensor_inputs: i64,
    pub max_dtype_size: i64,
    /// Bytes of persistent buffers one row keeps live.
    pub max_persistent_buffer_size: i64,
    pub max_buffer_dtype_size: i64,
    pub vectorize_factor: i64,
    /// Recompute buffers from the inputs instead of keeping intermediates.
    pub project_persistent_buffers: bool,
    pub index_type: IndexType,
    pub has_rng_op: bool,
    pub has_exp_op: bool,
    pub has_fused_op_before_reduction: bool,
}

#[bon]
impl PersistentKernelProperties {
    /// Describe a problem directly. Unset sizes describe one plain inner reduction of a single
    /// input with a single persistent buffer.
    #[builder(finish_fn = build)]
    pub fn builder(
        total_reduction_numel: i64,
        total_iteration_numel: i64,
        inner_most_dimension_numel: Option<i64>,
        #[builder(default = true)] fastest_dim_reduction: bool,
        #[builder(default = 1)] n_tensor_inputs: i64,
        #[builder(default = 4)] max_dtype_size: i64,
        max_persistent_buffer_size: Option<i64>,
        max_buffer_dtype_size: Option<i64>,
        vectorize_factor: Option<i64>,
        #[builder(default)] project_persistent_buffers: bool,
        #[builder(default)] index_type: IndexType,
        #[builder(default)] has_rng_op: bool,
        #[builder(default)] has_exp_op: bool,
        #[builder(default)] has_fused_op_before_reduction: bool,
    ) -> Self {
        let inner_most_dimension_numel = inner_most_dimension_numel.unwrap_or(total_reduction_numel);
        Self {
            total_reduction_numel,
            total_iteration_numel,
            inner_most_dimension_numel,
            fastest_dim_reduction,
            n_tensor_inputs,
            max_dtype_size,
            max_persistent_buffer_size: max_persistent_buffer_size
                .unwrap_or(total_reduction_numel * max_dtype_size),
            max_buffer_dtype_size: max_buffer_dtype_size.unwrap_or(max_dtype_size),
            vectorize_factor: vectorize_factor
                .unwrap_or_else(|| max_vectorize_factor(inner_most_dimension_numel, max_dtype_size)),
            project_persistent_buffers,
            index_type,
            has_rng_op,
            has_exp_op,
            has_fused_op_before_reduction,
        }
    }
}

impl PersistentKernelProperties {
    /// Evaluate the properties of `fusion` for the sizes bound in `evaluator`.
    ///
    /// The first reduction is the reference; [`can_schedule_compile_time`](crate::can_schedule_compile_time)
    /// guarantees the others match it.
    #[tracing::instrument(skip_all)]
    pub fn from_fusion(fusion: &Fusion, evaluator: &ExpressionEvaluator, device: &DeviceProperties) -> Result<Self> {
        let reductions = reduction_tvs(fusion);
        let Some(&reference) = reductions.first() else {
            return NoReductionSnafu.fail();
        };

        let mut total_reduction_numel = 1;
        let mut total_iteration_numel = 1;
        for &id in &fusion.tv(reference).root {
            let domain = fusion.iter_domain(id);
            if domain.is_broadcast() {
                continue;
            }
            let extent = evaluate_extent(fusion, evaluator, id)?;
            if domain.is_reduction() {
                total_reduction_numel *= extent;
            } else {
                total_iteration_numel *= extent;
            }
        }

        let mut inner_most_dimension_numel = 1;
        let mut fastest_dim_reduction = false;
        let mut seen_axis = false;
        for &id in fusion.tv(reference).root.iter().rev() {
            let domain = fusion.iter_domain(id);
            if domain.is_broadcast() {
                continue;
            }
            if !domain.is_reduction() {
                break;
            }
            if !seen_axis {
                fastest_dim_reduction = true;
            }
            inner_most_dimension_numel *= evaluate_extent(fusion, evaluator, id)?;
            seen_axis = true;
        }
        if !seen_axis {
            inner_most_dimension_numel = 1;
        }

        let inputs: Vec<TvId> = fusion.inputs().to_vec();
        let max_dtype_size = inputs.iter().map(|tv| fusion.tv(*tv).dtype.bytes() as i64).max().unwrap_or(1);

        let buffers = persistent_buffers(fusion);
        let max_buffer_dtype_size = buffers.iter().map(|tv| fusion.tv(*tv).dtype.bytes() as i64).max().unwrap_or(1);
        let persistent_size: i64 =
            buffers.iter().map(|tv| fusion.tv(*tv).dtype.bytes() as i64 * total_reduction_numel).sum();

        // Inputs the buffers can be recomputed from; random values cannot be recomputed.
        let live: HashSet<ExprId> = fusion.exprs().into_iter().collect();
        let mut projectable = true;
        let mut projected_inputs = HashSet::new();
        for &buffer in &buffers {
            let (tvs, exprs) = upstream(fusion, &live, buffer);
            projectable &= !exprs.iter().any(|e| matches!(fusion.expr(*e).kind, ExprKind::Rng { .. }));
            projected_inputs.extend(tvs.into_iter().filter(|tv| fusion.is_input(*tv)));
        }
        let projected_size: i64 =
            projected_inputs.iter().map(|tv| fusion.tv(*tv).dtype.bytes() as i64 * total_reduction_numel).sum();

        let has_rng_op = live.iter().any(|e| matches!(fusion.expr(*e).kind, ExprKind::Rng { .. }));
        let has_exp_op =
            live.iter().any(|e| matches!(fusion.expr(*e).kind, ExprKind::Unary { op, .. } if op.is_expensive()));

        // Recomputing expensive ops is only worth it when the buffers do not fit in registers.
        let project_persistent_buffers = projectable
            && projected_size > 0
            && projected_size < persistent_size
            && !(has_exp_op && persistent_size <= device.register_file_size());
        let max_persistent_buffer_size = if project_persistent_buffers { projected_size } else { persistent_size };

        let has_fused_op_before_reduction = reductions.iter().any(|&red| {
            let (tvs, exprs) = upstream(fusion, &live, red);
            let fused_inputs = tvs.iter().filter(|tv| fusion.is_input(**tv)).count();
            fused_inputs > 1 || exprs.iter().any(|e| matches!(fusion.expr(*e).kind, ExprKind::Rng { .. }))
        });

        let index_type = smallest_index_type(fusion, evaluator)?;

        let properties = Self {
            total_reduction_numel,
            total_iteration_numel,
            inner_most_dimension_numel,
            fastest_dim_reduction,
            n_tensor_inputs: inputs.len() as i64,
            max_dtype_size,
            max_persistent_buffer_size,
            max_buffer_dtype_size,
            vectorize_factor: max_vectorize_factor(inner_most_dimension_numel, max_dtype_size),
            project_persistent_buffers,
            index_type,
            has_rng_op,
            has_exp_op,
            has_fused_op_before_reduction,
        };
        tracing::debug!(
            reduction = properties.total_reduction_numel,
            iteration = properties.total_iteration_numel,
            buffer = properties.max_persistent_buffer_size,
            vectorize = properties.vectorize_factor,
            project = properties.project_persistent_buffers,
            "persistent kernel properties"
        );
        Ok(properties)
    }
}

// ============================================================================
// FUSION QUERIES
// ============================================================================

/// Largest power-of-two vector width that fits in one access and divides the innermost extent.
pub fn max_vectorize_factor(inner_most_dimension_numel: i64, dtype_size: i64) -> i64 {
    let mut factor = (MAX_VECTOR_BYTES / dtype_size.max(1)).max(1);
    while factor > 1 && inner_most_dimension_numel % factor != 0 {
        factor /= 2;
    }
    factor
}

/// Outputs of the live reductions, in expression order.
pub fn reduction_tvs(fusion: &Fusion) -> Vec<TvId> {
    fusion.exprs().into_iter().map(|e| fusion.expr(e)).filter(|e| e.is_reduction()).map(|e| e.output).collect()
}

/// Tensors (including `tv`) and live expressions `tv` is computed from.
pub fn upstream(fusion: &Fusion, live: &HashSet<ExprId>, tv: TvId) -> (HashSet<TvId>, HashSet<ExprId>) {
    let mut tvs = HashSet::new();
    let mut exprs = HashSet::new();
    let mut stack = vec![tv];
    while let Some(tv) = stack.pop() {
        if !tvs.insert(tv) {
            continue;
        }
        if let Some(def) = fusion.tv(tv).definition
            && live.contains(&def)
            && exprs.insert(def)
        {
            stack.extend(fusion.expr(def).input_tvs());
        }
    }
    (tvs, exprs)
}

/// Tensors that feed a reduction and are read again after it, so a whole row stays live.
pub fn persistent_buffers(fusion: &Fusion) -> Vec<TvId> {
    let live: HashSet<ExprId> = fusion.exprs().into_iter().collect();
    let reductions = reduction_tvs(fusion);
    let mut candidates: Vec<TvId> = fusion.tensors().collect();
    candidates.sort();

    candidates
        .into_iter()
        .filter(|&tv| {
            reductions.iter().any(|&red| {
                let Some(red_def) = fusion.tv(red).definition else {
                    return false;
                };
                let feeds = fusion.expr(red_def).input_tvs().into_iter().any(|i| upstream(fusion, &live, i).0.contains(&tv));
                feeds
                    && fusion.tv(tv).uses.iter().filter(|u| live.contains(*u)).any(|&use_| {
                        fusion.expr(use_).input_tvs().into_iter().any(|i| upstream(fusion, &live, i).0.contains(&red))
                    })
            })
        })
        .collect()
}

fn evaluate_extent(fusion: &Fusion, evaluator: &ExpressionEvaluator, id: IdId) -> Result<i64> {
    match evaluator.evaluate_int(fusion, fusion.iter_domain(id).extent) {
        Some(extent) => Ok(extent),
        None => UnknownExtentSnafu { axis: fusion.display_id(id).to_string() }.fail(),
    }
}

/// 32-bit indexing when every tensor has fewer than 2^31 elements.
fn smallest_index_type(fusion: &Fusion, evaluator: &ExpressionEvaluator) -> Result<IndexType> {
    let live: HashSet<ExprId> = fusion.exprs().into_iter().collect();
    let mut tvs: HashSet<TvId> = fusion.inputs().iter().copied().collect();
    tvs.extend(live.iter().map(|e| fusion.expr(*e).output));
    for tv in tvs {
        let mut numel: i64 = 1;
        for &id in &fusion.tv(tv).root {
            if fusion.iter_domain(id).is_broadcast() {
                continue;
            }
            numel = numel.saturating_mul(evaluate_extent(fusion, evaluator, id)?);
        }
        if numel > i64::from(i32::MAX) {
            return Ok(IndexType::Int64);
        }
    }
    Ok(IndexType::Int32)
}
