//! Kernel-wide analyses computed before loop nests exist.
//!
//! Each analysis reads the scheduled fusion (and usually the [`IdGraphs`](crate::IdGraphs))
//! and produces a map the passes consult later. They run in a fixed order in
//! [`lower`](crate::lower); later analyses take earlier ones as arguments.

pub mod divisible_split;
pub mod double_buffer;
pub mod non_divisible;
pub mod padded_dims;
pub mod parallel_dims;
pub mod predicate_elimination;
pub mod replace_sizes;
pub mod sync_map;
pub mod thread_pred;

pub use divisible_split::get_all_divisible_splits;
pub use double_buffer::DoubleBufferInfo;
pub use non_divisible::NonDivisibleSplitInfo;
pub use padded_dims::{WarpPaddedParallelInfo, collect_padded_parallel_dims};
pub use parallel_dims::{ParallelDim, ParallelDimensionMap};
pub use predicate_elimination::{PredicateElimination, PredicateReason};
pub use replace_sizes::replace_symbolic_sizes;
pub use sync_map::SyncMap;
pub use thread_pred::{ThreadPredicateInfo, ThreadPredicateMap};

use std::collections::BTreeSet;

use tessel_ir::{Fusion, IdId, ParallelType, TvId};

/// Tensors touched by the expressions the outputs depend on, in handle order.
pub fn kernel_tensors(fusion: &Fusion) -> Vec<TvId> {
    let mut tvs = BTreeSet::new();
    for expr in fusion.exprs() {
        let expr = fusion.expr(expr);
        tvs.insert(expr.output);
        tvs.extend(expr.input_tvs());
    }
    tvs.into_iter().collect()
}

/// First leaf axis of `tv` mapped to `pt`.
pub fn leaf_with(fusion: &Fusion, tv: TvId, pt: ParallelType) -> Option<IdId> {
    fusion.tv(tv).leaf.iter().copied().find(|id| fusion.iter_domain(*id).parallel_type == pt)
}
