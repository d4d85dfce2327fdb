use std::collections::HashSet;

use tessel_ir::{Fusion, IdExpr, IdExprId, ParallelType};

use crate::IdGraphs;

/// Splits that must divide evenly: those producing a vectorized inner axis, plus every split
/// exactly equivalent to one of them.
#[tracing::instrument(skip_all)]
pub fn get_all_divisible_splits(fusion: &Fusion, graphs: &IdGraphs) -> HashSet<IdExprId> {
    let mut divisible = HashSet::new();
    for tv in super::kernel_tensors(fusion) {
        for handle in fusion.transforms_of(tv) {
            if let IdExpr::Split { inner, inner_split: true, .. } = *fusion.id_expr(handle)
                && fusion.iter_domain(inner).parallel_type == ParallelType::Vectorize
            {
                divisible.insert(handle);
            }
        }
    }

    let vectorized: Vec<IdExprId> = divisible.iter().copied().collect();
    for handle in fusion.id_exprs() {
        if !divisible.contains(&handle) && vectorized.iter().any(|v| equivalent_splits(fusion, graphs, *v, handle)) {
            divisible.insert(handle);
        }
    }
    divisible
}

fn equivalent_splits(fusion: &Fusion, graphs: &IdGraphs, a: IdExprId, b: IdExprId) -> bool {
    match (fusion.id_expr(a), fusion.id_expr(b)) {
        (
            IdExpr::Split { input: ia, factor: fa, inner_split: sa, .. },
            IdExpr::Split { input: ib, factor: fb, inner_split: sb, .. },
        ) => sa == sb && graphs.exact.are_mapped(*ia, *ib) && fusion.same_value(*fa, *fb),
        _ => false,
    }
}
