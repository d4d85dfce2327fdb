use std::collections::{BTreeMap, BTreeSet, HashSet};

use tessel_ir::{Fusion, IdExpr, IdExprId, TvId};

/// Splits that may leave a partial last tile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonDivisibleSplitInfo {
    /// Splits whose out-of-range iterations each tensor must guard.
    pub splits_to_predicate: BTreeMap<TvId, Vec<IdExprId>>,
    /// Splits assumed divisible (vectorization) whose divisibility is only known at run time.
    pub splits_to_validate: BTreeSet<IdExprId>,
}

impl NonDivisibleSplitInfo {
    #[tracing::instrument(skip_all)]
    pub fn build(fusion: &Fusion, divisible_splits: &HashSet<IdExprId>) -> Self {
        let mut info = Self::default();
        for expr in fusion.exprs() {
            let tv = fusion.expr(expr).output;
            for handle in fusion.transforms_of(tv) {
                let IdExpr::Split { input, factor, .. } = *fusion.id_expr(handle) else { continue };
                let extent = fusion.iter_domain(input).extent;
                let provably_divisible = match (fusion.eval_int(extent), fusion.eval_int(factor)) {
                    (Some(e), Some(f)) => f != 0 && e % f == 0,
                    _ => false,
                };
                if provably_divisible {
                    continue;
                }
                if divisible_splits.contains(&handle) {
                    info.splits_to_validate.insert(handle);
                } else {
                    info.splits_to_predicate.entry(tv).or_default().push(handle);
                }
            }
        }
        info
    }

    pub fn splits_of(&self, tv: TvId) -> &[IdExprId] {
        self.splits_to_predicate.get(&tv).map(Vec::as_slice).unwrap_or_default()
    }
}
