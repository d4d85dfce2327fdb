use std::collections::BTreeMap;

use derive_more::Display;
use tessel_ir::{ExprId, Fusion, IdExpr, IdExprId, ParallelType};

use super::{NonDivisibleSplitInfo, ParallelDimensionMap, ThreadPredicateMap};

/// Why a computation cannot run unguarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PredicateReason {
    #[display("non-divisible split {_0}")]
    NonDivisibleSplit(IdExprId),
    #[display("resize {_0}")]
    Resize(IdExprId),
    #[display("{_0} extent differs from its launch dimension")]
    InexactParallelDim(ParallelType),
    #[display("redundant write")]
    ThreadPredicate,
}

/// Computations proven to stay in bounds need no guard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredicateElimination {
    reasons: BTreeMap<ExprId, Vec<PredicateReason>>,
}

impl PredicateElimination {
    #[tracing::instrument(skip_all)]
    pub fn build(
        fusion: &Fusion,
        non_divisible: &NonDivisibleSplitInfo,
        parallel_dims: &ParallelDimensionMap,
        thread_predicates: &ThreadPredicateMap,
    ) -> Self {
        let mut reasons = BTreeMap::new();
        for expr in fusion.exprs() {
            let tv = fusion.expr(expr).output;
            let mut found: Vec<PredicateReason> =
                non_divisible.splits_of(tv).iter().map(|s| PredicateReason::NonDivisibleSplit(*s)).collect();
            found.extend(
                fusion
                    .transforms_of(tv)
                    .into_iter()
                    .filter(|h| matches!(fusion.id_expr(*h), IdExpr::Resize { .. }))
                    .map(PredicateReason::Resize),
            );
            for &id in &fusion.tv(tv).leaf {
                let domain = fusion.iter_domain(id);
                let pt = domain.parallel_type;
                if !pt.is_thread_or_block() || domain.is_broadcast() {
                    continue;
                }
                // An exact dimension is shared by every axis mapped to it.
                let reason = PredicateReason::InexactParallelDim(pt);
                if !parallel_dims.is_exact(pt) && !found.contains(&reason) {
                    found.push(reason);
                }
            }
            if !thread_predicates.predicated_types(fusion, tv).is_empty() {
                found.push(PredicateReason::ThreadPredicate);
            }
            if !found.is_empty() {
                tracing::debug!(expr = %expr, reasons = ?found, "predicate kept");
                reasons.insert(expr, found);
            }
        }
        Self { reasons }
    }

    pub fn can_omit(&self, expr: ExprId) -> bool {
        !self.reasons.contains_key(&expr)
    }

    pub fn reasons(&self, expr: ExprId) -> &[PredicateReason] {
        self.reasons.get(&expr).map(Vec::as_slice).unwrap_or_default()
    }

    /// Computations that keep a guard.
    pub fn predicated(&self) -> impl Iterator<Item = ExprId> + '_ {
        self.reasons.keys().copied()
    }
}
