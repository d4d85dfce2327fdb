//! Predicate construction and conditional generation.
//!
//! A computation's guard is the conjunction of:
//!
//! - root bounds, when a non-divisible split or a resize can push its index out of range.
//!   Leaf indices are mapped back to the root through the tensor's transforms: a split
//!   recombines `outer * inner_extent + inner`, a merge splits into `/` and `%`, and a resize
//!   shifts by its left padding (and must stay non-negative);
//! - `index < extent` for thread/block dimensions launched wider than the axis;
//! - the thread predicate masking redundant writes.
//!
//! The loop-index bindings carried by the computation are substituted last.

use std::collections::HashMap;

use snafu::ensure;
use tessel_dtype::DataType;
use tessel_ir::kernel::{IfThenElse, KirExpr, KirOp, Predicate, PredicateKind};
use tessel_ir::{Fusion, IdExpr, IdId, ScalarValue, TvId, ValId};

use super::LoopIndexMap;
use crate::IdGraphs;
use crate::analysis::{NonDivisibleSplitInfo, PredicateElimination, PredicateReason, ThreadPredicateMap};
use crate::error::{Result, TypeMismatchSnafu};

/// Everything needed to build the guard of a computation.
#[derive(Debug, Clone, Copy)]
pub struct PredicateBuilder<'a> {
    pub graphs: &'a IdGraphs,
    pub loop_indices: &'a LoopIndexMap,
    pub elimination: &'a PredicateElimination,
    pub thread_predicates: &'a ThreadPredicateMap,
    pub non_divisible: &'a NonDivisibleSplitInfo,
}

impl PredicateBuilder<'_> {
    /// Guard of `op` with `overrides` substituted under its own bindings; `None` when the
    /// computation runs unguarded.
    pub fn op_predicate(&self, fusion: &mut Fusion, op: &KirOp, overrides: &HashMap<ValId, ValId>) -> Option<ValId> {
        let reasons = self.elimination.reasons(op.expr);
        if reasons.is_empty() {
            return None;
        }
        let tv = fusion.expr(op.expr).output;

        let mut terms = Vec::new();
        if reasons.iter().any(|r| matches!(r, PredicateReason::NonDivisibleSplit(_) | PredicateReason::Resize(_))) {
            terms.extend(self.root_bounds(fusion, tv));
        }
        for reason in reasons {
            if let PredicateReason::InexactParallelDim(pt) = reason {
                for id in fusion.tv(tv).leaf.clone() {
                    let domain = fusion.iter_domain(id);
                    if domain.parallel_type != *pt || domain.is_broadcast() {
                        continue;
                    }
                    let extent = domain.extent;
                    let index = self.leaf_index(fusion, id);
                    terms.push(fusion.lt(index, extent));
                }
            }
        }
        if reasons.contains(&PredicateReason::ThreadPredicate)
            && let Some(predicate) = self.thread_predicates.predicate(fusion, tv)
        {
            terms.push(predicate);
        }

        let predicate = fusion.and_all(terms);
        let mut replacements = overrides.clone();
        replacements.extend(op.bindings.iter().copied());
        Some(fusion.substitute(predicate, &replacements))
    }

    /// Guard of `op` in the serial copy of a vectorized loop. Splits assumed divisible for the
    /// vector path may leave a partial tile there, so their root bounds are added.
    pub fn serial_fallback_predicate(&self, fusion: &mut Fusion, op: &KirOp) -> Option<ValId> {
        let own = self.op_predicate(fusion, op, &HashMap::new());
        let tv = fusion.expr(op.expr).output;
        let assumed_divisible =
            fusion.transforms_of(tv).into_iter().any(|h| self.non_divisible.splits_to_validate.contains(&h));
        let bounded = self
            .elimination
            .reasons(op.expr)
            .iter()
            .any(|r| matches!(r, PredicateReason::NonDivisibleSplit(_) | PredicateReason::Resize(_)));
        if !assumed_divisible || bounded {
            return own;
        }

        let mut terms = self.root_bounds(fusion, tv);
        terms.extend(own);
        let predicate = fusion.and_all(terms);
        let bindings: HashMap<ValId, ValId> = op.bindings.iter().copied().collect();
        Some(fusion.substitute(predicate, &bindings))
    }

    fn leaf_index(&self, fusion: &mut Fusion, id: IdId) -> ValId {
        let domain = fusion.iter_domain(id);
        let (start, parallel_type) = (domain.start, domain.parallel_type);
        if domain.is_broadcast() {
            return start;
        }
        match self.loop_indices.index_of(self.graphs, id) {
            Some(index) => index,
            None => match parallel_type.index_name() {
                Some(name) => fusion.named_scalar(name, DataType::Index),
                None => start,
            },
        }
    }

    fn root_bounds(&self, fusion: &mut Fusion, tv: TvId) -> Vec<ValId> {
        let mut index: HashMap<IdId, ValId> = HashMap::new();
        for id in fusion.tv(tv).leaf.clone() {
            let value = self.leaf_index(fusion, id);
            index.insert(id, value);
        }

        let mut terms = Vec::new();
        for handle in fusion.transforms_of(tv).into_iter().rev() {
            match *fusion.id_expr(handle) {
                IdExpr::Split { input, outer, inner, .. } => {
                    let (Some(&o), Some(&i)) = (index.get(&outer), index.get(&inner)) else { continue };
                    let inner_extent = fusion.iter_domain(inner).extent;
                    let scaled = fusion.mul(o, inner_extent);
                    let value = fusion.add(scaled, i);
                    index.insert(input, value);
                }
                IdExpr::Merge { outer, inner, out } => {
                    let Some(&value) = index.get(&out) else { continue };
                    let inner_extent = fusion.iter_domain(inner).extent;
                    let o = fusion.div(value, inner_extent);
                    let i = fusion.modulo(value, inner_extent);
                    index.insert(outer, o);
                    index.insert(inner, i);
                }
                IdExpr::Resize { input, out, left, .. } => {
                    let Some(&value) = index.get(&out) else { continue };
                    let shifted = fusion.sub(value, left);
                    let zero = fusion.int(0);
                    let negative = fusion.lt(shifted, zero);
                    terms.push(fusion.not(negative));
                    index.insert(input, shifted);
                }
            }
        }

        for id in fusion.tv(tv).root.clone() {
            let domain = fusion.iter_domain(id);
            if domain.is_broadcast() {
                continue;
            }
            let extent = domain.extent;
            if let Some(&value) = index.get(&id) {
                terms.push(fusion.lt(value, extent));
            }
        }
        terms
    }
}

/// Materialize guards as conditionals. Computations already carrying a value keep it;
/// inline and vectorize guards without one are built here. Neighbouring computations with
/// the same guard share one conditional.
#[tracing::instrument(skip_all)]
pub fn insert_predicates(fusion: &mut Fusion, builder: &PredicateBuilder<'_>, exprs: Vec<KirExpr>) -> Result<Vec<KirExpr>> {
    let mut out: Vec<KirExpr> = Vec::with_capacity(exprs.len());
    for mut node in exprs {
        for body in node.scopes_mut() {
            *body = insert_predicates(fusion, builder, std::mem::take(body))?;
        }
        if let KirExpr::IfThenElse(ite) = &node {
            ensure_bool(fusion, ite.condition)?;
        }
        let KirExpr::Op(mut op) = node else {
            out.push(node);
            continue;
        };

        let condition = match op.predicate {
            Some(Predicate { value: Some(value), .. }) => Some(value),
            Some(Predicate { kind: PredicateKind::Inline | PredicateKind::Vectorize, value: None }) => {
                builder.op_predicate(fusion, &op, &HashMap::new())
            }
            _ => None,
        };
        let kind = op.predicate.as_ref().map_or(PredicateKind::Inline, |p| p.kind);
        if let (Some(predicate), Some(value)) = (op.predicate.as_mut(), condition) {
            predicate.value = Some(value);
        }
        let Some(condition) = condition.filter(|c| fusion.eval_const(*c) != Some(ScalarValue::Bool(true))) else {
            out.push(KirExpr::Op(op));
            continue;
        };
        ensure_bool(fusion, condition)?;

        if let Some(KirExpr::IfThenElse(previous)) = out.last_mut()
            && previous.kind == kind
            && matches!(kind, PredicateKind::Inline | PredicateKind::Vectorize)
            && previous.else_body.is_empty()
            && previous.then_body.iter().all(|n| matches!(n, KirExpr::Op(_)))
            && fusion.same_value(previous.condition, condition)
        {
            previous.then_body.push(KirExpr::Op(op));
            continue;
        }
        out.push(KirExpr::IfThenElse(IfThenElse {
            kind,
            condition,
            then_body: vec![KirExpr::Op(op)],
            else_body: Vec::new(),
        }));
    }
    Ok(out)
}

fn ensure_bool(fusion: &Fusion, condition: ValId) -> Result<()> {
    let found = fusion.val(condition).dtype;
    ensure!(
        found == DataType::Bool,
        TypeMismatchSnafu { val: fusion.display_val(condition).to_string(), expected: DataType::Bool, found }
    );
    Ok(())
}
