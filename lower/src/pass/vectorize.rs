//! Vectorized loops.
//!
//! A vectorize loop becomes one wide access. Its computations take a single guard built at
//! the first lane. When the alignment of every global tensor the loop touches is proven at
//! compile time the loop is just marked; otherwise a run-time check picks between the vector
//! loop and a serial copy.

use std::collections::{BTreeSet, HashMap};

use tessel_ir::kernel::{ForLoop, IfThenElse, KirExpr, Predicate, PredicateKind, collect_ops};
use tessel_ir::{Fusion, MemoryType, ParallelType, ScalarValue, TvId, ValId};

use super::{PredicateBuilder, for_each_op_mut};

#[tracing::instrument(skip_all)]
pub fn vectorize_pass(fusion: &mut Fusion, builder: &PredicateBuilder<'_>, exprs: Vec<KirExpr>) -> Vec<KirExpr> {
    exprs
        .into_iter()
        .map(|mut node| match node {
            KirExpr::ForLoop(fl) if fl.parallel_type == ParallelType::Vectorize && !fl.vectorize => {
                vectorize(fusion, builder, fl)
            }
            _ => {
                for body in node.scopes_mut() {
                    *body = vectorize_pass(fusion, builder, std::mem::take(body));
                }
                node
            }
        })
        .collect()
}

fn vectorize(fusion: &mut Fusion, builder: &PredicateBuilder<'_>, fl: ForLoop) -> KirExpr {
    let mut vector = fl.clone();
    vector.vectorize = true;
    let first_lane = HashMap::from([(fl.index, fl.start)]);
    for_each_op_mut(&mut vector.body, &mut |op| {
        if let Some(Predicate { kind: PredicateKind::Inline, value: None }) = op.predicate {
            let value = builder.op_predicate(fusion, op, &first_lane);
            op.predicate = Some(Predicate { kind: PredicateKind::Vectorize, value });
        }
    });

    let aligned = alignment_condition(fusion, &fl);
    if fusion.eval_const(aligned) == Some(ScalarValue::Bool(true)) {
        return KirExpr::ForLoop(vector);
    }
    tracing::debug!(condition = %fusion.display_val(aligned), "misaligned fallback");
    let mut scalar = fl;
    scalar.parallel_type = ParallelType::Serial;
    for_each_op_mut(&mut scalar.body, &mut |op| {
        if let Some(value) = builder.serial_fallback_predicate(fusion, op) {
            op.predicate = Some(Predicate { kind: PredicateKind::Inline, value: Some(value) });
        }
    });
    KirExpr::IfThenElse(IfThenElse {
        kind: PredicateKind::Misaligned,
        condition: aligned,
        then_body: vec![KirExpr::ForLoop(vector)],
        else_body: vec![KirExpr::ForLoop(scalar)],
    })
}

/// `extent % width == 0` over the innermost root extent of every global tensor accessed.
fn alignment_condition(fusion: &mut Fusion, fl: &ForLoop) -> ValId {
    let node = KirExpr::ForLoop(fl.clone());
    let tensors: BTreeSet<TvId> = collect_ops(std::slice::from_ref(&node))
        .into_iter()
        .flat_map(|op| {
            let expr = fusion.expr(op.expr);
            expr.input_tvs().into_iter().chain(std::iter::once(expr.output))
        })
        .filter(|tv| fusion.tv(*tv).memory_type == MemoryType::Global)
        .collect();

    // Tensors derived from one another share their extents.
    let extents: BTreeSet<ValId> = tensors
        .into_iter()
        .filter_map(|tv| fusion.tv(tv).root.last().map(|id| fusion.iter_domain(*id).extent))
        .collect();
    let zero = fusion.int(0);
    let mut terms = Vec::new();
    for extent in extents {
        let remainder = fusion.modulo(extent, fl.stop);
        terms.push(fusion.eq(remainder, zero));
    }
    fusion.and_all(terms)
}
