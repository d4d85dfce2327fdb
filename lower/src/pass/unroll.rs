//! Unswitching and unrolling.
//!
//! An unswitched loop is guarded once by the conjunction of its computations' predicates
//! evaluated at the last iteration of every serial loop inside it. When the guard holds, a
//! copy of the nest runs without per-computation guards; otherwise the original, fully
//! guarded nest runs. Unrolled loops with a constant trip count are replicated with the loop
//! index bound to each iteration; replicas that provably stay inside a non-divisible split
//! drop the guard.

use std::collections::HashMap;

use tessel_ir::kernel::{ForLoop, IfThenElse, KirExpr, KirOp, Predicate, PredicateKind, collect_ops};
use tessel_ir::{Fusion, IdExpr, IdExprId, IdId, ParallelType};

use super::{PredicateBuilder, for_each_op_mut};
use crate::analysis::PredicateReason;

#[tracing::instrument(skip_all)]
pub fn unroll_pass(fusion: &mut Fusion, builder: &PredicateBuilder<'_>, exprs: Vec<KirExpr>) -> Vec<KirExpr> {
    let mut exprs = unswitch_scope(fusion, builder, exprs);
    for_each_op_mut(&mut exprs, &mut |op| {
        if op.predicate.is_none() && !builder.elimination.can_omit(op.expr) {
            op.predicate = Some(Predicate::new(PredicateKind::Inline));
        }
    });
    replicate_scope(fusion, builder, exprs)
}

// ============================================================================
// UNSWITCH
// ============================================================================

fn unswitch_scope(fusion: &mut Fusion, builder: &PredicateBuilder<'_>, scope: Vec<KirExpr>) -> Vec<KirExpr> {
    scope
        .into_iter()
        .map(|mut node| match node {
            KirExpr::ForLoop(fl) if fl.parallel_type == ParallelType::Unswitch => unswitch(fusion, builder, fl),
            _ => {
                for body in node.scopes_mut() {
                    *body = unswitch_scope(fusion, builder, std::mem::take(body));
                }
                node
            }
        })
        .collect()
}

/// Thread-predicated writes keep their own guard on the fast path.
fn unswitchable(builder: &PredicateBuilder<'_>, op: &KirOp) -> bool {
    !builder.elimination.reasons(op.expr).contains(&PredicateReason::ThreadPredicate)
}

fn unswitch(fusion: &mut Fusion, builder: &PredicateBuilder<'_>, fl: ForLoop) -> KirExpr {
    let node = KirExpr::ForLoop(fl);

    let mut last_iteration = HashMap::new();
    tessel_ir::kernel::walk(std::slice::from_ref(&node), &mut |expr, _| {
        if let KirExpr::ForLoop(inner) = expr
            && !inner.parallel_type.is_thread_or_block()
        {
            last_iteration.insert(inner.index, inner.stop);
        }
    });
    let overrides: HashMap<_, _> = last_iteration
        .into_iter()
        .map(|(index, stop)| {
            let one = fusion.int(1);
            (index, fusion.sub(stop, one))
        })
        .collect();

    let ops: Vec<KirOp> = collect_ops(std::slice::from_ref(&node))
        .into_iter()
        .filter(|op| unswitchable(builder, op))
        .cloned()
        .collect();
    let terms: Vec<_> = ops.iter().filter_map(|op| builder.op_predicate(fusion, op, &overrides)).collect();
    if terms.is_empty() {
        return node;
    }
    let condition = fusion.and_all(terms);
    tracing::debug!(condition = %fusion.display_val(condition), "unswitch");

    let mut fast = node.clone();
    for_each_op_mut(std::slice::from_mut(&mut fast), &mut |op| {
        if unswitchable(builder, op) {
            op.predicate = Some(Predicate::new(PredicateKind::Unswitch));
        }
    });
    KirExpr::IfThenElse(IfThenElse {
        kind: PredicateKind::Unswitch,
        condition,
        then_body: vec![fast],
        else_body: vec![node],
    })
}

// ============================================================================
// UNROLL
// ============================================================================

fn replicate_scope(fusion: &mut Fusion, builder: &PredicateBuilder<'_>, scope: Vec<KirExpr>) -> Vec<KirExpr> {
    let mut out = Vec::with_capacity(scope.len());
    for mut node in scope {
        for body in node.scopes_mut() {
            *body = replicate_scope(fusion, builder, std::mem::take(body));
        }
        match node {
            KirExpr::ForLoop(fl) if fl.parallel_type == ParallelType::Unroll => {
                match (fusion.eval_int(fl.start), fusion.eval_int(fl.stop)) {
                    (Some(start), Some(stop)) => out.extend(replicate(fusion, builder, fl, start, stop)),
                    _ => out.push(KirExpr::ForLoop(fl)),
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn replicate(fusion: &mut Fusion, builder: &PredicateBuilder<'_>, fl: ForLoop, start: i64, stop: i64) -> Vec<KirExpr> {
    let in_bounds = in_bounds_iterations(fusion, &fl);
    let (mut out, body): (Vec<_>, Vec<_>) = fl.body.into_iter().partition(|node| matches!(node, KirExpr::Allocate(_)));
    tracing::debug!(index = %fusion.display_val(fl.index), start, stop, ?in_bounds, "unroll");

    for k in start..stop {
        let value = fusion.int(k);
        let mut replica = body.clone();
        for node in &mut replica {
            node.bind_index(fl.index, value);
        }
        if let Some((split, limit)) = in_bounds
            && k < limit
        {
            let proven = fusion.bool(true);
            for_each_op_mut(&mut replica, &mut |op| {
                let only_this_split = matches!(
                    builder.elimination.reasons(op.expr),
                    [PredicateReason::NonDivisibleSplit(s)] if builder.graphs.exact.are_mapped(split_inner(fusion, *s), split)
                );
                if only_this_split && let Some(predicate) = op.predicate.as_mut() && predicate.kind == PredicateKind::Inline {
                    predicate.value = Some(proven);
                }
            });
        }
        out.extend(replica);
    }
    out
}

fn split_inner(fusion: &Fusion, split: IdExprId) -> IdId {
    match *fusion.id_expr(split) {
        IdExpr::Split { inner, .. } => inner,
        IdExpr::Merge { out, .. } | IdExpr::Resize { out, .. } => out,
    }
}

/// Iterations `k < limit` of a loop over the inner output of a non-divisible inner split of a
/// constant extent `R` by `N` read `outer * N + k`, which stays below `R` for every `outer`
/// when `k < R - (ceil(R / N) - 1) * N`.
fn in_bounds_iterations(fusion: &Fusion, fl: &ForLoop) -> Option<(IdId, i64)> {
    let handle = fusion.iter_domain(fl.iter_domain).definition?;
    let IdExpr::Split { input, inner, factor, inner_split: true, .. } = *fusion.id_expr(handle) else {
        return None;
    };
    if inner != fl.iter_domain {
        return None;
    }
    let extent = fusion.eval_int(fusion.iter_domain(input).extent)?;
    let factor = fusion.eval_int(factor)?;
    if factor <= 0 {
        return None;
    }
    let chunks = (extent + factor - 1) / factor;
    Some((inner, extent - (chunks - 1) * factor))
}
