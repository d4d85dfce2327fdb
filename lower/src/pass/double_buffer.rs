//! Double buffering.
//!
//! ```text
//! FOR i in 0..n:              ALLOCATE T1 (2 stages)
//!   T1 = set(T0)              IF 0 < n: T1 = set(T0) [i = 0]
//!   T2 = f(T1)        =>      FOR i in 0..n:
//!                               IF i + 1 < n: T1 = set(T0) [i = i + 1]
//!                               T2 = f(T1)
//!                               BLOCKSYNC
//! ```
//!
//! Iteration `i` reads stage `i % 2` while the load for `i + 1` fills the other one. A shared
//! buffer needs a barrier at the end of each iteration before its stage is refilled.

use std::collections::BTreeSet;

use tessel_ir::kernel::{ForLoop, IfThenElse, KirExpr, PredicateKind};
use tessel_ir::{Fusion, MemoryType, TvId, ValId};

use crate::IdGraphs;
use crate::analysis::DoubleBufferInfo;

#[tracing::instrument(skip_all)]
pub fn double_buffer_loops(
    fusion: &mut Fusion,
    graphs: &IdGraphs,
    info: &DoubleBufferInfo,
    exprs: Vec<KirExpr>,
) -> Vec<KirExpr> {
    if info.is_empty() {
        return exprs;
    }
    let mut out = Vec::with_capacity(exprs.len());
    for mut node in exprs {
        for body in node.scopes_mut() {
            *body = double_buffer_loops(fusion, graphs, info, std::mem::take(body));
        }
        let KirExpr::ForLoop(fl) = node else {
            out.push(node);
            continue;
        };
        let loads: BTreeSet<TvId> = info.loads_in(graphs.loop_group(fl.iter_domain)).collect();
        if loads.is_empty() {
            out.push(KirExpr::ForLoop(fl));
            continue;
        }
        out.extend(prefetch(fusion, fl, &loads));
    }
    out
}

fn prefetch(fusion: &mut Fusion, mut fl: ForLoop, loads: &BTreeSet<TvId>) -> Vec<KirExpr> {
    let mut prologue = loads_only(fusion, &fl.body, loads);
    for node in &mut prologue {
        node.bind_index(fl.index, fl.start);
    }
    let first = fusion.lt(fl.start, fl.stop);

    let one = fusion.int(1);
    let next = fusion.add(fl.index, one);
    let has_next = fusion.lt(next, fl.stop);
    fl.body = shift_loads(fusion, std::mem::take(&mut fl.body), loads, fl.index, next, has_next);

    let shared = loads.iter().any(|tv| fusion.tv(*tv).memory_type == MemoryType::Shared);
    if shared && !fl.body.last().is_some_and(KirExpr::is_sync) {
        fl.body.push(KirExpr::BlockSync { war_hazard: true });
    }
    tracing::debug!(index = %fusion.display_val(fl.index), loads = loads.len(), "double buffer loop");

    vec![
        KirExpr::IfThenElse(IfThenElse {
            kind: PredicateKind::DoubleBuffer,
            condition: first,
            then_body: prologue,
            else_body: Vec::new(),
        }),
        KirExpr::ForLoop(fl),
    ]
}

/// Copy of `scope` keeping only the double-buffered loads and the loops around them.
fn loads_only(fusion: &Fusion, scope: &[KirExpr], loads: &BTreeSet<TvId>) -> Vec<KirExpr> {
    let mut out = Vec::new();
    for node in scope {
        match node {
            KirExpr::Op(op) if loads.contains(&fusion.expr(op.expr).output) => out.push(node.clone()),
            KirExpr::ForLoop(fl) => {
                let body = loads_only(fusion, &fl.body, loads);
                if !body.is_empty() {
                    out.push(KirExpr::ForLoop(ForLoop { body, ..fl.clone() }));
                }
            }
            _ => {}
        }
    }
    out
}

/// Move every load in `scope` one iteration ahead, guarded by the next iteration existing.
fn shift_loads(
    fusion: &Fusion,
    scope: Vec<KirExpr>,
    loads: &BTreeSet<TvId>,
    index: ValId,
    next: ValId,
    has_next: ValId,
) -> Vec<KirExpr> {
    scope
        .into_iter()
        .map(|mut node| match node {
            KirExpr::Op(mut op) if loads.contains(&fusion.expr(op.expr).output) => {
                op.bindings.push((index, next));
                KirExpr::IfThenElse(IfThenElse {
                    kind: PredicateKind::DoubleBuffer,
                    condition: has_next,
                    then_body: vec![KirExpr::Op(op)],
                    else_body: Vec::new(),
                })
            }
            _ => {
                for body in node.scopes_mut() {
                    *body = shift_loads(fusion, std::mem::take(body), loads, index, next, has_next);
                }
                node
            }
        })
        .collect()
}
