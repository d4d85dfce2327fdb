//! Loop rotation.
//!
//! ```text
//! FOR i in 0..n:          ALLOCATE ...
//!   A(i)                  IF 0 < n: A(0)
//!   B(i)          =>      FOR i in 0..n:
//!                           B(i)
//!                           IF i + 1 < n: A(i + 1)
//! ```
//!
//! The selected statements must form a prefix of the loop body, so moving them to the end of
//! the previous iteration keeps every dependency in order.

use std::collections::HashSet;

use tessel_ir::kernel::{ForLoop, IfThenElse, KirExpr, PredicateKind, collect_ops};
use tessel_ir::{Fusion, IdId, TvId};

use crate::IdGraphs;
use crate::config::LoopRotation;
use crate::error::{Error, Result};

#[tracing::instrument(skip_all)]
pub fn rotate_loops(
    fusion: &mut Fusion,
    graphs: &IdGraphs,
    rotations: &[LoopRotation],
    mut exprs: Vec<KirExpr>,
) -> Result<Vec<KirExpr>> {
    for rotation in rotations {
        let Some(&id) = fusion.tv(rotation.tv).leaf.get(rotation.axis) else {
            return Err(Error::validation(
                fusion.display_tv(rotation.tv),
                format!("cannot rotate axis {}, tensor has fewer axes", rotation.axis),
            ));
        };
        let group = graphs.loop_group(id);
        if !rotate_in(fusion, graphs, &mut exprs, group, rotation)? {
            return Err(Error::validation(fusion.display_tv(rotation.tv), "no loop to rotate at the requested axis"));
        }
    }
    Ok(exprs)
}

fn rotate_in(
    fusion: &mut Fusion,
    graphs: &IdGraphs,
    scope: &mut Vec<KirExpr>,
    group: IdId,
    rotation: &LoopRotation,
) -> Result<bool> {
    for position in 0..scope.len() {
        if let KirExpr::ForLoop(fl) = &scope[position]
            && graphs.loop_group(fl.iter_domain) == group
        {
            let rotated = rotate(fusion, fl.clone(), rotation)?;
            scope.splice(position..=position, rotated);
            return Ok(true);
        }
        for body in scope[position].scopes_mut() {
            if rotate_in(fusion, graphs, body, group, rotation)? {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn is_selected(node: &KirExpr, selection: &HashSet<TvId>, fusion: &Fusion) -> bool {
    match node {
        KirExpr::Op(_) | KirExpr::ForLoop(_) | KirExpr::IfThenElse(_) => {
            let ops = collect_ops(std::slice::from_ref(node));
            !ops.is_empty() && ops.iter().all(|op| selection.contains(&fusion.expr(op.expr).output))
        }
        KirExpr::Allocate(alloc) => selection.contains(&alloc.buffer),
        KirExpr::Init(init) => selection.contains(&init.buffer),
        KirExpr::BlockSync { .. } | KirExpr::GridSync { .. } => false,
    }
}

fn rotate(fusion: &mut Fusion, mut fl: ForLoop, rotation: &LoopRotation) -> Result<Vec<KirExpr>> {
    let prefix = fl.body.iter().take_while(|node| is_selected(node, &rotation.selection, fusion)).count();
    if fl.body[prefix..].iter().any(|node| is_selected(node, &rotation.selection, fusion)) {
        return Err(Error::validation(
            fusion.display_tv(rotation.tv),
            "rotated statements must form a prefix of the loop body",
        ));
    }
    if prefix == 0 {
        return Ok(vec![KirExpr::ForLoop(fl)]);
    }

    let rest = fl.body.split_off(prefix);
    let (allocations, peeled): (Vec<_>, Vec<_>) =
        std::mem::take(&mut fl.body).into_iter().partition(|node| matches!(node, KirExpr::Allocate(_)));

    let mut prologue = peeled.clone();
    for node in &mut prologue {
        node.bind_index(fl.index, fl.start);
    }
    let first = fusion.lt(fl.start, fl.stop);

    let one = fusion.int(1);
    let next = fusion.add(fl.index, one);
    let mut epilogue = peeled;
    for node in &mut epilogue {
        node.bind_index(fl.index, next);
    }
    let has_next = fusion.lt(next, fl.stop);

    tracing::debug!(index = %fusion.display_val(fl.index), peeled = prologue.len(), "rotate loop");
    fl.body = rest;
    fl.body.push(KirExpr::IfThenElse(IfThenElse {
        kind: PredicateKind::Rotation,
        condition: has_next,
        then_body: epilogue,
        else_body: Vec::new(),
    }));

    let mut out = allocations;
    out.push(KirExpr::IfThenElse(IfThenElse {
        kind: PredicateKind::Rotation,
        condition: first,
        then_body: prologue,
        else_body: Vec::new(),
    }));
    out.push(KirExpr::ForLoop(fl));
    Ok(out)
}
