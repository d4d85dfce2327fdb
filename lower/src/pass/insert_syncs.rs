//! Barrier insertion.
//!
//! Read-after-write: a write that other threads (or blocks) read later leaves the tensor
//! pending; the first top-level statement of a scope that reads a pending tensor gets a
//! barrier in front of it. Write-after-read: a serial loop whose body reads shared memory
//! and overwrites it on the next iteration needs a barrier at the end of the body.

use std::collections::{BTreeMap, BTreeSet};

use tessel_ir::kernel::{KirExpr, collect_ops};
use tessel_ir::{Fusion, MemoryType, ParallelType, ParallelTypeSet, TvId};

use crate::analysis::SyncMap;

#[tracing::instrument(skip_all)]
pub fn insert_raw_syncs(fusion: &Fusion, sync_map: &SyncMap, mut exprs: Vec<KirExpr>) -> Vec<KirExpr> {
    let mut pending = BTreeMap::new();
    raw_scope(fusion, sync_map, &mut exprs, &mut pending);
    exprs
}

fn raw_scope(
    fusion: &Fusion,
    sync_map: &SyncMap,
    scope: &mut Vec<KirExpr>,
    pending: &mut BTreeMap<TvId, ParallelTypeSet>,
) {
    for mut child in std::mem::take(scope) {
        match &child {
            KirExpr::BlockSync { .. } => satisfy(pending, ParallelType::threads()),
            KirExpr::GridSync { .. } => pending.clear(),
            _ => {}
        }

        let reads = reads_of(fusion, &child);
        let needed = reads
            .iter()
            .filter_map(|tv| pending.get(tv))
            .fold(ParallelTypeSet::empty(), |acc, types| acc | *types);
        if !needed.is_empty() {
            let blocks = needed & ParallelType::blocks();
            if blocks.is_empty() {
                tracing::debug!(types = ?needed, "block sync");
                scope.push(KirExpr::BlockSync { war_hazard: false });
                satisfy(pending, ParallelType::threads());
            } else {
                tracing::debug!(types = ?blocks, "grid sync");
                scope.push(KirExpr::GridSync { sync_dims: blocks });
                pending.clear();
            }
        }

        for body in child.scopes_mut() {
            raw_scope(fusion, sync_map, body, pending);
        }

        if let KirExpr::Op(op) = &child {
            let tv = fusion.expr(op.expr).output;
            let types = sync_map.needs_raw_sync(tv);
            if !types.is_empty() {
                *pending.entry(tv).or_default() |= types;
            }
        }
        scope.push(child);
    }
}

fn satisfy(pending: &mut BTreeMap<TvId, ParallelTypeSet>, types: ParallelTypeSet) {
    pending.retain(|_, needed| {
        *needed -= types;
        !needed.is_empty()
    });
}

fn reads_of(fusion: &Fusion, node: &KirExpr) -> BTreeSet<TvId> {
    collect_ops(std::slice::from_ref(node))
        .into_iter()
        .flat_map(|op| fusion.expr(op.expr).input_tvs())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Read(TvId),
    Write(TvId),
    Sync,
}

#[tracing::instrument(skip_all)]
pub fn insert_war_syncs(fusion: &Fusion, exprs: Vec<KirExpr>) -> Vec<KirExpr> {
    exprs.into_iter().map(|expr| war_node(fusion, expr)).collect()
}

fn war_node(fusion: &Fusion, mut expr: KirExpr) -> KirExpr {
    for body in expr.scopes_mut() {
        let children = std::mem::take(body);
        *body = children.into_iter().map(|child| war_node(fusion, child)).collect();
    }
    if let KirExpr::ForLoop(fl) = &mut expr
        && !fl.parallel_type.is_thread_or_block()
        && fusion.eval_int(fl.stop) != Some(1)
        && has_war_hazard(fusion, &fl.body)
    {
        tracing::debug!(index = %fusion.display_val(fl.index), "war sync");
        fl.body.push(KirExpr::BlockSync { war_hazard: true });
    }
    expr
}

/// Whether the next iteration may overwrite shared memory some thread is still reading.
fn has_war_hazard(fusion: &Fusion, body: &[KirExpr]) -> bool {
    let mut events = Vec::new();
    flatten(fusion, body, &mut events);

    let written: BTreeSet<TvId> = events
        .iter()
        .filter_map(|event| match event {
            Event::Write(tv) if fusion.tv(*tv).memory_type == MemoryType::Shared => Some(*tv),
            _ => None,
        })
        .collect();
    written.into_iter().any(|tv| {
        let Some(last_read) = events.iter().rposition(|e| *e == Event::Read(tv)) else {
            return false;
        };
        let Some(first_write) = events.iter().position(|e| *e == Event::Write(tv)) else {
            return false;
        };
        let synced_after_read = events[last_read..].contains(&Event::Sync);
        let synced_before_write = events[..first_write].contains(&Event::Sync);
        !synced_after_read && !synced_before_write
    })
}

fn flatten(fusion: &Fusion, scope: &[KirExpr], events: &mut Vec<Event>) {
    for node in scope {
        match node {
            KirExpr::Op(op) => {
                let expr = fusion.expr(op.expr);
                events.extend(expr.input_tvs().into_iter().map(Event::Read));
                events.push(Event::Write(expr.output));
            }
            KirExpr::Init(init) => events.push(Event::Write(init.buffer)),
            KirExpr::BlockSync { .. } | KirExpr::GridSync { .. } => events.push(Event::Sync),
            other => {
                for body in other.scopes() {
                    flatten(fusion, body, events);
                }
            }
        }
    }
}
