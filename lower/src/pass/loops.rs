//! Loop-nest generation from the sorted expression list.

use std::collections::HashMap;

use tessel_dtype::DataType;
use tessel_ir::kernel::{ForLoop, KirExpr, KirOp};
use tessel_ir::{ExprId, Fusion, IdId, ValId};

use crate::IdGraphs;

/// Index variable of every materialized loop group.
#[derive(Debug, Clone, Default)]
pub struct LoopIndexMap {
    indices: HashMap<IdId, ValId>,
}

impl LoopIndexMap {
    /// Index of the loop `id` belongs to.
    pub fn index_of(&self, graphs: &IdGraphs, id: IdId) -> Option<ValId> {
        self.indices.get(&graphs.loop_group(id)).copied()
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

struct OpenLoop {
    group: IdId,
    for_loop: ForLoop,
}

/// Wrap every sorted expression in loops over its leaf axes, sharing the loops of its
/// loop-mapped neighbours.
#[tracing::instrument(skip_all)]
pub fn generate_loop_nests(fusion: &mut Fusion, graphs: &IdGraphs, exprs: &[ExprId]) -> (Vec<KirExpr>, LoopIndexMap) {
    let mut top = Vec::new();
    let mut stack: Vec<OpenLoop> = Vec::new();
    let mut indices = LoopIndexMap::default();

    for &expr in exprs {
        let leaf = fusion.tv(fusion.expr(expr).output).leaf.clone();
        let groups: Vec<IdId> = leaf.iter().map(|id| graphs.loop_group(*id)).collect();
        let shared = stack.iter().zip(&groups).take_while(|(open, group)| open.group == **group).count();
        while stack.len() > shared {
            close_loop(&mut stack, &mut top);
        }
        for (&id, &group) in leaf.iter().zip(&groups).skip(shared) {
            let for_loop = open_loop(fusion, graphs, &mut indices, id, group);
            stack.push(OpenLoop { group, for_loop });
        }
        let node = KirExpr::Op(KirOp::new(expr));
        match stack.last_mut() {
            Some(open) => open.for_loop.body.push(node),
            None => top.push(node),
        }
    }
    while !stack.is_empty() {
        close_loop(&mut stack, &mut top);
    }

    tracing::debug!(loops = indices.len(), "loop nests generated");
    (top, indices)
}

fn open_loop(fusion: &mut Fusion, graphs: &IdGraphs, indices: &mut LoopIndexMap, id: IdId, group: IdId) -> ForLoop {
    let promoted = graphs.promoted(id);
    let domain = fusion.iter_domain(promoted).clone();
    let index = match indices.indices.get(&group) {
        Some(index) => *index,
        None => {
            let index = match domain.parallel_type.index_name() {
                Some(name) => fusion.named_scalar(name, DataType::Index),
                None => fusion.named_scalar(format!("i{}", indices.indices.len()), DataType::Index),
            };
            indices.indices.insert(group, index);
            index
        }
    };
    let step = fusion.int(1);
    ForLoop {
        index,
        iter_domain: promoted,
        start: domain.start,
        stop: domain.extent,
        step,
        parallel_type: domain.parallel_type,
        vectorize: false,
        body: Vec::new(),
    }
}

fn close_loop(stack: &mut Vec<OpenLoop>, top: &mut Vec<KirExpr>) {
    let Some(open) = stack.pop() else { return };
    let node = KirExpr::ForLoop(open.for_loop);
    match stack.last_mut() {
        Some(parent) => parent.for_loop.body.push(node),
        None => top.push(node),
    }
}
