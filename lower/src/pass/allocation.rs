//! Buffer allocation and reduction initialization.
//!
//! A buffer is allocated in the innermost loop that still encloses every use: its compute-at
//! position, pulled outward for shared memory so all threads of a block see one buffer. The
//! allocated shape covers the leaf axes below that loop, minus axes the memory space already
//! distributes (threads and blocks for registers, blocks for shared memory). A double buffer
//! is allocated outside its prefetch loop with one stage per buffer instead of that loop's axis.

use tessel_ir::kernel::{Allocate, InitOp, KirExpr};
use tessel_ir::{ExprId, ExprKind, Fusion, MemoryType, TvId, ValId};

use super::{find_op_path, scope_at};
use crate::IdGraphs;
use crate::analysis::DoubleBufferInfo;

#[tracing::instrument(skip_all)]
pub fn insert_allocations(
    fusion: &mut Fusion,
    graphs: &IdGraphs,
    double_buffers: &DoubleBufferInfo,
    mut exprs: Vec<KirExpr>,
) -> Vec<KirExpr> {
    let ops: Vec<ExprId> = tessel_ir::kernel::collect_ops(&exprs).iter().map(|op| op.expr).collect();
    for expr in ops {
        let tv = fusion.expr(expr).output;
        let view = fusion.tv(tv);
        let memory_type = view.memory_type;
        let is_output = fusion.is_output(tv);

        let depth = if memory_type == MemoryType::Global { 0 } else { allocation_depth(fusion, tv) };
        // Both stages outlive one iteration of the prefetch loop.
        let stage_axis = double_buffers.axis(tv);
        let depth = stage_axis.map_or(depth, |axis| depth.min(axis));
        if !is_output {
            let (shape, size) = allocation_shape(fusion, graphs, tv, depth, stage_axis);
            let allocate = Allocate {
                buffer: tv,
                memory_type,
                dtype: fusion.tv(tv).dtype,
                shape,
                size,
                zero_init: memory_type == MemoryType::Global && is_grid_reduction(fusion, expr),
                alias: None,
            };
            tracing::debug!(tv = %fusion.display_tv(tv), depth, "allocate");
            insert_before(&mut exprs, expr, depth, KirExpr::Allocate(allocate));
        }

        if let ExprKind::Reduction { init, .. } = fusion.expr(expr).kind {
            let first_reduction = fusion.tv(tv).leaf.iter().position(|id| fusion.iter_domain(*id).is_reduction());
            let init_depth = depth.max(first_reduction.unwrap_or(depth));
            insert_before(&mut exprs, expr, init_depth, KirExpr::Init(InitOp {
                buffer: tv,
                value: init,
                bindings: Default::default(),
            }));
        }
    }
    exprs
}

/// Loop depth the buffer of `tv` lives at.
fn allocation_depth(fusion: &Fusion, tv: TvId) -> usize {
    let view = fusion.tv(tv);
    let depth = view.compute_at_pos;
    if view.memory_type != MemoryType::Shared {
        return depth;
    }
    view.leaf[..depth]
        .iter()
        .position(|id| fusion.iter_domain(*id).parallel_type.is_thread())
        .unwrap_or(depth)
}

fn allocation_shape(
    fusion: &mut Fusion,
    graphs: &IdGraphs,
    tv: TvId,
    depth: usize,
    stage_axis: Option<usize>,
) -> (Vec<ValId>, ValId) {
    let view = fusion.tv(tv);
    let compute_at = view.compute_at_pos;
    let memory_type = view.memory_type;
    let leaf = view.leaf.clone();

    let mut shape = Vec::new();
    for (position, &id) in leaf.iter().enumerate().skip(depth) {
        let domain = fusion.iter_domain(id);
        let distributed = match memory_type {
            MemoryType::Local => domain.parallel_type.is_thread_or_block(),
            MemoryType::Shared => domain.parallel_type.is_block(),
            MemoryType::Global => false,
        };
        if domain.is_reduction() || domain.is_broadcast() || distributed || stage_axis == Some(position) {
            continue;
        }
        let source = if position < compute_at { graphs.promoted(id) } else { id };
        shape.push(fusion.iter_domain(source).extent);
    }
    if stage_axis.is_some() {
        shape.insert(0, fusion.int(DoubleBufferInfo::STAGES));
    }
    let one = fusion.int(1);
    let size = shape.iter().fold(one, |acc, extent| fusion.mul(acc, *extent));
    (shape, size)
}

fn is_grid_reduction(fusion: &Fusion, expr: ExprId) -> bool {
    let tv = fusion.expr(expr).output;
    matches!(fusion.expr(expr).kind, ExprKind::Reduction { .. })
        && fusion.tv(tv).leaf.iter().any(|id| {
            let domain = fusion.iter_domain(*id);
            domain.is_reduction() && domain.parallel_type.is_block()
        })
}

/// Insert `node` in front of the loop at `depth` that encloses the computation of `expr`.
fn insert_before(exprs: &mut Vec<KirExpr>, expr: ExprId, depth: usize, node: KirExpr) {
    let Some(path) = find_op_path(exprs, expr) else { return };
    let depth = depth.min(path.len() - 1);
    if let Some(scope) = scope_at(exprs, &path[..depth]) {
        scope.insert(path[depth], node);
    }
}
