//! Passes over the kernel IR, in pipeline order.

pub mod alias_memory;
pub mod allocation;
pub mod cleanup;
pub mod double_buffer;
pub mod expr_sort;
pub mod insert_syncs;
pub mod loop_rotation;
pub mod loops;
pub mod predicate;
pub mod unroll;
pub mod vectorize;

pub use alias_memory::reuse_memory_allocations;
pub use allocation::insert_allocations;
pub use cleanup::cleanup;
pub use double_buffer::double_buffer_loops;
pub use expr_sort::reorder_exprs_for_compute_at;
pub use insert_syncs::{insert_raw_syncs, insert_war_syncs};
pub use loop_rotation::rotate_loops;
pub use loops::{LoopIndexMap, generate_loop_nests};
pub use predicate::{PredicateBuilder, insert_predicates};
pub use unroll::unroll_pass;
pub use vectorize::vectorize_pass;

use tessel_ir::ExprId;
use tessel_ir::kernel::KirExpr;

/// Child positions leading from `scope` to the computation of `expr`, through loop bodies.
pub(crate) fn find_op_path(scope: &[KirExpr], expr: ExprId) -> Option<Vec<usize>> {
    for (position, node) in scope.iter().enumerate() {
        match node {
            KirExpr::Op(op) if op.expr == expr => return Some(vec![position]),
            KirExpr::ForLoop(fl) => {
                if let Some(mut rest) = find_op_path(&fl.body, expr) {
                    rest.insert(0, position);
                    return Some(rest);
                }
            }
            _ => {}
        }
    }
    None
}

/// The loop body reached by following `path` from `scope`.
pub(crate) fn scope_at<'a>(scope: &'a mut Vec<KirExpr>, path: &[usize]) -> Option<&'a mut Vec<KirExpr>> {
    match path.split_first() {
        None => Some(scope),
        Some((&first, rest)) => match scope.get_mut(first)? {
            KirExpr::ForLoop(fl) => scope_at(&mut fl.body, rest),
            _ => None,
        },
    }
}

/// Apply `f` to every computation in the subtree.
pub(crate) fn for_each_op_mut(scope: &mut [KirExpr], f: &mut impl FnMut(&mut tessel_ir::kernel::KirOp)) {
    for node in scope {
        match node {
            KirExpr::Op(op) => f(op),
            other => {
                for child in other.scopes_mut() {
                    for_each_op_mut(child, f);
                }
            }
        }
    }
}
