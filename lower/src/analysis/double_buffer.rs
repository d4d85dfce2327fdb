use std::collections::BTreeMap;

use tessel_ir::{ExprKind, Fusion, IdId, MemoryType, ParallelType, TvId};

use crate::IdGraphs;
use crate::error::{Error, Result};

/// Double-buffered tensors and the loop each one is prefetched across.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DoubleBufferInfo {
    /// Leaf position of the prefetch loop, per tensor.
    axes: BTreeMap<TvId, usize>,
    /// Loop group of that position.
    loops: BTreeMap<TvId, IdId>,
}

impl DoubleBufferInfo {
    /// Buffer stages of a double-buffered tensor.
    pub const STAGES: i64 = 2;

    /// The prefetch loop is the innermost serial axis outside the compute-at position. Only
    /// copies of global memory into shared memory or registers qualify.
    #[tracing::instrument(skip_all)]
    pub fn build(fusion: &Fusion, graphs: &IdGraphs) -> Result<Self> {
        let mut info = Self::default();
        for expr in fusion.exprs() {
            let tv = fusion.expr(expr).output;
            let view = fusion.tv(tv);
            if !view.double_buffered {
                continue;
            }
            let ExprKind::Set { input } = fusion.expr(expr).kind else {
                return Err(Error::validation(fusion.display_tv(tv), "only a plain copy can be double buffered"));
            };
            if fusion.tv(input).memory_type != MemoryType::Global {
                return Err(Error::validation(fusion.display_tv(tv), "double buffered loads must read global memory"));
            }
            if view.memory_type == MemoryType::Global {
                return Err(Error::validation(fusion.display_tv(tv), "a double buffer lives in shared memory or registers"));
            }
            let axis = (0..view.compute_at_pos).rev().find(|&position| {
                let domain = fusion.iter_domain(view.leaf[position]);
                domain.parallel_type == ParallelType::Serial && !domain.is_broadcast()
            });
            let Some(axis) = axis else {
                return Err(Error::validation(
                    fusion.display_tv(tv),
                    "no serial loop outside the compute-at position to prefetch across",
                ));
            };
            let group = graphs.loop_group(view.leaf[axis]);
            tracing::debug!(%tv, axis, "double buffered");
            info.axes.insert(tv, axis);
            info.loops.insert(tv, group);
        }
        Ok(info)
    }

    pub fn axis(&self, tv: TvId) -> Option<usize> {
        self.axes.get(&tv).copied()
    }

    pub fn loop_group(&self, tv: TvId) -> Option<IdId> {
        self.loops.get(&tv).copied()
    }

    /// Tensors prefetched across the loop of `group`.
    pub fn loads_in(&self, group: IdId) -> impl Iterator<Item = TvId> + '_ {
        self.loops.iter().filter(move |(_, g)| **g == group).map(|(tv, _)| *tv)
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }
}
