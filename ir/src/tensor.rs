//! Tensor views and the scheduling primitives that annotate them.
//!
//! A scheduler shapes each tensor's leaf domain with splits, merges and reorders, maps leaf
//! axes to hardware with [`Fusion::parallelize`], and fixes how deep a producer is inlined into
//! its consumers with [`Fusion::inline_at`] (or computed in one consumer's loops with
//! [`Fusion::compute_with`]). Every transform is recorded so that
//! [`Fusion::transform_like`] can replay one tensor's schedule on another.

use std::fmt;

use snafu::ensure;
use tessel_dtype::DataType;

use crate::Fusion;
use crate::error::{
    AxisOutOfBoundsSnafu, InvalidComputeAtSnafu, InvalidDoubleBufferSnafu, InvalidReorderSnafu, ReplayRankMismatchSnafu,
    Result,
};
use crate::ids::{ExprId, IdId, TvId, ValId};
use crate::types::{MemoryType, ParallelType};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScheduleOp {
    Split { axis: usize, factor: ValId, inner_split: bool },
    Merge { axis: usize },
    Reorder { old_to_new: Vec<(usize, usize)> },
    Parallelize { axis: usize, parallel_type: ParallelType },
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TensorView {
    pub dtype: DataType,
    pub root: Vec<IdId>,
    pub leaf: Vec<IdId>,
    pub memory_type: MemoryType,
    /// Number of leading leaf axes shared with the consumers' loop nests.
    pub compute_at_pos: usize,
    /// Leading leaf axes computed in the loop nest of one consumer, picked when lowering.
    /// The buffer itself stays at the compute-at position.
    pub compute_with_pos: usize,
    pub compute_with_consumer: Option<TvId>,
    /// Loaded one iteration ahead into a second buffer stage.
    pub double_buffered: bool,
    pub definition: Option<ExprId>,
    pub uses: Vec<ExprId>,
    pub history: Vec<ScheduleOp>,
}

impl Fusion {
    pub fn new_tensor(&mut self, root: Vec<IdId>, dtype: DataType) -> TvId {
        let handle = TvId::from_index(self.tvs.len());
        self.tvs.push(TensorView {
            dtype,
            leaf: root.clone(),
            root,
            memory_type: MemoryType::Local,
            compute_at_pos: 0,
            compute_with_pos: 0,
            compute_with_consumer: None,
            double_buffered: false,
            definition: None,
            uses: Vec::new(),
            history: Vec::new(),
        });
        handle
    }

    /// Tensor whose extents are unknown until run time.
    pub fn make_symbolic_tensor(&mut self, ndims: usize, dtype: DataType) -> TvId {
        let root = (0..ndims)
            .map(|_| {
                let name = format!("i{}", self.vals.len());
                let extent = self.symbolic(name, DataType::Index);
                self.new_iter_domain(extent, crate::IterType::Iteration)
            })
            .collect();
        self.new_tensor(root, dtype)
    }

    pub fn make_concrete_tensor(&mut self, shape: &[i64], dtype: DataType) -> TvId {
        let root = shape
            .iter()
            .map(|&size| {
                let extent = self.int(size);
                let iter_type = if size == 1 { crate::IterType::Broadcast } else { crate::IterType::Iteration };
                self.new_iter_domain(extent, iter_type)
            })
            .collect();
        self.new_tensor(root, dtype)
    }

    fn check_axis(&self, tv: TvId, axis: usize) -> Result<()> {
        let ndims = self.tv(tv).leaf.len();
        ensure!(axis < ndims, AxisOutOfBoundsSnafu { tv, axis, ndims });
        Ok(())
    }

    /// Inner split: the new inner axis has extent `factor`.
    pub fn split(&mut self, tv: TvId, axis: usize, factor: i64) -> Result<()> {
        let factor = self.int(factor);
        self.split_by(tv, axis, factor, true)
    }

    /// Outer split: the new outer axis has extent `factor`.
    pub fn outer_split(&mut self, tv: TvId, axis: usize, factor: i64) -> Result<()> {
        let factor = self.int(factor);
        self.split_by(tv, axis, factor, false)
    }

    pub fn split_by(&mut self, tv: TvId, axis: usize, factor: ValId, inner_split: bool) -> Result<()> {
        self.check_axis(tv, axis)?;
        let input = self.tv(tv).leaf[axis];
        let (outer, inner) = self.split_iter_domain(input, factor, inner_split)?;
        let view = self.tv_mut(tv);
        view.leaf.splice(axis..=axis, [outer, inner]);
        view.history.push(ScheduleOp::Split { axis, factor, inner_split });
        Ok(())
    }

    /// Merge `axis` with `axis + 1`.
    pub fn merge(&mut self, tv: TvId, axis: usize) -> Result<()> {
        self.check_axis(tv, axis + 1)?;
        let (outer, inner) = (self.tv(tv).leaf[axis], self.tv(tv).leaf[axis + 1]);
        let out = self.merge_iter_domains(outer, inner)?;
        let view = self.tv_mut(tv);
        view.leaf.splice(axis..=axis + 1, [out]);
        view.history.push(ScheduleOp::Merge { axis });
        Ok(())
    }

    /// Move `old` axes to `new` positions; unmentioned axes keep their relative order.
    pub fn reorder(&mut self, tv: TvId, old_to_new: &[(usize, usize)]) -> Result<()> {
        let ndims = self.tv(tv).leaf.len();
        let mut placed: Vec<Option<IdId>> = vec![None; ndims];
        let mut moved = vec![false; ndims];
        for &(old, new) in old_to_new {
            ensure!(old < ndims && new < ndims, InvalidReorderSnafu { tv, reason: "axis out of bounds" });
            ensure!(placed[new].is_none() && !moved[old], InvalidReorderSnafu { tv, reason: "axis used twice" });
            placed[new] = Some(self.tv(tv).leaf[old]);
            moved[old] = true;
        }
        let mut rest = self.tv(tv).leaf.iter().enumerate().filter(|(i, _)| !moved[*i]).map(|(_, id)| *id);
        let mut leaf = Vec::with_capacity(ndims);
        for slot in placed {
            match slot.or_else(|| rest.next()) {
                Some(id) => leaf.push(id),
                None => return InvalidReorderSnafu { tv, reason: "not a permutation" }.fail(),
            }
        }
        let view = self.tv_mut(tv);
        view.leaf = leaf;
        view.history.push(ScheduleOp::Reorder { old_to_new: old_to_new.to_vec() });
        Ok(())
    }

    pub fn parallelize(&mut self, tv: TvId, axis: usize, parallel_type: ParallelType) -> Result<()> {
        self.check_axis(tv, axis)?;
        let id = self.tv(tv).leaf[axis];
        self.iter_domain_mut(id).parallel_type = parallel_type;
        self.tv_mut(tv).history.push(ScheduleOp::Parallelize { axis, parallel_type });
        Ok(())
    }

    /// Round the launch dimension of `axis` up to a warp multiple, optionally to a fixed size.
    pub fn pad_to_multiple_of_warp(&mut self, tv: TvId, axis: usize, size: Option<i64>) -> Result<()> {
        self.check_axis(tv, axis)?;
        let id = self.tv(tv).leaf[axis];
        self.iter_domain_mut(id).warp_padding = Some(size);
        Ok(())
    }

    /// Share the first `position` leaf axes of `tv` with its consumers' loops.
    pub fn inline_at(&mut self, tv: TvId, position: usize) -> Result<()> {
        let view = self.tv(tv);
        ensure!(
            position <= view.leaf.len(),
            InvalidComputeAtSnafu { tv, position, reason: "position exceeds the leaf domain" }
        );
        ensure!(
            position == 0 || view.definition.is_some(),
            InvalidComputeAtSnafu { tv, position, reason: "fusion inputs are not computed" }
        );
        ensure!(
            position == 0 || !view.uses.is_empty(),
            InvalidComputeAtSnafu { tv, position, reason: "tensor has no consumer" }
        );
        self.tv_mut(tv).compute_at_pos = position;
        Ok(())
    }

    /// Compute the first `position` leaf axes of `tv` inside the loops of one of its
    /// consumers, without moving its buffer inward. The consumer is resolved by the lowering.
    pub fn compute_with(&mut self, tv: TvId, position: usize) -> Result<()> {
        let view = self.tv(tv);
        ensure!(
            position <= view.leaf.len(),
            InvalidComputeAtSnafu { tv, position, reason: "position exceeds the leaf domain" }
        );
        ensure!(
            position == 0 || view.definition.is_some(),
            InvalidComputeAtSnafu { tv, position, reason: "fusion inputs are not computed" }
        );
        ensure!(
            position == 0 || !view.uses.is_empty(),
            InvalidComputeAtSnafu { tv, position, reason: "tensor has no consumer" }
        );
        ensure!(
            position == 0 || position > view.compute_at_pos,
            InvalidComputeAtSnafu { tv, position, reason: "already inlined at or beyond this position" }
        );
        let view = self.tv_mut(tv);
        view.compute_with_pos = position;
        view.compute_with_consumer = None;
        Ok(())
    }

    /// Prefetch `tv` one iteration of its innermost serial loop ahead. The loop, and whether
    /// the tensor qualifies, are settled when lowering.
    pub fn double_buffer(&mut self, tv: TvId) -> Result<()> {
        let view = self.tv(tv);
        ensure!(view.definition.is_some(), InvalidDoubleBufferSnafu { tv, reason: "fusion inputs are not computed" });
        ensure!(!self.is_output(tv), InvalidDoubleBufferSnafu { tv, reason: "fusion outputs are written once" });
        self.tv_mut(tv).double_buffered = true;
        Ok(())
    }

    pub fn set_memory_type(&mut self, tv: TvId, memory_type: MemoryType) {
        self.tv_mut(tv).memory_type = memory_type;
    }

    /// Replay the recorded schedule of `reference` on `tv`, axis for axis.
    pub fn transform_like(&mut self, tv: TvId, reference: TvId) -> Result<()> {
        let (expected, actual) = (self.tv(reference).root.len(), self.tv(tv).root.len());
        ensure!(expected == actual, ReplayRankMismatchSnafu { tv, reference, expected, actual });
        let history = self.tv(reference).history.clone();
        for op in history {
            match op {
                ScheduleOp::Split { axis, factor, inner_split } => self.split_by(tv, axis, factor, inner_split)?,
                ScheduleOp::Merge { axis } => self.merge(tv, axis)?,
                ScheduleOp::Reorder { old_to_new } => self.reorder(tv, &old_to_new)?,
                ScheduleOp::Parallelize { axis, parallel_type } => self.parallelize(tv, axis, parallel_type)?,
            }
        }
        Ok(())
    }

    /// Root axes without reductions: what a consumer sees of this tensor.
    pub fn logical_domain(&self, tv: TvId) -> Vec<IdId> {
        self.tv(tv).root.iter().copied().filter(|id| !self.iter_domain(*id).is_reduction()).collect()
    }

    pub fn has_reduction_axis(&self, tv: TvId) -> bool {
        self.tv(tv).root.iter().any(|id| self.iter_domain(*id).is_reduction())
    }

    /// Printable form: `T3_l[iS4{i0}, rTIDx7{128}]`.
    pub fn display_tv(&self, tv: TvId) -> TvDisplay<'_> {
        TvDisplay { fusion: self, tv }
    }

    pub fn display_id(&self, id: IdId) -> IdDisplay<'_> {
        IdDisplay { fusion: self, id }
    }
}

pub struct TvDisplay<'a> {
    fusion: &'a Fusion,
    tv: TvId,
}

impl fmt::Display for TvDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let view = self.fusion.tv(self.tv);
        write!(f, "{}_{}[", self.tv, view.memory_type)?;
        for (i, id) in view.leaf.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if i == view.compute_at_pos && i > 0 {
                f.write_str("ca| ")?;
            }
            write!(f, "{}", self.fusion.display_id(*id))?;
        }
        f.write_str("]")
    }
}

pub struct IdDisplay<'a> {
    fusion: &'a Fusion,
    id: IdId,
}

impl fmt::Display for IdDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.fusion.iter_domain(self.id);
        let parallel = match id.parallel_type {
            ParallelType::Serial => "S".to_string(),
            other => other.to_string(),
        };
        write!(f, "{}{}{}{{{}}}", id.iter_type, parallel, self.id.0, self.fusion.display_val(id.extent))
    }
}
