//! Iteration domains and the split/merge/resize expressions between them.

use smallvec::{SmallVec, smallvec};
use snafu::ensure;

use crate::Fusion;
use crate::error::{IncompatibleMergeSnafu, InvalidSplitFactorSnafu, Result};
use crate::ids::{IdExprId, IdId, ValId};
use crate::types::{IterType, ParallelType};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IterDomain {
    pub start: ValId,
    pub extent: ValId,
    pub parallel_type: ParallelType,
    pub iter_type: IterType,
    pub definition: Option<IdExprId>,
    pub uses: Vec<IdExprId>,
    /// Set when the launch dimension is rounded up to a warp multiple; `Some(size)` pins the
    /// padded size.
    pub warp_padding: Option<Option<i64>>,
}

impl IterDomain {
    pub fn is_reduction(&self) -> bool {
        self.iter_type == IterType::Reduction
    }

    pub fn is_broadcast(&self) -> bool {
        self.iter_type == IterType::Broadcast
    }

    pub fn is_thread(&self) -> bool {
        self.parallel_type.is_thread()
    }

    pub fn has_warp_padding(&self) -> bool {
        self.warp_padding.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IdExpr {
    /// `inner_split`: the factor sizes the inner output, otherwise the outer one.
    Split { input: IdId, outer: IdId, inner: IdId, factor: ValId, inner_split: bool },
    Merge { outer: IdId, inner: IdId, out: IdId },
    /// Widens (or narrows, for negative amounts) the input by `left` and `right` elements.
    Resize { input: IdId, out: IdId, left: ValId, right: ValId },
}

impl IdExpr {
    pub fn inputs(&self) -> SmallVec<[IdId; 2]> {
        match *self {
            Self::Split { input, .. } | Self::Resize { input, .. } => smallvec![input],
            Self::Merge { outer, inner, .. } => smallvec![outer, inner],
        }
    }

    pub fn outputs(&self) -> SmallVec<[IdId; 2]> {
        match *self {
            Self::Split { outer, inner, .. } => smallvec![outer, inner],
            Self::Merge { out, .. } | Self::Resize { out, .. } => smallvec![out],
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Split { .. } => "split",
            Self::Merge { .. } => "merge",
            Self::Resize { .. } => "resize",
        }
    }
}

impl Fusion {
    pub fn new_iter_domain(&mut self, extent: ValId, iter_type: IterType) -> IdId {
        let start = self.int(0);
        self.push_iter_domain(IterDomain {
            start,
            extent,
            parallel_type: ParallelType::Serial,
            iter_type,
            definition: None,
            uses: Vec::new(),
            warp_padding: None,
        })
    }

    /// Fresh root domain with the same extent, used for op outputs.
    pub(crate) fn clone_iter_domain(&mut self, id: IdId, iter_type: IterType) -> IdId {
        let extent = self.iter_domain(id).extent;
        self.new_iter_domain(extent, iter_type)
    }

    fn push_iter_domain(&mut self, id: IterDomain) -> IdId {
        let handle = IdId::from_index(self.ids.len());
        self.ids.push(id);
        handle
    }

    fn push_id_expr(&mut self, expr: IdExpr) -> IdExprId {
        let handle = IdExprId::from_index(self.id_exprs.len());
        for input in expr.inputs() {
            self.ids[input.index()].uses.push(handle);
        }
        for output in expr.outputs() {
            self.ids[output.index()].definition = Some(handle);
        }
        self.id_exprs.push(expr);
        handle
    }

    pub fn split_iter_domain(&mut self, input: IdId, factor: ValId, inner_split: bool) -> Result<(IdId, IdId)> {
        if let Some(f) = self.eval_int(factor) {
            ensure!(f > 0, InvalidSplitFactorSnafu { factor: f });
        }
        let (extent, iter_type) = {
            let id = self.iter_domain(input);
            (id.extent, id.iter_type)
        };
        let remainder = self.ceil_div(extent, factor);
        let (outer_extent, inner_extent) = if inner_split { (remainder, factor) } else { (factor, remainder) };
        let outer = self.new_iter_domain(outer_extent, iter_type);
        let inner = self.new_iter_domain(inner_extent, iter_type);
        self.push_id_expr(IdExpr::Split { input, outer, inner, factor, inner_split });
        Ok((outer, inner))
    }

    pub fn merge_iter_domains(&mut self, outer: IdId, inner: IdId) -> Result<IdId> {
        let (o, i) = (self.iter_domain(outer).iter_type, self.iter_domain(inner).iter_type);
        let iter_type = match (o, i) {
            (IterType::Broadcast, other) | (other, IterType::Broadcast) => other,
            (a, b) if a == b => a,
            _ => return IncompatibleMergeSnafu { outer: o, inner: i }.fail(),
        };
        let (outer_extent, inner_extent) = (self.iter_domain(outer).extent, self.iter_domain(inner).extent);
        let extent = self.mul(outer_extent, inner_extent);
        let out = self.new_iter_domain(extent, iter_type);
        self.push_id_expr(IdExpr::Merge { outer, inner, out });
        Ok(out)
    }

    pub fn resize_iter_domain(&mut self, input: IdId, left: ValId, right: ValId) -> IdId {
        let extent = self.iter_domain(input).extent;
        let widened = self.add(extent, left);
        let extent = self.add(widened, right);
        let out = self.new_iter_domain(extent, IterType::Iteration);
        self.push_id_expr(IdExpr::Resize { input, out, left, right });
        out
    }

    /// Whether `id` is the inner output of a split or a root domain, i.e. the innermost
    /// position of whatever it came from.
    pub fn is_inner_split_output(&self, id: IdId) -> bool {
        match self.iter_domain(id).definition.map(|d| self.id_expr(d)) {
            Some(IdExpr::Split { inner, .. }) => *inner == id,
            _ => false,
        }
    }
}
