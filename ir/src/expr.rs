//! Tensor expressions of the fusion graph.

use derive_more::Display;
use smallvec::SmallVec;

use crate::ids::{TvId, ValId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operand {
    Tensor(TvId),
    Scalar(ValId),
}

impl From<TvId> for Operand {
    fn from(tv: TvId) -> Self {
        Self::Tensor(tv)
    }
}

impl From<ValId> for Operand {
    fn from(val: ValId) -> Self {
        Self::Scalar(val)
    }
}

impl Operand {
    pub const fn tensor(self) -> Option<TvId> {
        match self {
            Self::Tensor(tv) => Some(tv),
            Self::Scalar(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(rename_all = "lowercase")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnaryOpType {
    Neg,
    Abs,
    Exp,
    Log,
    Sqrt,
    Rsqrt,
    Reciprocal,
    Tanh,
    Relu,
    Cast,
}

impl UnaryOpType {
    /// Transcendental ops that cost enough registers/latency to narrow persistent batches.
    pub const fn is_expensive(self) -> bool {
        matches!(self, Self::Exp | Self::Log | Self::Rsqrt | Self::Reciprocal | Self::Tanh)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(rename_all = "lowercase")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryOpType {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(rename_all = "lowercase")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ReductionOpType {
    Sum,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(rename_all = "lowercase")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RngOpType {
    Uniform,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExprKind {
    Unary { op: UnaryOpType, input: Operand },
    Binary { op: BinaryOpType, lhs: Operand, rhs: Operand },
    Reduction { op: ReductionOpType, input: TvId, init: ValId },
    /// `flags[i]` marks output axes that are new broadcast dimensions.
    Broadcast { input: TvId, flags: Vec<bool> },
    Set { input: TvId },
    /// `offset` is the philox offset assigned during lowering.
    Rng { op: RngOpType, offset: Option<u32> },
    /// Gather along `dim` of `lookup` at the positions held in `index`.
    IndexSelect { lookup: TvId, index: TvId, dim: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Expr {
    pub kind: ExprKind,
    pub output: TvId,
}

impl Expr {
    pub fn input_tvs(&self) -> SmallVec<[TvId; 2]> {
        let mut inputs = SmallVec::new();
        match &self.kind {
            ExprKind::Unary { input, .. } => inputs.extend(input.tensor()),
            ExprKind::Binary { lhs, rhs, .. } => inputs.extend(lhs.tensor().into_iter().chain(rhs.tensor())),
            ExprKind::Reduction { input, .. } | ExprKind::Broadcast { input, .. } | ExprKind::Set { input } => {
                inputs.push(*input)
            }
            ExprKind::Rng { .. } => {}
            ExprKind::IndexSelect { lookup, index, .. } => {
                inputs.push(*lookup);
                inputs.push(*index);
            }
        }
        inputs
    }

    pub fn is_reduction(&self) -> bool {
        matches!(self.kind, ExprKind::Reduction { .. })
    }

    pub const fn name(&self) -> &'static str {
        match self.kind {
            ExprKind::Unary { .. } => "unary",
            ExprKind::Binary { .. } => "binary",
            ExprKind::Reduction { .. } => "reduction",
            ExprKind::Broadcast { .. } => "broadcast",
            ExprKind::Set { .. } => "set",
            ExprKind::Rng { .. } => "rng",
            ExprKind::IndexSelect { .. } => "index_select",
        }
    }
}
