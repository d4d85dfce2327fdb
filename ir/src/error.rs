use snafu::Snafu;

use crate::ids::{TvId, ValId};
use crate::types::IterType;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Axis index past the end of a tensor's leaf domain.
    #[snafu(display("axis {axis} out of bounds for {tv} with {ndims} leaf dimensions"))]
    AxisOutOfBounds { tv: TvId, axis: usize, ndims: usize },

    /// Operands of an elementwise op disagree on rank.
    #[snafu(display("rank mismatch: {lhs} vs {rhs}"))]
    RankMismatch { lhs: usize, rhs: usize },

    /// A tensor op needs at least one tensor operand.
    #[snafu(display("{op} needs at least one tensor operand"))]
    NoTensorOperand { op: &'static str },

    /// Broadcast flags do not cover the input rank.
    #[snafu(display("broadcast flags {flags:?} do not match input rank {rank}"))]
    InvalidBroadcastFlags { flags: Vec<bool>, rank: usize },

    /// Merging an iteration axis with a reduction axis.
    #[snafu(display("cannot merge {outer:?} axis with {inner:?} axis"))]
    IncompatibleMerge { outer: IterType, inner: IterType },

    /// Split factor must be a positive constant or a symbolic value.
    #[snafu(display("invalid split factor {factor}"))]
    InvalidSplitFactor { factor: i64 },

    /// Compute-at position beyond the leaf domain, or on a tensor that is never computed.
    #[snafu(display("invalid compute-at position {position} for {tv}: {reason}"))]
    InvalidComputeAt { tv: TvId, position: usize, reason: &'static str },

    /// Double buffering requested on a tensor that is not an intermediate.
    #[snafu(display("cannot double buffer {tv}: {reason}"))]
    InvalidDoubleBuffer { tv: TvId, reason: &'static str },

    /// Reorder map is not a permutation.
    #[snafu(display("invalid reorder for {tv}: {reason}"))]
    InvalidReorder { tv: TvId, reason: &'static str },

    /// Schedule replay between tensors of different rank.
    #[snafu(display("cannot replay schedule of {reference} (rank {expected}) on {tv} (rank {actual})"))]
    ReplayRankMismatch { tv: TvId, reference: TvId, expected: usize, actual: usize },

    /// A value was used where a different data type is required.
    #[snafu(display("type mismatch for {val}: {reason}"))]
    ValueTypeMismatch { val: ValId, reason: &'static str },

    /// Instruction replay referenced a slot that was never produced.
    #[snafu(display("instruction {instruction} references unknown operand slot {slot}"))]
    UnknownOperand { instruction: usize, slot: usize },
}
