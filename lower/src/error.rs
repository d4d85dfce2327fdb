use snafu::Snafu;
use tessel_dtype::DataType;
use tessel_ir::TvId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// `lower` was called while another lowering is active on this thread.
    #[snafu(display("lowering is not reentrant: a lowering is already active on this thread"))]
    ReentrantLowering,

    #[snafu(display("no lowering is active on this thread"))]
    NoActiveLowering,

    /// The fusion cannot be lowered as scheduled.
    #[snafu(display("validation failed for {node}: {reason}"))]
    Validation { node: String, reason: String },

    /// A loop group would have to be materialized with two unrelated concrete domains.
    #[snafu(display("inconsistent loop promotion in loop group of {group}: {first} and {second} are not exactly mapped"))]
    InconsistentLoopPromotion { group: String, first: String, second: String },

    /// An inlined producer axis has no counterpart in the consumer's leaf domain.
    #[snafu(display("{tv} is inlined at axis {axis}, but no consumer axis maps to it"))]
    InvalidComputeAt { tv: TvId, axis: usize },

    /// Compute-at constraints form a cycle between loop nests.
    #[snafu(display("cannot order expressions, compute-at constraints are cyclic among: {exprs}"))]
    ExprSortCycle { exprs: String },

    #[snafu(display("type mismatch for {val}: expected {expected}, found {found}"))]
    TypeMismatch { val: String, expected: DataType, found: DataType },
}

impl Error {
    pub(crate) fn validation(node: impl ToString, reason: impl Into<String>) -> Self {
        Self::Validation { node: node.to_string(), reason: reason.into() }
    }
}
