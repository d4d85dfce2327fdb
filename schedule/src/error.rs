use derive_more::Display;
use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("invalid problem: {field} = {value} ({reason})"))]
    InvalidProblem { field: &'static str, value: i64, reason: &'static str },

    /// The shared-memory strategy needs at least one full vectorized block of work.
    #[snafu(display(
        "reduction of {reduction} elements is smaller than one vectorized block ({vectorize} x {bdimx})"
    ))]
    ReductionTooSmall { reduction: i64, vectorize: i64, bdimx: i64 },

    #[snafu(display("fusion has no reduction to schedule"))]
    NoReduction,

    #[snafu(display("extent of {axis} cannot be evaluated"))]
    UnknownExtent { axis: String },
}

/// A strategy declined the fusion; the caller may try another one.
///
/// This is a value, not a failure: nothing about the fusion is wrong.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("{heuristic} rejected: {reason}")]
pub struct Rejection {
    pub heuristic: &'static str,
    pub reason: String,
}

impl Rejection {
    pub fn new(heuristic: &'static str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        tracing::debug!(heuristic, reason = %reason, "cannot schedule");
        Self { heuristic, reason }
    }
}

impl std::error::Error for Rejection {}
