//! Fusion graph arena, scheduling primitives and kernel IR for the tessel lowering pipeline.
//!
//! # Module Organization
//!
//! - [`fusion`] - The arena owning every node table
//! - [`val`] - Scalar values with a constant-folding builder
//! - [`domain`] - Iteration domains and split/merge/resize
//! - [`tensor`] - Tensor views and scheduling primitives (split, merge, parallelize, inline)
//! - [`expr`] / [`ops`] - Tensor expressions and their constructors
//! - [`kernel`] - Loop-nest tree produced by lowering
//! - [`instructions`] - Flat, slot-addressed form of scalar expression graphs
//! - [`evaluator`] - Run-time evaluation of scalar values

pub mod domain;
pub mod error;
pub mod evaluator;
pub mod expr;
pub mod fusion;
pub mod ids;
pub mod instructions;
pub mod kernel;
pub mod ops;
pub mod tensor;
pub mod types;
pub mod val;


pub use domain::{IdExpr, IterDomain};
pub use error::{Error, Result};
pub use evaluator::ExpressionEvaluator;
pub use expr::{BinaryOpType, Expr, ExprKind, Operand, ReductionOpType, RngOpType, UnaryOpType};
pub use fusion::Fusion;
pub use ids::{ExprId, IdExprId, IdId, TvId, ValId};
pub use tensor::{ScheduleOp, TensorView};
pub use types::{IterType, MemoryType, ParallelType, ParallelTypeSet};
pub use val::{BinaryScalarOp, ScalarValue, UnaryScalarOp, Val, ValDef};

pub use tessel_dtype::{DataType, IndexType};
