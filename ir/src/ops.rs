//! Tensor op constructors.
//!
//! Outputs get fresh root domains that share extents with their inputs, so producer and
//! consumer axes are related only through the expression, never through shared handles.

use snafu::ensure;
use tessel_dtype::DataType;

use crate::Fusion;
use crate::error::{InvalidBroadcastFlagsSnafu, NoTensorOperandSnafu, RankMismatchSnafu, Result};
use crate::expr::{BinaryOpType, ExprKind, Operand, ReductionOpType, RngOpType, UnaryOpType};
use crate::ids::{IdId, TvId};
use crate::types::IterType;
use crate::val::ScalarValue;

impl Fusion {
    fn elementwise_output(&mut self, operands: &[Operand], dtype: DataType) -> Result<TvId> {
        let domains: Vec<Vec<IdId>> =
            operands.iter().filter_map(|op| op.tensor()).map(|tv| self.logical_domain(tv)).collect();
        let Some(first) = domains.first() else {
            return NoTensorOperandSnafu { op: "elementwise" }.fail();
        };
        let rank = first.len();
        for domain in &domains[1..] {
            ensure!(domain.len() == rank, RankMismatchSnafu { lhs: rank, rhs: domain.len() });
        }
        let root = (0..rank)
            .map(|axis| {
                let concrete =
                    domains.iter().map(|d| d[axis]).find(|id| !self.iter_domain(*id).is_broadcast()).unwrap_or(first[axis]);
                let iter_type =
                    if self.iter_domain(concrete).is_broadcast() { IterType::Broadcast } else { IterType::Iteration };
                self.clone_iter_domain(concrete, iter_type)
            })
            .collect();
        Ok(self.new_tensor(root, dtype))
    }

    fn operand_dtype(&self, operand: Operand) -> DataType {
        match operand {
            Operand::Tensor(tv) => self.tv(tv).dtype,
            Operand::Scalar(val) => self.val(val).dtype,
        }
    }

    pub fn unary_op(&mut self, op: UnaryOpType, input: TvId) -> Result<TvId> {
        let dtype = self.tv(input).dtype;
        let out = self.elementwise_output(&[input.into()], dtype)?;
        self.push_expr(ExprKind::Unary { op, input: input.into() }, out);
        Ok(out)
    }

    pub fn cast(&mut self, input: TvId, dtype: DataType) -> Result<TvId> {
        let out = self.elementwise_output(&[input.into()], dtype)?;
        self.push_expr(ExprKind::Unary { op: UnaryOpType::Cast, input: input.into() }, out);
        Ok(out)
    }

    pub fn binary_op(&mut self, op: BinaryOpType, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Result<TvId> {
        let (lhs, rhs) = (lhs.into(), rhs.into());
        let dtype = match lhs {
            Operand::Tensor(_) => self.operand_dtype(lhs),
            Operand::Scalar(_) => self.operand_dtype(rhs),
        };
        let out = self.elementwise_output(&[lhs, rhs], dtype)?;
        self.push_expr(ExprKind::Binary { op, lhs, rhs }, out);
        Ok(out)
    }

    pub fn add_tensors(&mut self, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Result<TvId> {
        self.binary_op(BinaryOpType::Add, lhs, rhs)
    }

    pub fn sub_tensors(&mut self, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Result<TvId> {
        self.binary_op(BinaryOpType::Sub, lhs, rhs)
    }

    pub fn mul_tensors(&mut self, lhs: impl Into<Operand>, rhs: impl Into<Operand>) -> Result<TvId> {
        self.binary_op(BinaryOpType::Mul, lhs, rhs)
    }

    pub fn exp(&mut self, input: TvId) -> Result<TvId> {
        self.unary_op(UnaryOpType::Exp, input)
    }

    /// Reduce the given logical axes.
    pub fn reduction(&mut self, op: ReductionOpType, input: TvId, axes: &[usize]) -> Result<TvId> {
        let domain = self.logical_domain(input);
        for &axis in axes {
            ensure!(axis < domain.len(), RankMismatchSnafu { lhs: domain.len(), rhs: axis + 1 });
        }
        let root = domain
            .iter()
            .enumerate()
            .map(|(axis, id)| {
                let iter_type = if axes.contains(&axis) {
                    IterType::Reduction
                } else if self.iter_domain(*id).is_broadcast() {
                    IterType::Broadcast
                } else {
                    IterType::Iteration
                };
                self.clone_iter_domain(*id, iter_type)
            })
            .collect();
        let dtype = self.tv(input).dtype;
        let out = self.new_tensor(root, dtype);
        let init = match op {
            ReductionOpType::Sum => self.int(0),
            ReductionOpType::Max => self.int(i64::MIN),
            ReductionOpType::Min => self.int(i64::MAX),
        };
        self.push_expr(ExprKind::Reduction { op, input, init }, out);
        Ok(out)
    }

    pub fn sum(&mut self, input: TvId, axes: &[usize]) -> Result<TvId> {
        self.reduction(ReductionOpType::Sum, input, axes)
    }

    /// Insert broadcast axes where `flags` is true.
    pub fn broadcast(&mut self, input: TvId, flags: &[bool]) -> Result<TvId> {
        let domain = self.logical_domain(input);
        let kept = flags.iter().filter(|f| !**f).count();
        ensure!(kept == domain.len(), InvalidBroadcastFlagsSnafu { flags: flags.to_vec(), rank: domain.len() });
        let mut inputs = domain.into_iter();
        let mut root = Vec::with_capacity(flags.len());
        for &flag in flags {
            let source = if flag { None } else { inputs.next() };
            let id = match source {
                Some(id) => {
                    let iter_type = self.iter_domain(id).iter_type;
                    self.clone_iter_domain(id, iter_type)
                }
                None => {
                    let one = self.int(1);
                    self.new_iter_domain(one, IterType::Broadcast)
                }
            };
            root.push(id);
        }
        let dtype = self.tv(input).dtype;
        let out = self.new_tensor(root, dtype);
        self.push_expr(ExprKind::Broadcast { input, flags: flags.to_vec() }, out);
        Ok(out)
    }

    pub fn set(&mut self, input: TvId) -> Result<TvId> {
        let dtype = self.tv(input).dtype;
        let out = self.elementwise_output(&[input.into()], dtype)?;
        self.push_expr(ExprKind::Set { input }, out);
        Ok(out)
    }

    /// Random tensor shaped like `like`.
    pub fn rand_like(&mut self, like: TvId, op: RngOpType) -> Result<TvId> {
        let dtype = self.tv(like).dtype;
        let out = self.elementwise_output(&[like.into()], dtype)?;
        self.push_expr(ExprKind::Rng { op, offset: None }, out);
        Ok(out)
    }

    /// Gather `lookup` along `dim` at the positions of the 1-D `index` tensor.
    pub fn index_select(&mut self, lookup: TvId, dim: usize, index: TvId) -> Result<TvId> {
        let domain = self.logical_domain(lookup);
        let index_domain = self.logical_domain(index);
        ensure!(dim < domain.len(), RankMismatchSnafu { lhs: domain.len(), rhs: dim + 1 });
        ensure!(index_domain.len() == 1, RankMismatchSnafu { lhs: 1usize, rhs: index_domain.len() });
        let root = domain
            .iter()
            .enumerate()
            .map(|(axis, id)| {
                let source = if axis == dim { index_domain[0] } else { *id };
                let iter_type = self.iter_domain(source).iter_type;
                self.clone_iter_domain(source, iter_type)
            })
            .collect();
        let dtype = self.tv(lookup).dtype;
        let out = self.new_tensor(root, dtype);
        self.push_expr(ExprKind::IndexSelect { lookup, index, dim }, out);
        Ok(out)
    }

    /// Scalar constant operand.
    pub fn scalar(&mut self, value: i64) -> Operand {
        Operand::Scalar(self.push_val(DataType::Float32, crate::ValDef::Const(ScalarValue::Int(value))))
    }
}
