//! Scalar values: extents, loop indices, split factors, predicates.
//!
//! Values are built through [`Fusion`] methods that fold constants and drop identities, so
//! predicates and sizes assembled by the lowering passes stay small. Folding never looks through
//! named or symbolic values.

use std::collections::HashMap;
use std::fmt;

use derive_more::Display;
use smallvec::{SmallVec, smallvec};
use tessel_dtype::DataType;

use crate::Fusion;
use crate::ids::ValId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScalarValue {
    Int(i64),
    Bool(bool),
}

impl ScalarValue {
    pub const fn as_int(self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(v),
            Self::Bool(_) => None,
        }
    }

    pub const fn as_bool(self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(v),
            Self::Int(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnaryScalarOp {
    #[display("-")]
    Neg,
    #[display("!")]
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryScalarOp {
    #[display("+")]
    Add,
    #[display("-")]
    Sub,
    #[display("*")]
    Mul,
    #[display("/")]
    Div,
    #[display("%")]
    Mod,
    #[display("ceilDiv")]
    CeilDiv,
    #[display("min")]
    Min,
    #[display("max")]
    Max,
    #[display("<")]
    Lt,
    #[display("<=")]
    Le,
    #[display(">")]
    Gt,
    #[display(">=")]
    Ge,
    #[display("==")]
    Eq,
    #[display("!=")]
    Ne,
    #[display("&&")]
    And,
    #[display("||")]
    Or,
}

impl BinaryScalarOp {
    pub const fn is_comparison(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Eq | Self::Ne)
    }

    pub const fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }

    const fn is_function(self) -> bool {
        matches!(self, Self::CeilDiv | Self::Min | Self::Max)
    }

    /// Evaluate on concrete operands. `None` for division by zero or operand kinds the op
    /// does not accept.
    pub fn apply(self, lhs: ScalarValue, rhs: ScalarValue) -> Option<ScalarValue> {
        use ScalarValue::{Bool, Int};
        Some(match (self, lhs, rhs) {
            (Self::Add, Int(a), Int(b)) => Int(a.checked_add(b)?),
            (Self::Sub, Int(a), Int(b)) => Int(a.checked_sub(b)?),
            (Self::Mul, Int(a), Int(b)) => Int(a.checked_mul(b)?),
            (Self::Div, Int(a), Int(b)) => Int(a.checked_div(b)?),
            (Self::Mod, Int(a), Int(b)) => Int(a.checked_rem(b)?),
            (Self::CeilDiv, Int(a), Int(b)) if b != 0 => Int((a + b - 1).div_euclid(b)),
            (Self::Min, Int(a), Int(b)) => Int(a.min(b)),
            (Self::Max, Int(a), Int(b)) => Int(a.max(b)),
            (Self::Lt, Int(a), Int(b)) => Bool(a < b),
            (Self::Le, Int(a), Int(b)) => Bool(a <= b),
            (Self::Gt, Int(a), Int(b)) => Bool(a > b),
            (Self::Ge, Int(a), Int(b)) => Bool(a >= b),
            (Self::Eq, a, b) => Bool(a == b),
            (Self::Ne, a, b) => Bool(a != b),
            (Self::And, Bool(a), Bool(b)) => Bool(a && b),
            (Self::Or, Bool(a), Bool(b)) => Bool(a || b),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValDef {
    Const(ScalarValue),
    /// Bound by the kernel itself: thread indices, launch dims, loop indices, input sizes.
    Named(String),
    /// Free input bound at run time.
    Symbolic(String),
    Unary { op: UnaryScalarOp, input: ValId },
    Binary { op: BinaryScalarOp, lhs: ValId, rhs: ValId },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Val {
    pub dtype: DataType,
    pub def: ValDef,
}

impl Val {
    pub fn operands(&self) -> SmallVec<[ValId; 2]> {
        match self.def {
            ValDef::Unary { input, .. } => smallvec![input],
            ValDef::Binary { lhs, rhs, .. } => smallvec![lhs, rhs],
            _ => SmallVec::new(),
        }
    }
}

impl Fusion {
    pub(crate) fn push_val(&mut self, dtype: DataType, def: ValDef) -> ValId {
        let id = ValId::from_index(self.vals.len());
        self.vals.push(Val { dtype, def });
        id
    }

    pub fn int(&mut self, value: i64) -> ValId {
        self.push_val(DataType::Index, ValDef::Const(ScalarValue::Int(value)))
    }

    pub fn bool(&mut self, value: bool) -> ValId {
        self.push_val(DataType::Bool, ValDef::Const(ScalarValue::Bool(value)))
    }

    pub fn named_scalar(&mut self, name: impl Into<String>, dtype: DataType) -> ValId {
        self.push_val(dtype, ValDef::Named(name.into()))
    }

    pub fn symbolic(&mut self, name: impl Into<String>, dtype: DataType) -> ValId {
        self.push_val(dtype, ValDef::Symbolic(name.into()))
    }

    /// Value defined directly as a constant.
    pub fn as_const(&self, val: ValId) -> Option<ScalarValue> {
        match self.val(val).def {
            ValDef::Const(c) => Some(c),
            _ => None,
        }
    }

    /// Fold a value down to a constant if every leaf is constant.
    pub fn eval_const(&self, val: ValId) -> Option<ScalarValue> {
        match &self.val(val).def {
            ValDef::Const(c) => Some(*c),
            ValDef::Named(_) | ValDef::Symbolic(_) => None,
            ValDef::Unary { op, input } => {
                let input = self.eval_const(*input)?;
                apply_unary(*op, input)
            }
            ValDef::Binary { op, lhs, rhs } => {
                let lhs = self.eval_const(*lhs)?;
                let rhs = self.eval_const(*rhs)?;
                op.apply(lhs, rhs)
            }
        }
    }

    pub fn eval_int(&self, val: ValId) -> Option<i64> {
        self.eval_const(val).and_then(ScalarValue::as_int)
    }

    /// Same handle, the same constant, or the same expression over the same leaves. Named
    /// values match by name; symbolic inputs only by handle.
    pub fn same_value(&self, a: ValId, b: ValId) -> bool {
        if a == b {
            return true;
        }
        if let (Some(x), Some(y)) = (self.eval_const(a), self.eval_const(b)) {
            return x == y;
        }
        let (va, vb) = (self.val(a), self.val(b));
        if va.dtype != vb.dtype {
            return false;
        }
        match (&va.def, &vb.def) {
            (ValDef::Named(x), ValDef::Named(y)) => x == y,
            (ValDef::Unary { op: oa, input: ia }, ValDef::Unary { op: ob, input: ib }) => {
                oa == ob && self.same_value(*ia, *ib)
            }
            (ValDef::Binary { op: oa, lhs: la, rhs: ra }, ValDef::Binary { op: ob, lhs: lb, rhs: rb }) => {
                oa == ob && self.same_value(*la, *lb) && self.same_value(*ra, *rb)
            }
            _ => false,
        }
    }

    pub fn unary(&mut self, op: UnaryScalarOp, input: ValId) -> ValId {
        if let Some(c) = self.eval_const(input)
            && let Some(folded) = apply_unary(op, c)
        {
            return self.constant(folded);
        }
        if let ValDef::Unary { op: inner_op, input: inner } = self.val(input).def
            && inner_op == op
        {
            return inner;
        }
        let dtype = self.val(input).dtype;
        self.push_val(dtype, ValDef::Unary { op, input })
    }

    pub fn binary(&mut self, op: BinaryScalarOp, lhs: ValId, rhs: ValId) -> ValId {
        use BinaryScalarOp::*;

        let l = self.eval_const(lhs);
        let r = self.eval_const(rhs);
        if let (Some(a), Some(b)) = (l, r)
            && let Some(folded) = op.apply(a, b)
        {
            return self.constant(folded);
        }

        let int = |v: Option<ScalarValue>| v.and_then(ScalarValue::as_int);
        let boolean = |v: Option<ScalarValue>| v.and_then(ScalarValue::as_bool);
        match op {
            Add if int(r) == Some(0) => return lhs,
            Add if int(l) == Some(0) => return rhs,
            Sub if int(r) == Some(0) => return lhs,
            Mul | Div | CeilDiv if int(r) == Some(1) => return lhs,
            Mul if int(l) == Some(1) => return rhs,
            Mul if int(l) == Some(0) || int(r) == Some(0) => return self.int(0),
            Mod if int(r) == Some(1) => return self.int(0),
            And if boolean(l) == Some(true) => return rhs,
            And if boolean(r) == Some(true) => return lhs,
            And if boolean(l) == Some(false) || boolean(r) == Some(false) => return self.bool(false),
            Or if boolean(l) == Some(false) => return rhs,
            Or if boolean(r) == Some(false) => return lhs,
            Or if boolean(l) == Some(true) || boolean(r) == Some(true) => return self.bool(true),
            And | Or | Min | Max if lhs == rhs => return lhs,
            _ => {}
        }

        let dtype = if op.is_comparison() || op.is_logical() { DataType::Bool } else { self.val(lhs).dtype };
        self.push_val(dtype, ValDef::Binary { op, lhs, rhs })
    }

    fn constant(&mut self, value: ScalarValue) -> ValId {
        match value {
            ScalarValue::Int(v) => self.int(v),
            ScalarValue::Bool(v) => self.bool(v),
        }
    }

    pub fn add(&mut self, lhs: ValId, rhs: ValId) -> ValId {
        self.binary(BinaryScalarOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: ValId, rhs: ValId) -> ValId {
        self.binary(BinaryScalarOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: ValId, rhs: ValId) -> ValId {
        self.binary(BinaryScalarOp::Mul, lhs, rhs)
    }

    pub fn div(&mut self, lhs: ValId, rhs: ValId) -> ValId {
        self.binary(BinaryScalarOp::Div, lhs, rhs)
    }

    pub fn modulo(&mut self, lhs: ValId, rhs: ValId) -> ValId {
        self.binary(BinaryScalarOp::Mod, lhs, rhs)
    }

    pub fn ceil_div(&mut self, lhs: ValId, rhs: ValId) -> ValId {
        self.binary(BinaryScalarOp::CeilDiv, lhs, rhs)
    }

    pub fn lt(&mut self, lhs: ValId, rhs: ValId) -> ValId {
        self.binary(BinaryScalarOp::Lt, lhs, rhs)
    }

    pub fn eq(&mut self, lhs: ValId, rhs: ValId) -> ValId {
        self.binary(BinaryScalarOp::Eq, lhs, rhs)
    }

    pub fn and(&mut self, lhs: ValId, rhs: ValId) -> ValId {
        self.binary(BinaryScalarOp::And, lhs, rhs)
    }

    pub fn not(&mut self, val: ValId) -> ValId {
        self.unary(UnaryScalarOp::Not, val)
    }

    /// Conjunction of all values; `true` when empty.
    pub fn and_all(&mut self, vals: impl IntoIterator<Item = ValId>) -> ValId {
        let mut acc = self.bool(true);
        for val in vals {
            acc = self.and(acc, val);
        }
        acc
    }

    /// Rebuild `val` with the values in `replacements` swapped in, folding on the way up.
    pub fn substitute(&mut self, val: ValId, replacements: &HashMap<ValId, ValId>) -> ValId {
        let mut memo = HashMap::new();
        self.substitute_memo(val, replacements, &mut memo)
    }

    fn substitute_memo(
        &mut self,
        val: ValId,
        replacements: &HashMap<ValId, ValId>,
        memo: &mut HashMap<ValId, ValId>,
    ) -> ValId {
        if let Some(&replacement) = replacements.get(&val) {
            return replacement;
        }
        if let Some(&done) = memo.get(&val) {
            return done;
        }
        let result = match self.val(val).def.clone() {
            ValDef::Unary { op, input } => {
                let new_input = self.substitute_memo(input, replacements, memo);
                if new_input == input { val } else { self.unary(op, new_input) }
            }
            ValDef::Binary { op, lhs, rhs } => {
                let new_lhs = self.substitute_memo(lhs, replacements, memo);
                let new_rhs = self.substitute_memo(rhs, replacements, memo);
                if new_lhs == lhs && new_rhs == rhs { val } else { self.binary(op, new_lhs, new_rhs) }
            }
            _ => val,
        };
        memo.insert(val, result);
        result
    }

    /// Printable form of a value expression.
    pub fn display_val(&self, val: ValId) -> ValDisplay<'_> {
        ValDisplay { fusion: self, val }
    }
}

fn apply_unary(op: UnaryScalarOp, value: ScalarValue) -> Option<ScalarValue> {
    match (op, value) {
        (UnaryScalarOp::Neg, ScalarValue::Int(v)) => Some(ScalarValue::Int(v.checked_neg()?)),
        (UnaryScalarOp::Not, ScalarValue::Bool(v)) => Some(ScalarValue::Bool(!v)),
        _ => None,
    }
}

pub struct ValDisplay<'a> {
    fusion: &'a Fusion,
    val: ValId,
}

impl fmt::Display for ValDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sub = |val| ValDisplay { fusion: self.fusion, val };
        match &self.fusion.val(self.val).def {
            ValDef::Const(c) => write!(f, "{c}"),
            ValDef::Named(name) | ValDef::Symbolic(name) => f.write_str(name),
            ValDef::Unary { op, input } => write!(f, "{op}{}", sub(*input)),
            ValDef::Binary { op, lhs, rhs } if op.is_function() => write!(f, "{op}({}, {})", sub(*lhs), sub(*rhs)),
            ValDef::Binary { op, lhs, rhs } => write!(f, "({} {op} {})", sub(*lhs), sub(*rhs)),
        }
    }
}
