use std::collections::HashMap;

use crate::Fusion;
use crate::ids::ValId;
use crate::val::{ScalarValue, UnaryScalarOp, ValDef};

/// Evaluates scalar values once run-time sizes are known.
///
/// Symbolic and named values are resolved first by handle, then by name, so bindings survive
/// the size renaming done during lowering (`T0.size[1]`).
#[derive(Debug, Clone, Default)]
pub struct ExpressionEvaluator {
    by_handle: HashMap<ValId, ScalarValue>,
    by_name: HashMap<String, ScalarValue>,
}

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, val: ValId, value: i64) -> &mut Self {
        self.by_handle.insert(val, ScalarValue::Int(value));
        self
    }

    pub fn bind_named(&mut self, name: impl Into<String>, value: i64) -> &mut Self {
        self.by_name.insert(name.into(), ScalarValue::Int(value));
        self
    }

    pub fn evaluate(&self, fusion: &Fusion, val: ValId) -> Option<ScalarValue> {
        if let Some(known) = self.by_handle.get(&val) {
            return Some(*known);
        }
        match &fusion.val(val).def {
            ValDef::Const(c) => Some(*c),
            ValDef::Named(name) | ValDef::Symbolic(name) => self.by_name.get(name).copied(),
            ValDef::Unary { op, input } => {
                let input = self.evaluate(fusion, *input)?;
                match (op, input) {
                    (UnaryScalarOp::Neg, ScalarValue::Int(v)) => Some(ScalarValue::Int(-v)),
                    (UnaryScalarOp::Not, ScalarValue::Bool(v)) => Some(ScalarValue::Bool(!v)),
                    _ => None,
                }
            }
            ValDef::Binary { op, lhs, rhs } => {
                let lhs = self.evaluate(fusion, *lhs)?;
                let rhs = self.evaluate(fusion, *rhs)?;
                op.apply(lhs, rhs)
            }
        }
    }

    pub fn evaluate_int(&self, fusion: &Fusion, val: ValId) -> Option<i64> {
        self.evaluate(fusion, val).and_then(ScalarValue::as_int)
    }
}
