//! Flat instruction form of scalar expression graphs.
//!
//! Instructions are emitted dependencies first; an operand names the slot (position) of the
//! instruction that produced it. Replaying the list in order rebuilds an equivalent graph in
//! another [`Fusion`], which is how lowered kernels persist their sizes and predicates.

use std::collections::{HashMap, HashSet};

use snafu::ensure;
use tessel_dtype::DataType;

use crate::Fusion;
use crate::error::{Result, UnknownOperandSnafu};
use crate::ids::ValId;
use crate::val::{BinaryScalarOp, ScalarValue, UnaryScalarOp, ValDef};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Instruction {
    Constant { value: ScalarValue, dtype: DataType },
    Named { name: String, dtype: DataType },
    Symbolic { name: String, dtype: DataType },
    Unary { op: UnaryScalarOp, src: usize, dtype: DataType },
    Binary { op: BinaryScalarOp, lhs: usize, rhs: usize, dtype: DataType },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SerializedExpressions {
    pub instructions: Vec<Instruction>,
    /// Slot of each requested root, in request order.
    pub roots: Vec<usize>,
}

/// Values `roots` depend on, dependencies first, each exactly once.
pub fn sorted_evaluation_list(fusion: &Fusion, roots: &[ValId]) -> Vec<ValId> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    for &root in roots {
        // Explicit stack: (value, operands already pushed).
        let mut stack = vec![(root, false)];
        while let Some((val, expanded)) = stack.pop() {
            if expanded {
                order.push(val);
                continue;
            }
            if !visited.insert(val) {
                continue;
            }
            stack.push((val, true));
            for operand in fusion.val(val).operands().into_iter().rev() {
                if !visited.contains(&operand) {
                    stack.push((operand, false));
                }
            }
        }
    }
    order
}

#[derive(Debug, Default)]
pub struct ExpressionSerializer {
    slots: HashMap<ValId, usize>,
    instructions: Vec<Instruction>,
}

impl ExpressionSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serialize(mut self, fusion: &Fusion, roots: &[ValId]) -> SerializedExpressions {
        for val in sorted_evaluation_list(fusion, roots) {
            let node = fusion.val(val);
            let dtype = node.dtype;
            let instruction = match &node.def {
                ValDef::Const(value) => Instruction::Constant { value: *value, dtype },
                ValDef::Named(name) => Instruction::Named { name: name.clone(), dtype },
                ValDef::Symbolic(name) => Instruction::Symbolic { name: name.clone(), dtype },
                ValDef::Unary { op, input } => Instruction::Unary { op: *op, src: self.slots[input], dtype },
                ValDef::Binary { op, lhs, rhs } => {
                    Instruction::Binary { op: *op, lhs: self.slots[lhs], rhs: self.slots[rhs], dtype }
                }
            };
            self.slots.insert(val, self.instructions.len());
            self.instructions.push(instruction);
        }
        let roots = roots.iter().map(|r| self.slots[r]).collect();
        SerializedExpressions { instructions: self.instructions, roots }
    }
}

/// Replays serialized instructions into a fusion.
pub struct ExpressionBuilder<'f> {
    fusion: &'f mut Fusion,
    slots: Vec<ValId>,
}

impl<'f> ExpressionBuilder<'f> {
    pub fn new(fusion: &'f mut Fusion) -> Self {
        Self { fusion, slots: Vec::new() }
    }

    fn operand(&self, instruction: usize, slot: usize) -> Result<ValId> {
        ensure!(slot < self.slots.len(), UnknownOperandSnafu { instruction, slot });
        Ok(self.slots[slot])
    }

    /// Rebuild every instruction; returns the values of the serialized roots.
    pub fn deserialize(mut self, serialized: &SerializedExpressions) -> Result<Vec<ValId>> {
        for (position, instruction) in serialized.instructions.iter().enumerate() {
            let (dtype, def) = match instruction {
                Instruction::Constant { value, dtype } => (*dtype, ValDef::Const(*value)),
                Instruction::Named { name, dtype } => (*dtype, ValDef::Named(name.clone())),
                Instruction::Symbolic { name, dtype } => (*dtype, ValDef::Symbolic(name.clone())),
                Instruction::Unary { op, src, dtype } => {
                    (*dtype, ValDef::Unary { op: *op, input: self.operand(position, *src)? })
                }
                Instruction::Binary { op, lhs, rhs, dtype } => (
                    *dtype,
                    ValDef::Binary { op: *op, lhs: self.operand(position, *lhs)?, rhs: self.operand(position, *rhs)? },
                ),
            };
            let val = self.fusion.push_val(dtype, def);
            self.slots.push(val);
        }
        let count = serialized.instructions.len();
        serialized.roots.iter().map(|slot| self.operand(count, *slot)).collect()
    }
}
