//! Kernel IR: the loop-nest tree the lowering passes build and rewrite.
//!
//! Scopes own their children (`Vec<KirExpr>`), so passes rewrite by rebuilding lists rather
//! than patching parent pointers. Computation nodes refer back to fusion expressions by
//! handle and carry the loop-index substitutions introduced by unrolling and rotation.

mod printer;

pub use printer::KernelDisplay;

use smallvec::SmallVec;
use tessel_dtype::DataType;

use crate::ids::{ExprId, IdId, TvId, ValId};
use crate::types::{MemoryType, ParallelType, ParallelTypeSet};

/// Loop index replaced by another value inside one node.
pub type Binding = (ValId, ValId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum PredicateKind {
    /// Bounds guard of a single expression.
    Inline,
    /// Hoisted guard selecting a predicate-free copy of a loop nest.
    Unswitch,
    /// One guard for a whole vector access.
    Vectorize,
    /// Run-time alignment check choosing between vector and scalar paths.
    Misaligned,
    /// Guard introduced by loop rotation.
    Rotation,
    /// Guard of a load issued one iteration ahead into the other buffer stage.
    DoubleBuffer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub kind: PredicateKind,
    /// Filled in when conditionals are generated; `None` until then.
    pub value: Option<ValId>,
}

impl Predicate {
    pub fn new(kind: PredicateKind) -> Self {
        Self { kind, value: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KirOp {
    pub expr: ExprId,
    pub predicate: Option<Predicate>,
    pub bindings: SmallVec<[Binding; 2]>,
}

impl KirOp {
    pub fn new(expr: ExprId) -> Self {
        Self { expr, predicate: None, bindings: SmallVec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForLoop {
    pub index: ValId,
    /// Promoted (concrete) iteration domain of the loop group this loop materializes.
    pub iter_domain: IdId,
    pub start: ValId,
    pub stop: ValId,
    pub step: ValId,
    pub parallel_type: ParallelType,
    /// Emitted as a single wide access.
    pub vectorize: bool,
    pub body: Vec<KirExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfThenElse {
    pub kind: PredicateKind,
    pub condition: ValId,
    pub then_body: Vec<KirExpr>,
    pub else_body: Vec<KirExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocate {
    pub buffer: TvId,
    pub memory_type: MemoryType,
    pub dtype: DataType,
    pub shape: Vec<ValId>,
    pub size: ValId,
    pub zero_init: bool,
    /// Buffer whose storage this allocation reuses.
    pub alias: Option<TvId>,
}

/// Initial value of a reduction buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOp {
    pub buffer: TvId,
    pub value: ValId,
    pub bindings: SmallVec<[Binding; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KirExpr {
    Op(KirOp),
    ForLoop(ForLoop),
    IfThenElse(IfThenElse),
    Allocate(Allocate),
    Init(InitOp),
    /// Block-wide barrier; `war_hazard` marks barriers protecting a later overwrite.
    BlockSync { war_hazard: bool },
    /// Grid-wide barrier over the listed block dimensions.
    GridSync { sync_dims: ParallelTypeSet },
}

impl KirExpr {
    pub fn is_scope(&self) -> bool {
        matches!(self, Self::ForLoop(_) | Self::IfThenElse(_))
    }

    pub fn is_sync(&self) -> bool {
        matches!(self, Self::BlockSync { .. } | Self::GridSync { .. })
    }

    pub fn as_for_loop(&self) -> Option<&ForLoop> {
        match self {
            Self::ForLoop(fl) => Some(fl),
            _ => None,
        }
    }

    pub fn as_op(&self) -> Option<&KirOp> {
        match self {
            Self::Op(op) => Some(op),
            _ => None,
        }
    }

    /// Child scopes in execution order.
    pub fn scopes(&self) -> SmallVec<[&[KirExpr]; 2]> {
        let mut scopes = SmallVec::new();
        match self {
            Self::ForLoop(fl) => scopes.push(fl.body.as_slice()),
            Self::IfThenElse(ite) => {
                scopes.push(ite.then_body.as_slice());
                scopes.push(ite.else_body.as_slice());
            }
            _ => {}
        }
        scopes
    }

    pub fn scopes_mut(&mut self) -> SmallVec<[&mut Vec<KirExpr>; 2]> {
        let mut scopes = SmallVec::new();
        match self {
            Self::ForLoop(fl) => scopes.push(&mut fl.body),
            Self::IfThenElse(ite) => {
                scopes.push(&mut ite.then_body);
                scopes.push(&mut ite.else_body);
            }
            _ => {}
        }
        scopes
    }

    /// Add a loop-index substitution to every computation node in this subtree.
    pub fn bind_index(&mut self, index: ValId, value: ValId) {
        match self {
            Self::Op(op) => op.bindings.push((index, value)),
            Self::Init(init) => init.bindings.push((index, value)),
            _ => {
                for scope in self.scopes_mut() {
                    for child in scope.iter_mut() {
                        child.bind_index(index, value);
                    }
                }
            }
        }
    }
}

/// Pre-order walk over a scope, handing each node its chain of enclosing scope nodes.
pub fn walk<'a>(exprs: &'a [KirExpr], visit: &mut impl FnMut(&'a KirExpr, &[&'a KirExpr])) {
    fn go<'a>(exprs: &'a [KirExpr], stack: &mut Vec<&'a KirExpr>, visit: &mut impl FnMut(&'a KirExpr, &[&'a KirExpr])) {
        for expr in exprs {
            visit(expr, stack);
            if expr.is_scope() {
                stack.push(expr);
                for scope in expr.scopes() {
                    go(scope, stack, visit);
                }
                stack.pop();
            }
        }
    }
    go(exprs, &mut Vec::new(), visit);
}

/// All computation nodes in execution order.
pub fn collect_ops(exprs: &[KirExpr]) -> Vec<&KirOp> {
    let mut ops = Vec::new();
    walk(exprs, &mut |expr, _| {
        if let KirExpr::Op(op) = expr {
            ops.push(op);
        }
    });
    ops
}
