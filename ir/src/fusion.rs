//! The fusion arena.
//!
//! # Architecture
//!
//! ```text
//! Fusion
//!   vals      : Vec<Val>         <- ValId
//!   ids       : Vec<IterDomain>  <- IdId      (root/leaf axes, split/merge outputs)
//!   id_exprs  : Vec<IdExpr>      <- IdExprId  (split / merge / resize)
//!   tvs       : Vec<TensorView>  <- TvId
//!   exprs     : Vec<Expr>        <- ExprId    (one output tensor each)
//! ```
//!
//! Handles index flat tables; nothing is ever removed, so creation order is a valid
//! topological order for every table.

use std::collections::HashSet;
use std::fmt;

use crate::domain::{IdExpr, IterDomain};
use crate::expr::{Expr, ExprKind};
use crate::ids::{ExprId, IdExprId, IdId, TvId, ValId};
use crate::tensor::TensorView;
use crate::types::MemoryType;
use crate::val::{Val, ValDef};

#[derive(Debug, Clone, Default)]
pub struct Fusion {
    pub(crate) vals: Vec<Val>,
    pub(crate) ids: Vec<IterDomain>,
    pub(crate) id_exprs: Vec<IdExpr>,
    pub(crate) tvs: Vec<TensorView>,
    pub(crate) exprs: Vec<Expr>,
    inputs: Vec<TvId>,
    outputs: Vec<TvId>,
}

impl Fusion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn val(&self, id: ValId) -> &Val {
        &self.vals[id.index()]
    }

    pub fn iter_domain(&self, id: IdId) -> &IterDomain {
        &self.ids[id.index()]
    }

    pub fn iter_domain_mut(&mut self, id: IdId) -> &mut IterDomain {
        &mut self.ids[id.index()]
    }

    pub fn id_expr(&self, id: IdExprId) -> &IdExpr {
        &self.id_exprs[id.index()]
    }

    pub fn tv(&self, id: TvId) -> &TensorView {
        &self.tvs[id.index()]
    }

    pub fn tv_mut(&mut self, id: TvId) -> &mut TensorView {
        &mut self.tvs[id.index()]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.index()]
    }

    pub fn num_vals(&self) -> usize {
        self.vals.len()
    }

    pub fn num_iter_domains(&self) -> usize {
        self.ids.len()
    }

    pub fn iter_domains(&self) -> impl Iterator<Item = IdId> + '_ {
        (0..self.ids.len()).map(IdId::from_index)
    }

    pub fn id_exprs(&self) -> impl Iterator<Item = IdExprId> + '_ {
        (0..self.id_exprs.len()).map(IdExprId::from_index)
    }

    pub fn tensors(&self) -> impl Iterator<Item = TvId> + '_ {
        (0..self.tvs.len()).map(TvId::from_index)
    }

    pub fn inputs(&self) -> &[TvId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TvId] {
        &self.outputs
    }

    pub fn add_input(&mut self, tv: TvId) {
        self.tv_mut(tv).memory_type = MemoryType::Global;
        self.inputs.push(tv);
    }

    pub fn add_output(&mut self, tv: TvId) {
        self.tv_mut(tv).memory_type = MemoryType::Global;
        self.outputs.push(tv);
    }

    pub fn is_input(&self, tv: TvId) -> bool {
        self.inputs.contains(&tv)
    }

    pub fn is_output(&self, tv: TvId) -> bool {
        self.outputs.contains(&tv)
    }

    pub(crate) fn push_expr(&mut self, kind: ExprKind, output: TvId) -> ExprId {
        let handle = ExprId::from_index(self.exprs.len());
        let expr = Expr { kind, output };
        for input in expr.input_tvs() {
            let uses = &mut self.tvs[input.index()].uses;
            if !uses.contains(&handle) {
                uses.push(handle);
            }
        }
        self.tvs[output.index()].definition = Some(handle);
        self.exprs.push(expr);
        handle
    }

    /// Expressions the outputs depend on, producers first.
    pub fn exprs(&self) -> Vec<ExprId> {
        let mut live = HashSet::new();
        let mut stack: Vec<TvId> = self.outputs.clone();
        while let Some(tv) = stack.pop() {
            if let Some(def) = self.tv(tv).definition
                && live.insert(def)
            {
                stack.extend(self.expr(def).input_tvs());
            }
        }
        let mut order: Vec<ExprId> = live.into_iter().collect();
        order.sort();
        order
    }

    pub fn producers_of(&self, tv: TvId) -> Vec<TvId> {
        self.tv(tv).definition.map(|d| self.expr(d).input_tvs().into_vec()).unwrap_or_default()
    }

    pub fn consumers_of(&self, tv: TvId) -> Vec<TvId> {
        self.tv(tv).uses.iter().map(|e| self.expr(*e).output).collect()
    }

    /// Split/merge/resize expressions between a tensor's root and leaf domains, in creation
    /// (topological) order.
    pub fn transforms_of(&self, tv: TvId) -> Vec<IdExprId> {
        let root: HashSet<IdId> = self.tv(tv).root.iter().copied().collect();
        let mut seen = HashSet::new();
        let mut stack: Vec<IdId> = self.tv(tv).leaf.clone();
        while let Some(id) = stack.pop() {
            if root.contains(&id) {
                continue;
            }
            if let Some(def) = self.iter_domain(id).definition
                && seen.insert(def)
            {
                stack.extend(self.id_expr(def).inputs());
            }
        }
        let mut order: Vec<IdExprId> = seen.into_iter().collect();
        order.sort();
        order
    }

    /// Swap every use of `old` (in value definitions and iteration domain extents) for `new`.
    pub fn replace_val(&mut self, old: ValId, new: ValId) {
        for val in &mut self.vals {
            match &mut val.def {
                ValDef::Unary { input, .. } if *input == old => *input = new,
                ValDef::Binary { lhs, rhs, .. } => {
                    if *lhs == old {
                        *lhs = new;
                    }
                    if *rhs == old {
                        *rhs = new;
                    }
                }
                _ => {}
            }
        }
        for id in &mut self.ids {
            if id.extent == old {
                id.extent = new;
            }
            if id.start == old {
                id.start = new;
            }
        }
    }

    pub fn display_expr(&self, expr: ExprId) -> ExprDisplay<'_> {
        ExprDisplay { fusion: self, expr }
    }
}

pub struct ExprDisplay<'a> {
    fusion: &'a Fusion,
    expr: ExprId,
}

impl fmt::Display for ExprDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let expr = self.fusion.expr(self.expr);
        write!(f, "{} = ", self.fusion.display_tv(expr.output))?;
        match &expr.kind {
            ExprKind::Unary { op, input } => write!(f, "{op}({input})"),
            ExprKind::Binary { op, lhs, rhs } => write!(f, "{op}({lhs}, {rhs})"),
            ExprKind::Reduction { op, input, init } => {
                write!(f, "reduction({op}, {input}, init = {})", self.fusion.display_val(*init))
            }
            ExprKind::Broadcast { input, flags } => write!(f, "broadcast({input}, {flags:?})"),
            ExprKind::Set { input } => write!(f, "set({input})"),
            ExprKind::Rng { op, offset } => match offset {
                Some(offset) => write!(f, "rng_{op}(offset = {offset})"),
                None => write!(f, "rng_{op}()"),
            },
            ExprKind::IndexSelect { lookup, index, dim } => write!(f, "index_select({lookup}, {dim}, {index})"),
        }
    }
}
