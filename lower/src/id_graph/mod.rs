//! Equivalence relations between iteration domains.
//!
//! Three relations are maintained over the same arena of domains:
//!
//! - **exact**: same extent through identical definition chains; broadcast axes never map to
//!   concrete axes.
//! - **permissive**: like exact, but a broadcast axis maps to the axis it is concretized by.
//! - **loop**: axes materialized by one loop, as fixed by the compute-at positions and, once
//!   resolved, the compute-with positions.
//!
//! Producer and consumer root axes are mapped first. Mappings then spread through
//! split/merge/resize expressions until a full sweep adds nothing: matching expressions whose
//! inputs are mapped get their outputs mapped, and single-output expressions whose outputs are
//! mapped get their inputs mapped. A missing mapping means "not proven equal", never an error.
//!
//! Every loop group is promoted to one concrete domain, the one its loop iterates. Groups
//! whose concrete members are not all exactly mapped have no valid promotion and are rejected
//! while the graph is built.

mod disjoint_set;

pub use disjoint_set::DisjointSet;

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use derive_more::Display;
use smallvec::SmallVec;
use snafu::ensure;
use tessel_ir::{ExprId, ExprKind, Fusion, IdExpr, IdExprId, IdId, ParallelType, ValId};

use crate::error::{InconsistentLoopPromotionSnafu, InvalidComputeAtSnafu, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display(rename_all = "lowercase")]
pub enum IdMappingMode {
    Exact,
    Permissive,
    Loop,
}

/// One equivalence relation over all iteration domains of a fusion.
#[derive(Debug, Clone)]
pub struct IdGraph {
    mode: IdMappingMode,
    sets: DisjointSet,
}

impl IdGraph {
    pub fn new(mode: IdMappingMode, num_ids: usize) -> Self {
        Self { mode, sets: DisjointSet::new(num_ids) }
    }

    pub fn mode(&self) -> IdMappingMode {
        self.mode
    }

    /// Representative of the class of `id`.
    pub fn find(&self, id: IdId) -> IdId {
        IdId(self.sets.find(id.index()) as u32)
    }

    pub fn are_mapped(&self, a: IdId, b: IdId) -> bool {
        self.sets.same(a.index(), b.index())
    }

    /// Returns whether the two classes were distinct.
    pub fn map(&mut self, a: IdId, b: IdId) -> bool {
        self.sets.union(a.index(), b.index())
    }

    pub fn group(&self, id: IdId) -> Vec<IdId> {
        let root = self.sets.find(id.index());
        (0..self.sets.len()).filter(|x| self.sets.find(*x) == root).map(|x| IdId(x as u32)).collect()
    }

    pub fn groups(&self) -> Vec<Vec<IdId>> {
        self.sets.classes().into_iter().map(|c| c.into_iter().map(|x| IdId(x as u32)).collect()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Attr {
    Const(i64),
    Val(ValId),
    Flag(bool),
}

/// What two id expressions must share to map their other side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ExprKey {
    kind: &'static str,
    side: SmallVec<[IdId; 2]>,
    attrs: SmallVec<[Attr; 3]>,
}

impl ExprKey {
    fn new(fusion: &Fusion, graph: &IdGraph, expr: &IdExpr, forward: bool) -> Self {
        let value = |val: ValId| fusion.eval_int(val).map_or(Attr::Val(val), Attr::Const);
        let attrs = match *expr {
            IdExpr::Split { factor, inner_split, .. } => SmallVec::from_slice(&[value(factor), Attr::Flag(inner_split)]),
            IdExpr::Merge { .. } => SmallVec::new(),
            IdExpr::Resize { left, right, .. } => SmallVec::from_slice(&[value(left), value(right)]),
        };
        let ids = if forward { expr.inputs() } else { expr.outputs() };
        Self { kind: expr.name(), side: ids.into_iter().map(|id| graph.find(id)).collect(), attrs }
    }
}

/// Producer/consumer root pairs of a tensor expression.
pub fn root_pairs(fusion: &Fusion, expr: ExprId) -> Vec<(IdId, IdId)> {
    let expr = fusion.expr(expr);
    let consumer = &fusion.tv(expr.output).root;
    let mut pairs = Vec::new();
    match &expr.kind {
        ExprKind::Broadcast { input, flags } => {
            let kept = consumer.iter().zip(flags).filter(|(_, flag)| !**flag).map(|(id, _)| *id);
            pairs.extend(fusion.logical_domain(*input).into_iter().zip(kept));
        }
        ExprKind::IndexSelect { lookup, index, dim } => {
            for (axis, id) in fusion.logical_domain(*lookup).into_iter().enumerate() {
                if axis != *dim {
                    pairs.push((id, consumer[axis]));
                }
            }
            if let Some(&id) = fusion.logical_domain(*index).first() {
                pairs.push((id, consumer[*dim]));
            }
        }
        _ => {
            for producer in expr.input_tvs() {
                pairs.extend(fusion.logical_domain(producer).into_iter().zip(consumer.iter().copied()));
            }
        }
    }
    pairs
}

/// Spread mappings through id expressions until a full sweep adds nothing.
fn propagate(fusion: &Fusion, graph: &mut IdGraph) {
    let exprs: Vec<IdExprId> = fusion.id_exprs().collect();
    let mut sweeps = 0usize;
    loop {
        sweeps += 1;
        let mut changed = false;
        for forward in [true, false] {
            let mut seen: HashMap<ExprKey, IdExprId> = HashMap::new();
            for &handle in &exprs {
                let expr = fusion.id_expr(handle);
                if !forward && expr.outputs().len() != 1 {
                    continue;
                }
                let key = ExprKey::new(fusion, graph, expr, forward);
                match seen.entry(key) {
                    Entry::Vacant(slot) => {
                        slot.insert(handle);
                    }
                    Entry::Occupied(slot) => {
                        let other = fusion.id_expr(*slot.get());
                        let (lhs, rhs) =
                            if forward { (other.outputs(), expr.outputs()) } else { (other.inputs(), expr.inputs()) };
                        for (a, b) in lhs.into_iter().zip(rhs) {
                            changed |= graph.map(a, b);
                        }
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
    tracing::trace!(mode = %graph.mode(), sweeps, "id graph converged");
}

/// Whether `id` is a broadcast axis or derived from one.
fn broadcast_derived(fusion: &Fusion, id: IdId, memo: &mut HashMap<IdId, bool>) -> bool {
    if let Some(&known) = memo.get(&id) {
        return known;
    }
    let domain = fusion.iter_domain(id);
    let derived = domain.is_broadcast()
        || domain
            .definition
            .is_some_and(|def| fusion.id_expr(def).inputs().into_iter().any(|input| broadcast_derived(fusion, input, memo)));
    memo.insert(id, derived);
    derived
}

/// The exact, permissive and loop relations of one fusion, plus loop promotion.
#[derive(Debug, Clone)]
pub struct IdGraphs {
    pub exact: IdGraph,
    pub permissive: IdGraph,
    pub loops: IdGraph,
    promotion: HashMap<IdId, IdId>,
}

impl IdGraphs {
    #[tracing::instrument(skip_all)]
    pub fn build(fusion: &Fusion) -> Result<Self> {
        let num_ids = fusion.num_iter_domains();
        let mut exact = IdGraph::new(IdMappingMode::Exact, num_ids);
        let mut permissive = IdGraph::new(IdMappingMode::Permissive, num_ids);

        let exprs = fusion.exprs();
        for &expr in &exprs {
            for (p, c) in root_pairs(fusion, expr) {
                permissive.map(p, c);
                if fusion.iter_domain(p).is_broadcast() == fusion.iter_domain(c).is_broadcast() {
                    exact.map(p, c);
                }
            }
        }
        propagate(fusion, &mut exact);
        propagate(fusion, &mut permissive);

        let mut loops = IdGraph::new(IdMappingMode::Loop, num_ids);
        for &expr in &exprs {
            let consumer = fusion.tv(fusion.expr(expr).output);
            for producer in fusion.expr(expr).input_tvs() {
                let view = fusion.tv(producer);
                for axis in 0..view.compute_at_pos {
                    let p_id = view.leaf[axis];
                    let same_position = consumer.leaf.get(axis).copied().filter(|c| permissive.are_mapped(p_id, *c));
                    let c_id = same_position.or_else(|| consumer.leaf.iter().copied().find(|c| permissive.are_mapped(p_id, *c)));
                    let Some(c_id) = c_id else {
                        return InvalidComputeAtSnafu { tv: producer, axis }.fail();
                    };
                    loops.map(p_id, c_id);
                }
            }
        }

        let mut graphs = Self { exact, permissive, loops, promotion: HashMap::new() };
        graphs.promote_loop_groups(fusion)?;
        Ok(graphs)
    }

    /// Join every compute-with tensor to the loops of its first consumer in expression order,
    /// then promote the loop groups again.
    #[tracing::instrument(skip_all)]
    pub fn resolve_compute_with(&mut self, fusion: &mut Fusion) -> Result<()> {
        let exprs = fusion.exprs();
        let mut resolved = Vec::new();
        for &expr in &exprs {
            let tv = fusion.expr(expr).output;
            let view = fusion.tv(tv);
            if view.compute_with_pos == 0 {
                continue;
            }
            let Some(consumer) = exprs
                .iter()
                .find(|e| fusion.expr(**e).input_tvs().contains(&tv))
                .map(|e| fusion.expr(*e).output)
            else {
                return Err(crate::Error::validation(fusion.display_tv(tv), "computed with a consumer outside the kernel"));
            };
            let consumer_leaf = &fusion.tv(consumer).leaf;
            for axis in 0..view.compute_with_pos {
                let p_id = view.leaf[axis];
                let same_position = consumer_leaf.get(axis).copied().filter(|c| self.permissive.are_mapped(p_id, *c));
                let c_id = same_position.or_else(|| consumer_leaf.iter().copied().find(|c| self.permissive.are_mapped(p_id, *c)));
                let Some(c_id) = c_id else {
                    return InvalidComputeAtSnafu { tv, axis }.fail();
                };
                self.loops.map(p_id, c_id);
            }
            tracing::debug!(%tv, %consumer, position = view.compute_with_pos, "compute-with resolved");
            resolved.push((tv, consumer));
        }
        if resolved.is_empty() {
            return Ok(());
        }
        for (tv, consumer) in resolved {
            fusion.tv_mut(tv).compute_with_consumer = Some(consumer);
        }
        self.promotion.clear();
        self.promote_loop_groups(fusion)
    }

    /// Pick the concrete domain each loop group iterates over.
    fn promote_loop_groups(&mut self, fusion: &Fusion) -> Result<()> {
        let mut memo = HashMap::new();
        for group in self.loops.groups() {
            let concrete: Vec<IdId> = group.iter().copied().filter(|id| !broadcast_derived(fusion, *id, &mut memo)).collect();
            let promoted = match concrete.first() {
                Some(&first) => {
                    for &other in &concrete[1..] {
                        ensure!(
                            self.exact.are_mapped(first, other),
                            InconsistentLoopPromotionSnafu {
                                group: fusion.display_id(group[0]).to_string(),
                                first: fusion.display_id(first).to_string(),
                                second: fusion.display_id(other).to_string(),
                            }
                        );
                    }
                    first
                }
                None => group[0],
            };
            self.promotion.insert(self.loops.find(group[0]), promoted);
        }
        Ok(())
    }

    pub fn graph(&self, mode: IdMappingMode) -> &IdGraph {
        match mode {
            IdMappingMode::Exact => &self.exact,
            IdMappingMode::Permissive => &self.permissive,
            IdMappingMode::Loop => &self.loops,
        }
    }

    /// Key of the loop that materializes `id`.
    pub fn loop_group(&self, id: IdId) -> IdId {
        self.loops.find(id)
    }

    /// Concrete domain iterated by the loop of `id`.
    pub fn promoted(&self, id: IdId) -> IdId {
        self.promotion.get(&self.loops.find(id)).copied().unwrap_or(id)
    }
}

/// Give every member of a loop group the group's parallel type.
///
/// Two different non-serial types within one loop group cannot be materialized by one loop.
#[tracing::instrument(skip_all)]
pub fn validate_and_propagate_ptype(fusion: &mut Fusion, graphs: &IdGraphs) -> Result<()> {
    for group in graphs.loops.groups() {
        let mut found: Option<(IdId, ParallelType)> = None;
        for &id in &group {
            let pt = fusion.iter_domain(id).parallel_type;
            if pt == ParallelType::Serial {
                continue;
            }
            match found {
                None => found = Some((id, pt)),
                Some((other, other_pt)) if other_pt != pt => {
                    return Err(crate::Error::validation(
                        fusion.display_id(id),
                        format!("parallelized as {pt}, but loop-mapped {} is {other_pt}", fusion.display_id(other)),
                    ));
                }
                Some(_) => {}
            }
        }
        if let Some((_, pt)) = found {
            for &id in &group {
                fusion.iter_domain_mut(id).parallel_type = pt;
            }
        }
    }
    Ok(())
}
