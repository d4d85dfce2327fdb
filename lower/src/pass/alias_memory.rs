//! Buffer reuse.
//!
//! Each allocation gets a live range over a linear numbering of the kernel: from the first
//! access to the last, widened to the whole of any loop that sits between the allocation
//! and the access (the loop re-executes the access on every iteration). A new buffer may
//! take over the storage of an earlier one in the same scope when the earlier range has
//! ended, the element width and memory space agree and the new buffer fits. Shared memory
//! additionally requires a barrier between the two ranges.

use std::collections::HashMap;

use tessel_dtype::IndexType;
use tessel_ir::kernel::KirExpr;
use tessel_ir::{Fusion, MemoryType, TvId, ValId};

use crate::context;
use crate::error::Result;

#[derive(Debug, Clone)]
struct AllocInfo {
    tv: TvId,
    scope: Vec<usize>,
    memory_type: MemoryType,
    bytes: usize,
    size: ValId,
    zero_init: bool,
}

#[derive(Debug, Clone, Copy)]
struct Access {
    position: usize,
    write: bool,
}

#[derive(Debug, Default)]
struct Liveness {
    allocs: Vec<AllocInfo>,
    /// First and last position inside each loop.
    loops: Vec<(usize, usize)>,
    accesses: HashMap<TvId, Vec<(Access, Vec<usize>)>>,
    syncs: Vec<usize>,
    counter: usize,
}

impl Liveness {
    fn analyze(fusion: &Fusion, exprs: &[KirExpr], index_type: IndexType) -> Self {
        let mut liveness = Self::default();
        liveness.visit(fusion, exprs, &mut Vec::new(), index_type);
        liveness
    }

    fn visit(&mut self, fusion: &Fusion, scope: &[KirExpr], chain: &mut Vec<usize>, index_type: IndexType) {
        for node in scope {
            let position = self.counter;
            self.counter += 1;
            match node {
                KirExpr::Op(op) => {
                    let expr = fusion.expr(op.expr);
                    for tv in expr.input_tvs() {
                        self.access(tv, Access { position, write: false }, chain);
                    }
                    self.access(expr.output, Access { position, write: true }, chain);
                }
                KirExpr::Init(init) => self.access(init.buffer, Access { position, write: true }, chain),
                KirExpr::Allocate(alloc) => self.allocs.push(AllocInfo {
                    tv: alloc.buffer,
                    scope: chain.clone(),
                    memory_type: alloc.memory_type,
                    bytes: alloc.dtype.bytes_with_index(index_type),
                    size: alloc.size,
                    zero_init: alloc.zero_init,
                }),
                KirExpr::BlockSync { .. } | KirExpr::GridSync { .. } => self.syncs.push(position),
                KirExpr::ForLoop(fl) => {
                    let id = self.loops.len();
                    self.loops.push((position, position));
                    chain.push(id);
                    self.visit(fusion, &fl.body, chain, index_type);
                    chain.pop();
                    self.loops[id].1 = self.counter - 1;
                }
                KirExpr::IfThenElse(ite) => {
                    self.visit(fusion, &ite.then_body, chain, index_type);
                    self.visit(fusion, &ite.else_body, chain, index_type);
                }
            }
        }
    }

    fn access(&mut self, tv: TvId, access: Access, chain: &[usize]) {
        self.accesses.entry(tv).or_default().push((access, chain.to_vec()));
    }

    /// `[first write, last access]` of an allocation, `None` if it is never written.
    fn live_range(&self, alloc: &AllocInfo) -> Option<(usize, usize)> {
        let accesses = self.accesses.get(&alloc.tv)?;
        let span = |(access, chain): &(Access, Vec<usize>)| match chain.get(alloc.scope.len()) {
            Some(outer) if chain.starts_with(&alloc.scope) => self.loops[*outer],
            _ => (access.position, access.position),
        };
        let first = accesses.iter().filter(|(a, _)| a.write).map(|entry| span(entry).0).min()?;
        let last = accesses.iter().map(|entry| span(entry).1).max()?;
        Some((first, last))
    }

    fn sync_between(&self, after: usize, before: usize) -> bool {
        self.syncs.iter().any(|s| *s > after && *s < before)
    }
}

#[tracing::instrument(skip_all)]
pub fn reuse_memory_allocations(fusion: &Fusion, mut exprs: Vec<KirExpr>) -> Result<Vec<KirExpr>> {
    let index_type = context::current()?.index_type;
    let liveness = Liveness::analyze(fusion, &exprs, index_type);

    let ranges: Vec<Option<(usize, usize)>> = liveness.allocs.iter().map(|a| liveness.live_range(a)).collect();
    // Last use of the storage each root buffer provides.
    let mut storage_end: HashMap<usize, usize> = HashMap::new();
    let mut aliases: HashMap<TvId, TvId> = HashMap::new();

    for (index, alloc) in liveness.allocs.iter().enumerate() {
        let Some((first, last)) = ranges[index] else { continue };
        let reusable =
            alloc.memory_type != MemoryType::Global && !alloc.zero_init && !fusion.tv(alloc.tv).double_buffered;
        let target = reusable
            .then(|| {
                (0..index).find(|&candidate| {
                    let old = &liveness.allocs[candidate];
                    let Some(&end) = storage_end.get(&candidate) else { return false };
                    old.memory_type == alloc.memory_type
                        && old.bytes == alloc.bytes
                        && old.scope == alloc.scope
                        && end < first
                        && fits(fusion, alloc.size, old.size)
                        && (alloc.memory_type != MemoryType::Shared || liveness.sync_between(end, first))
                })
            })
            .flatten();
        match target {
            Some(candidate) => {
                let root = liveness.allocs[candidate].tv;
                tracing::debug!(buffer = %alloc.tv, reuses = %root, "alias");
                aliases.insert(alloc.tv, root);
                storage_end.insert(candidate, last);
            }
            None if reusable => {
                storage_end.insert(index, last);
            }
            None => {}
        }
    }

    set_aliases(&mut exprs, &aliases);
    Ok(exprs)
}

fn fits(fusion: &Fusion, size: ValId, available: ValId) -> bool {
    match (fusion.eval_int(size), fusion.eval_int(available)) {
        (Some(size), Some(available)) => size <= available,
        _ => fusion.same_value(size, available),
    }
}

fn set_aliases(scope: &mut [KirExpr], aliases: &HashMap<TvId, TvId>) {
    for node in scope {
        if let KirExpr::Allocate(alloc) = node {
            alloc.alias = aliases.get(&alloc.buffer).copied();
        }
        for body in node.scopes_mut() {
            set_aliases(body, aliases);
        }
    }
}
