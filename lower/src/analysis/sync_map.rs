use std::collections::BTreeMap;

use tessel_ir::{Fusion, MemoryType, ParallelType, ParallelTypeSet, TvId};

use super::{ThreadPredicateMap, leaf_with};
use crate::IdGraphs;
use crate::error::{Error, Result};

/// Parallel dimensions across which each producer is read by a different index than the one
/// that wrote it, so a read-after-write barrier is required.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMap {
    map: BTreeMap<TvId, ParallelTypeSet>,
}

impl SyncMap {
    #[tracing::instrument(skip_all)]
    pub fn build(fusion: &Fusion, graphs: &IdGraphs, thread_predicates: &ThreadPredicateMap) -> Result<Self> {
        let mut map: BTreeMap<TvId, ParallelTypeSet> = BTreeMap::new();
        for expr in fusion.exprs() {
            let consumer = fusion.expr(expr).output;
            for producer in fusion.expr(expr).input_tvs() {
                if fusion.tv(producer).definition.is_none() {
                    continue;
                }
                let mut types = ParallelTypeSet::empty();
                for pt in ParallelType::THREAD_AND_BLOCK {
                    if needs_raw_sync(fusion, graphs, thread_predicates, producer, consumer, pt) {
                        check_memory(fusion, producer, pt)?;
                        types.insert(pt);
                    }
                }
                if !types.is_empty() {
                    tracing::debug!(%producer, %consumer, ?types, "raw sync required");
                    *map.entry(producer).or_default() |= types;
                }
            }
        }
        Ok(Self { map })
    }

    pub fn needs_raw_sync(&self, tv: TvId) -> ParallelTypeSet {
        self.map.get(&tv).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TvId, ParallelTypeSet)> + '_ {
        self.map.iter().map(|(tv, types)| (*tv, *types))
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

fn needs_raw_sync(
    fusion: &Fusion,
    graphs: &IdGraphs,
    thread_predicates: &ThreadPredicateMap,
    producer: TvId,
    consumer: TvId,
    pt: ParallelType,
) -> bool {
    let p_id = leaf_with(fusion, producer, pt);
    let c_id = leaf_with(fusion, consumer, pt).filter(|id| !fusion.iter_domain(*id).is_broadcast());
    match (p_id, c_id) {
        // Identical along pt: every index holds the same value.
        (Some(p), _) if fusion.iter_domain(p).is_broadcast() => false,
        // A block reduction: a broadcast redistributes its result, any other consumer is
        // masked to index 0 along pt.
        (Some(p), _) if fusion.iter_domain(p).is_reduction() => false,
        (Some(p), Some(c)) => !(graphs.loops.are_mapped(p, c) || graphs.exact.are_mapped(p, c)),
        // The consumer reads all of pt that other indices wrote.
        (Some(_), None) => true,
        // Only index 0 writes the producer; every index of the consumer reads it.
        (None, Some(_)) => thread_predicates.predicated_types(fusion, producer).contains(pt),
        (None, None) => false,
    }
}

fn check_memory(fusion: &Fusion, producer: TvId, pt: ParallelType) -> Result<()> {
    let memory = fusion.tv(producer).memory_type;
    let visible = match memory {
        MemoryType::Local => false,
        MemoryType::Shared => pt.is_thread(),
        MemoryType::Global => true,
    };
    if visible {
        return Ok(());
    }
    Err(Error::validation(
        fusion.display_tv(producer),
        format!("written in {memory:?} memory but read across {pt}; it must live in shared or global memory"),
    ))
}
