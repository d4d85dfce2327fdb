use std::collections::HashMap;

use tessel_dtype::DataType;
use tessel_ir::{Fusion, MemoryType, ParallelType, ParallelTypeSet, TvId, ValId};

use super::ParallelDimensionMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadPredicateInfo {
    /// Dimensions along which every index writes the same value; only index 0 may write.
    pub redundant: ParallelTypeSet,
    /// Dimensions reduced across threads or blocks; the result lives at index 0.
    pub block_reduction: ParallelTypeSet,
}

/// Which parallel indices must be masked off when writing each tensor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadPredicateMap {
    map: HashMap<TvId, ThreadPredicateInfo>,
}

impl ThreadPredicateMap {
    #[tracing::instrument(skip_all)]
    pub fn build(fusion: &Fusion, parallel_dims: &ParallelDimensionMap) -> Self {
        let used = parallel_dims.used_types();
        let mut map = HashMap::new();
        for expr in fusion.exprs() {
            let tv = fusion.expr(expr).output;
            let mut own = ParallelTypeSet::empty();
            let mut block_reduction = ParallelTypeSet::empty();
            for &id in &fusion.tv(tv).leaf {
                let domain = fusion.iter_domain(id);
                if !domain.parallel_type.is_thread_or_block() || domain.is_broadcast() {
                    continue;
                }
                if domain.is_reduction() {
                    block_reduction.insert(domain.parallel_type);
                } else {
                    own.insert(domain.parallel_type);
                }
            }
            let redundant = (used - own - block_reduction) | block_reduction;
            map.insert(tv, ThreadPredicateInfo { redundant, block_reduction });
        }
        Self { map }
    }

    pub fn get(&self, tv: TvId) -> ThreadPredicateInfo {
        self.map.get(&tv).copied().unwrap_or_default()
    }

    /// Dimensions that mask writes of `tv`; register writes are private and never masked.
    pub fn predicated_types(&self, fusion: &Fusion, tv: TvId) -> ParallelTypeSet {
        if fusion.tv(tv).memory_type == MemoryType::Local {
            return ParallelTypeSet::empty();
        }
        self.get(tv).redundant
    }

    /// `index == 0` over every masked dimension, `None` when nothing is masked.
    pub fn predicate(&self, fusion: &mut Fusion, tv: TvId) -> Option<ValId> {
        let types = self.predicated_types(fusion, tv);
        if types.is_empty() {
            return None;
        }
        let zero = fusion.int(0);
        let terms: Vec<ValId> = types
            .iter()
            .filter_map(ParallelType::index_name)
            .map(|name| {
                let index = fusion.named_scalar(name, DataType::Index);
                fusion.eq(index, zero)
            })
            .collect();
        Some(fusion.and_all(terms))
    }
}
