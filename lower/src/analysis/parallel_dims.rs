use std::collections::{BTreeMap, BTreeSet};

use tessel_dtype::DataType;
use tessel_ir::{Fusion, ParallelType, ParallelTypeSet, ValId};

use crate::IdGraphs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelDim {
    /// Launch size of the dimension.
    pub extent: ValId,
    /// Every axis mapped to the dimension has exactly this extent.
    pub exact: bool,
}

/// Launch size of each thread and block dimension used by the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParallelDimensionMap {
    dims: BTreeMap<ParallelType, ParallelDim>,
}

impl ParallelDimensionMap {
    #[tracing::instrument(skip_all)]
    pub fn build(fusion: &mut Fusion, graphs: &IdGraphs, warp_size: i64) -> Self {
        let tensors = super::kernel_tensors(fusion);
        let mut dims = BTreeMap::new();
        for pt in ParallelType::THREAD_AND_BLOCK {
            let ids: Vec<_> = tensors
                .iter()
                .flat_map(|tv| fusion.tv(*tv).leaf.iter().copied())
                .filter(|id| {
                    let domain = fusion.iter_domain(*id);
                    domain.parallel_type == pt && !domain.is_broadcast()
                })
                .collect();
            let Some(&first) = ids.first() else { continue };

            let classes: BTreeSet<_> = ids.iter().map(|id| graphs.exact.find(*id)).collect();
            let consts: Option<Vec<i64>> = ids.iter().map(|id| fusion.eval_int(fusion.iter_domain(*id).extent)).collect();
            let mut dim = match consts {
                Some(values) => {
                    let max = values.iter().copied().max().unwrap_or(1);
                    let exact = values.iter().all(|v| *v == max);
                    ParallelDim { extent: fusion.int(max), exact }
                }
                None if classes.len() == 1 => ParallelDim { extent: fusion.iter_domain(first).extent, exact: true },
                None => {
                    let name = pt.dim_name().unwrap_or("dim");
                    ParallelDim { extent: fusion.named_scalar(name, DataType::Index), exact: false }
                }
            };

            if pt == ParallelType::TIDx
                && let Some(padding) = ids.iter().find_map(|id| fusion.iter_domain(*id).warp_padding)
            {
                let current = fusion.eval_int(dim.extent);
                let padded = padding.or_else(|| current.map(|e| (e + warp_size - 1) / warp_size * warp_size));
                dim = match padded {
                    Some(size) => ParallelDim { extent: fusion.int(size), exact: dim.exact && current == Some(size) },
                    None => ParallelDim { extent: fusion.named_scalar("blockDim.x", DataType::Index), exact: false },
                };
            }
            tracing::debug!(%pt, extent = %fusion.display_val(dim.extent), exact = dim.exact, "parallel dimension");
            dims.insert(pt, dim);
        }
        Self { dims }
    }

    pub fn get(&self, pt: ParallelType) -> Option<ParallelDim> {
        self.dims.get(&pt).copied()
    }

    /// Dimensions the kernel does not use count as exact.
    pub fn is_exact(&self, pt: ParallelType) -> bool {
        self.dims.get(&pt).is_none_or(|d| d.exact)
    }

    pub fn used_types(&self) -> ParallelTypeSet {
        self.dims.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParallelType, ParallelDim)> + '_ {
        self.dims.iter().map(|(pt, dim)| (*pt, *dim))
    }

    /// Product of the constant thread dimensions, `None` if any is symbolic.
    pub fn threads_per_block(&self, fusion: &Fusion) -> Option<i64> {
        self.iter()
            .filter(|(pt, _)| pt.is_thread())
            .map(|(_, dim)| fusion.eval_int(dim.extent))
            .try_fold(1i64, |acc, v| v.map(|v| acc * v))
    }
}
