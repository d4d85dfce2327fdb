use tessel_ir::{Fusion, ParallelType};

use crate::error::{Error, Result};

/// How the x thread dimension is padded to whole warps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarpPaddedParallelInfo {
    pub is_tidx_padded: bool,
    /// TIDx is padded to exactly one warp.
    pub is_tidx_single_warp: bool,
    /// A reduction is parallelized on padded TIDx.
    pub has_warp_reduction: bool,
}

/// Collect warp padding; padding anything but TIDx is rejected.
#[tracing::instrument(skip_all)]
pub fn collect_padded_parallel_dims(fusion: &Fusion, warp_size: i64) -> Result<WarpPaddedParallelInfo> {
    let mut info = WarpPaddedParallelInfo::default();
    for tv in super::kernel_tensors(fusion) {
        for &id in &fusion.tv(tv).leaf {
            let domain = fusion.iter_domain(id);
            let Some(size) = domain.warp_padding else { continue };
            if domain.parallel_type != ParallelType::TIDx {
                return Err(Error::validation(
                    fusion.display_id(id),
                    format!("warp padding is only supported on TIDx, found {}", domain.parallel_type),
                ));
            }
            info.is_tidx_padded = true;
            let padded = size.or_else(|| fusion.eval_int(domain.extent).map(|e| (e + warp_size - 1) / warp_size * warp_size));
            if padded == Some(warp_size) {
                info.is_tidx_single_warp = true;
            }
            if domain.is_reduction() {
                info.has_warp_reduction = true;
            }
        }
    }
    tracing::debug!(padded = info.is_tidx_padded, single_warp = info.is_tidx_single_warp, "warp padding");
    Ok(info)
}
