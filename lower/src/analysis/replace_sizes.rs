use std::collections::HashMap;

use tessel_dtype::DataType;
use tessel_ir::{Fusion, ValDef, ValId};

/// Replace symbolic extents of fusion inputs and outputs with the named kernel arguments
/// `T{n}.size[{axis}]`. Returns the replaced values.
///
/// Extents are shared by handle between producers and consumers, so one replacement covers
/// every tensor derived from that axis.
#[tracing::instrument(skip_all)]
pub fn replace_symbolic_sizes(fusion: &mut Fusion) -> HashMap<ValId, ValId> {
    let mut replaced = HashMap::new();
    let tensors: Vec<_> = fusion.inputs().iter().chain(fusion.outputs()).copied().collect();
    for tv in tensors {
        let root = fusion.tv(tv).root.clone();
        for (axis, id) in root.into_iter().enumerate() {
            let extent = fusion.iter_domain(id).extent;
            if !matches!(fusion.val(extent).def, ValDef::Symbolic(_)) || replaced.contains_key(&extent) {
                continue;
            }
            let named = fusion.named_scalar(format!("{tv}.size[{axis}]"), DataType::Index);
            replaced.insert(extent, named);
        }
    }
    for (&old, &new) in &replaced {
        fusion.replace_val(old, new);
    }
    tracing::debug!(count = replaced.len(), "replaced symbolic sizes");
    replaced
}
