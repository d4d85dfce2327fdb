//! Checks that reject fusions the pipeline cannot lower as scheduled.

use tessel_ir::{ExprKind, Fusion, ParallelType, TvId};

use crate::analysis::kernel_tensors;
use crate::error::{Error, Result};

/// Widest vectorized access, in bytes.
pub const MAX_VECTOR_BYTES: i64 = 16;

#[tracing::instrument(skip_all)]
pub fn validate_ir(fusion: &Fusion) -> Result<()> {
    for tv in kernel_tensors(fusion) {
        validate_compute_at(fusion, tv)?;
        validate_vectorization(fusion, tv)?;
    }
    validate_reductions(fusion)
}

fn validate_compute_at(fusion: &Fusion, tv: TvId) -> Result<()> {
    let view = fusion.tv(tv);
    if view.compute_at_pos > view.leaf.len() {
        return Err(Error::validation(
            fusion.display_tv(tv),
            format!("compute-at position {} exceeds {} leaf axes", view.compute_at_pos, view.leaf.len()),
        ));
    }
    if view.compute_with_pos > view.leaf.len() {
        return Err(Error::validation(
            fusion.display_tv(tv),
            format!("compute-with position {} exceeds {} leaf axes", view.compute_with_pos, view.leaf.len()),
        ));
    }
    if view.compute_at_pos > 0 && (view.definition.is_none() || view.uses.is_empty()) {
        return Err(Error::validation(fusion.display_tv(tv), "only computed tensors with consumers can be inlined"));
    }
    Ok(())
}

fn validate_vectorization(fusion: &Fusion, tv: TvId) -> Result<()> {
    let view = fusion.tv(tv);
    for (position, &id) in view.leaf.iter().enumerate() {
        let domain = fusion.iter_domain(id);
        if domain.parallel_type != ParallelType::Vectorize {
            continue;
        }
        let node = fusion.display_tv(tv);
        if position + 1 != view.leaf.len() {
            return Err(Error::validation(node, format!("vectorized axis {position} is not innermost")));
        }
        let Some(width) = fusion.eval_int(domain.extent) else {
            return Err(Error::validation(node, "vectorized axis needs a constant extent"));
        };
        if width <= 0 || width & (width - 1) != 0 {
            return Err(Error::validation(node, format!("vector width {width} is not a power of two")));
        }
        let bytes = width * view.dtype.bytes() as i64;
        if bytes > MAX_VECTOR_BYTES {
            return Err(Error::validation(
                node,
                format!("vector access of {bytes} bytes exceeds {MAX_VECTOR_BYTES} bytes"),
            ));
        }
    }
    Ok(())
}

fn validate_reductions(fusion: &Fusion) -> Result<()> {
    let mut reference: Option<(TvId, Vec<bool>)> = None;
    for expr in fusion.exprs() {
        let ExprKind::Reduction { input, .. } = fusion.expr(expr).kind else { continue };
        if let Some(def) = fusion.tv(input).definition
            && matches!(fusion.expr(def).kind, ExprKind::IndexSelect { .. })
        {
            return Err(Error::validation(fusion.display_expr(expr), "a gather cannot feed a reduction directly"));
        }

        let out = fusion.expr(expr).output;
        let shape: Vec<bool> = fusion
            .tv(out)
            .root
            .iter()
            .map(|id| fusion.iter_domain(*id))
            .filter(|d| !d.is_broadcast())
            .map(|d| d.is_reduction())
            .collect();
        match &reference {
            None => reference = Some((out, shape)),
            Some((first, expected)) if *expected != shape => {
                return Err(Error::validation(
                    fusion.display_tv(out),
                    format!("reduction axes differ from those of {}", fusion.display_tv(*first)),
                ));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
