//! Removal of dead scopes left behind by earlier passes.

use tessel_ir::kernel::{IfThenElse, KirExpr};
use tessel_ir::{Fusion, ScalarValue};

/// Drop empty and zero-trip loops, resolve constant conditionals and flip conditionals with
/// an empty then-branch. Bottom-up, so a loop emptied by its children disappears too.
#[tracing::instrument(skip_all)]
pub fn cleanup(fusion: &mut Fusion, exprs: Vec<KirExpr>) -> Vec<KirExpr> {
    let mut out = Vec::with_capacity(exprs.len());
    for expr in exprs {
        match expr {
            KirExpr::ForLoop(mut fl) => {
                fl.body = cleanup(fusion, std::mem::take(&mut fl.body));
                let zero_trip = matches!(
                    (fusion.eval_int(fl.start), fusion.eval_int(fl.stop)),
                    (Some(start), Some(stop)) if start >= stop
                );
                if !fl.body.is_empty() && !zero_trip {
                    out.push(KirExpr::ForLoop(fl));
                }
            }
            KirExpr::IfThenElse(ite) => out.extend(cleanup_ite(fusion, ite)),
            other => out.push(other),
        }
    }
    out
}

fn cleanup_ite(fusion: &mut Fusion, mut ite: IfThenElse) -> Vec<KirExpr> {
    ite.then_body = cleanup(fusion, std::mem::take(&mut ite.then_body));
    ite.else_body = cleanup(fusion, std::mem::take(&mut ite.else_body));

    match fusion.eval_const(ite.condition) {
        Some(ScalarValue::Bool(true)) => return ite.then_body,
        Some(ScalarValue::Bool(false)) => return ite.else_body,
        _ => {}
    }
    if ite.then_body.is_empty() && ite.else_body.is_empty() {
        return Vec::new();
    }
    if ite.then_body.is_empty() {
        ite.condition = fusion.not(ite.condition);
        ite.then_body = std::mem::take(&mut ite.else_body);
    }
    vec![KirExpr::IfThenElse(ite)]
}
