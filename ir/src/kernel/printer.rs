use std::fmt::{self, Write};

use super::{KirExpr, PredicateKind};
use crate::Fusion;

/// Indented text form of a loop-nest tree.
///
/// Verbose output also prints predicates attached to computation nodes and index bindings.
pub struct KernelDisplay<'a> {
    pub fusion: &'a Fusion,
    pub exprs: &'a [KirExpr],
    pub verbose: bool,
}

impl<'a> KernelDisplay<'a> {
    pub fn new(fusion: &'a Fusion, exprs: &'a [KirExpr]) -> Self {
        Self { fusion, exprs, verbose: false }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn scope(&self, f: &mut fmt::Formatter<'_>, exprs: &[KirExpr], depth: usize) -> fmt::Result {
        for expr in exprs {
            self.node(f, expr, depth)?;
        }
        Ok(())
    }

    fn node(&self, f: &mut fmt::Formatter<'_>, expr: &KirExpr, depth: usize) -> fmt::Result {
        let fusion = self.fusion;
        let indent = "  ".repeat(depth);
        match expr {
            KirExpr::Op(op) => {
                write!(f, "{indent}{}", fusion.display_expr(op.expr))?;
                if self.verbose {
                    if let Some(pred) = &op.predicate {
                        match pred.value {
                            Some(value) => write!(f, "  pred[{}]: {}", pred.kind, fusion.display_val(value))?,
                            None => write!(f, "  pred[{}]", pred.kind)?,
                        }
                    }
                    for (index, value) in &op.bindings {
                        write!(f, "  {}:={}", fusion.display_val(*index), fusion.display_val(*value))?;
                    }
                }
                writeln!(f)
            }
            KirExpr::ForLoop(fl) => {
                let mut header = String::new();
                write!(
                    header,
                    "FOR {} in {}..{}",
                    fusion.display_val(fl.index),
                    fusion.display_val(fl.start),
                    fusion.display_val(fl.stop)
                )?;
                if fl.parallel_type != crate::ParallelType::Serial {
                    write!(header, " [{}]", fl.parallel_type)?;
                }
                if fl.vectorize {
                    header.push_str(" vectorized");
                }
                writeln!(f, "{indent}{header}:")?;
                self.scope(f, &fl.body, depth + 1)
            }
            KirExpr::IfThenElse(ite) => {
                let kind = if ite.kind == PredicateKind::Inline { String::new() } else { format!(" [{}]", ite.kind) };
                writeln!(f, "{indent}IF {}{kind}:", fusion.display_val(ite.condition))?;
                self.scope(f, &ite.then_body, depth + 1)?;
                if !ite.else_body.is_empty() {
                    writeln!(f, "{indent}ELSE:")?;
                    self.scope(f, &ite.else_body, depth + 1)?;
                }
                Ok(())
            }
            KirExpr::Allocate(alloc) => {
                write!(
                    f,
                    "{indent}ALLOCATE {} {} {} size={}",
                    alloc.buffer,
                    alloc.memory_type,
                    alloc.dtype,
                    fusion.display_val(alloc.size)
                )?;
                if alloc.zero_init {
                    f.write_str(" zero_init")?;
                }
                if let Some(alias) = alloc.alias {
                    write!(f, " alias={alias}")?;
                }
                writeln!(f)
            }
            KirExpr::Init(init) => writeln!(f, "{indent}INIT {} = {}", init.buffer, fusion.display_val(init.value)),
            KirExpr::BlockSync { war_hazard: true } => writeln!(f, "{indent}BLOCKSYNC war"),
            KirExpr::BlockSync { war_hazard: false } => writeln!(f, "{indent}BLOCKSYNC"),
            KirExpr::GridSync { sync_dims } => {
                let dims: Vec<String> = sync_dims.iter().map(|d| d.to_string()).collect();
                writeln!(f, "{indent}GRIDSYNC [{}]", dims.join(", "))
            }
        }
    }
}

impl fmt::Display for KernelDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.scope(f, self.exprs, 0)
    }
}
