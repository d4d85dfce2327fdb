//! Device lowering: turns a scheduled fusion into a kernel IR tree of loops, allocations,
//! barriers and guarded computations.
//!
//! # Module Organization
//!
//! - [`id_graph`] - Iteration-domain equivalence under exact, permissive and loop mapping
//! - [`analysis`] - Kernel-wide maps (parallel dimensions, thread predicates, sync needs, ...)
//! - [`pass`] - Kernel IR passes, in pipeline order
//! - [`lower`](mod@lower) - The driver running everything for one fusion
//! - [`context`] - The per-thread active lowering
//!
//! # Example
//!
//! ```ignore
//! let kernel = tessel_lower::lower(&mut fusion, &device, &LowerConfig::from_env())?;
//! println!("{}", kernel.display(&fusion));
//! ```

pub mod analysis;
pub mod config;
pub mod context;
pub mod error;
pub mod id_graph;
pub mod lower;
pub mod pass;
pub mod validation;


pub use config::{DumpConfig, LoopRotation, LowerConfig, LowerStage};
pub use error::{Error, Result};
pub use id_graph::{IdGraph, IdGraphs, IdMappingMode};
pub use lower::{LoweredKernel, lower};
