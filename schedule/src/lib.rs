//! Persistent-buffer heuristics for normalization kernels.
//!
//! Given the sizes of a reduction problem and a [`DeviceProperties`](tessel_device::DeviceProperties),
//! choose block and grid shape, persistent batch count, vector width and register budget.
//!
//! # Module Organization
//!
//! - [`properties`] - Problem description and its extraction from a fusion
//! - [`helper`] - Compile-time and run-time applicability checks
//! - [`inner`] - Search, shared-memory and legacy heuristics
//! - [`params`] - The chosen parameters
//! - [`config`] - Heuristic variant selection
//!
//! # Example
//!
//! ```ignore
//! let props = PersistentKernelProperties::builder()
//!     .total_reduction_numel(14000)
//!     .total_iteration_numel(8192)
//!     .build();
//! can_schedule_run_time(&props, &device)?;
//! let params = inner_persistent_heuristic(&props, &device, &HeuristicConfig::default())?;
//! ```

pub mod config;
pub mod error;
pub mod helper;
pub mod inner;
pub mod params;
pub mod properties;
pub mod utils;


pub use config::{HeuristicConfig, PersistentHeuristicVariant};
pub use error::{Error, Rejection, Result};
pub use helper::{INNER_PERSISTENT, can_schedule_compile_time, can_schedule_run_time};
pub use inner::{
    HeuristicCalculator, PersistentCandidate, get_inner_persistent_heuristics, inner_persistent_heuristic,
    legacy_heuristic, search_heuristic, shared_memory_heuristic,
};
pub use params::{LaunchParams, PersistentHeuristicKind, ReductionParams};
pub use properties::PersistentKernelProperties;
