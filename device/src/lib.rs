//! Hardware descriptor consumed by the heuristics and the lowering pipeline.
//!
//! The descriptor is read once per lowering/heuristic call and treated as immutable input.
//! Nothing here talks to a driver: callers build a [`DeviceProperties`] from whatever source
//! they have (a driver query, a preset, a test fixture).

pub mod error;
pub mod occupancy;
pub mod properties;

#[cfg(test)]
pub mod test;

pub use error::{Error, Result};
pub use occupancy::{
    BYTES_PER_REGISTER, MAX_REGISTERS_PER_THREAD, REGISTER_ALLOCATION_GRANULARITY, REGISTER_OVERHEAD, ceil_div,
};
pub use properties::DeviceProperties;
