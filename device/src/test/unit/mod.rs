pub mod occupancy;
pub mod properties;
