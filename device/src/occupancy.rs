//! Register and occupancy arithmetic.
//!
//! Registers are allocated per warp in chunks of [`REGISTER_ALLOCATION_GRANULARITY`], so the
//! number of resident threads is a step function of the per-thread register count and vice
//! versa. Both directions are needed: the persistent heuristic estimates occupancy from a
//! register estimate, then asks how many registers the compiler may use at that occupancy.

use crate::DeviceProperties;

pub const BYTES_PER_REGISTER: i64 = 4;
pub const MAX_REGISTERS_PER_THREAD: i64 = 255;
pub const REGISTER_ALLOCATION_GRANULARITY: i64 = 256;
/// Registers a kernel needs besides its persistent buffers (indices, pointers, temporaries).
pub const REGISTER_OVERHEAD: i64 = 40;

impl DeviceProperties {
    /// Largest per-thread register count that still lets `threads_per_sm` threads be resident.
    pub fn reg_per_thread_given_threads_per_sm(&self, threads_per_sm: i64) -> i64 {
        let warps_per_sm = ceil_div(threads_per_sm, self.warp_size).max(1);
        let reg_per_warp = (self.regs_per_multiprocessor / warps_per_sm / REGISTER_ALLOCATION_GRANULARITY)
            * REGISTER_ALLOCATION_GRANULARITY;
        (reg_per_warp / self.warp_size).min(MAX_REGISTERS_PER_THREAD)
    }

    /// Threads that can be resident on one SM when each uses `reg_per_thread` registers.
    pub fn threads_per_sm_given_reg_per_thread(&self, reg_per_thread: i64) -> i64 {
        let reg_per_warp = ceil_div(reg_per_thread * self.warp_size, REGISTER_ALLOCATION_GRANULARITY)
            * REGISTER_ALLOCATION_GRANULARITY;
        let warps_per_sm = self.regs_per_multiprocessor / reg_per_warp.max(1);
        warps_per_sm * self.warp_size
    }
}

/// `a / b` rounded up, for positive `b`.
pub fn ceil_div(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}
