use bon::bon;
use snafu::ensure;

use crate::error::{InvalidPropertySnafu, Result};
use crate::occupancy::BYTES_PER_REGISTER;

/// Capability values of the device a kernel is lowered for.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceProperties {
    pub name: String,
    pub warp_size: i64,
    pub multiprocessor_count: i64,
    pub max_threads_per_block: i64,
    pub max_threads_per_multiprocessor: i64,
    /// 32-bit registers available on one SM.
    pub regs_per_multiprocessor: i64,
    /// Opt-in shared memory per block, in bytes.
    pub shared_mem_per_block_optin: i64,
    /// Shared memory per SM, in bytes.
    pub shared_mem_per_multiprocessor: i64,
    /// Shared memory the driver reserves for every resident block.
    pub reserved_shared_mem_per_block: i64,
    /// L2 cache size, in bytes.
    pub l2_cache_size: i64,
}

#[bon]
impl DeviceProperties {
    /// Build a descriptor, validating the values the heuristics divide by.
    #[builder(finish_fn = build)]
    pub fn builder(
        #[builder(default = String::from("custom"), into)] name: String,
        #[builder(default = 32)] warp_size: i64,
        multiprocessor_count: i64,
        #[builder(default = 1024)] max_threads_per_block: i64,
        #[builder(default = 2048)] max_threads_per_multiprocessor: i64,
        #[builder(default = 65536)] regs_per_multiprocessor: i64,
        #[builder(default = 166912)] shared_mem_per_block_optin: i64,
        #[builder(default = 167936)] shared_mem_per_multiprocessor: i64,
        #[builder(default = 1024)] reserved_shared_mem_per_block: i64,
        #[builder(default = 40 * 1024 * 1024)] l2_cache_size: i64,
    ) -> Result<Self> {
        ensure!(
            warp_size > 0 && (warp_size & (warp_size - 1)) == 0,
            InvalidPropertySnafu { property: "warp_size", value: warp_size, reason: "must be a power of two" }
        );
        ensure!(
            multiprocessor_count > 0,
            InvalidPropertySnafu { property: "multiprocessor_count", value: multiprocessor_count, reason: "must be positive" }
        );
        ensure!(
            max_threads_per_block >= warp_size && max_threads_per_block % warp_size == 0,
            InvalidPropertySnafu {
                property: "max_threads_per_block",
                value: max_threads_per_block,
                reason: "must be a positive multiple of the warp size"
            }
        );
        ensure!(
            max_threads_per_multiprocessor >= max_threads_per_block,
            InvalidPropertySnafu {
                property: "max_threads_per_multiprocessor",
                value: max_threads_per_multiprocessor,
                reason: "must hold at least one full block"
            }
        );
        ensure!(
            regs_per_multiprocessor > 0,
            InvalidPropertySnafu { property: "regs_per_multiprocessor", value: regs_per_multiprocessor, reason: "must be positive" }
        );
        ensure!(
            shared_mem_per_block_optin >= 0 && reserved_shared_mem_per_block >= 0,
            InvalidPropertySnafu {
                property: "shared_mem_per_block_optin",
                value: shared_mem_per_block_optin,
                reason: "shared memory sizes cannot be negative"
            }
        );
        tracing::debug!(%name, warp_size, multiprocessor_count, regs_per_multiprocessor, "device properties");

        Ok(Self {
            name,
            warp_size,
            multiprocessor_count,
            max_threads_per_block,
            max_threads_per_multiprocessor,
            regs_per_multiprocessor,
            shared_mem_per_block_optin,
            shared_mem_per_multiprocessor,
            reserved_shared_mem_per_block,
            l2_cache_size,
        })
    }
}

impl DeviceProperties {
    /// Ampere A100 (SXM, 108 SMs).
    pub fn a100() -> Self {
        Self {
            name: "A100".into(),
            warp_size: 32,
            multiprocessor_count: 108,
            max_threads_per_block: 1024,
            max_threads_per_multiprocessor: 2048,
            regs_per_multiprocessor: 65536,
            shared_mem_per_block_optin: 166912,
            shared_mem_per_multiprocessor: 167936,
            reserved_shared_mem_per_block: 1024,
            l2_cache_size: 40 * 1024 * 1024,
        }
    }

    /// Hopper H100 (SXM, 132 SMs).
    pub fn h100() -> Self {
        Self {
            name: "H100".into(),
            warp_size: 32,
            multiprocessor_count: 132,
            max_threads_per_block: 1024,
            max_threads_per_multiprocessor: 2048,
            regs_per_multiprocessor: 65536,
            shared_mem_per_block_optin: 232448,
            shared_mem_per_multiprocessor: 233472,
            reserved_shared_mem_per_block: 1024,
            l2_cache_size: 50 * 1024 * 1024,
        }
    }

    /// Whole register file of one SM, in bytes.
    pub fn register_file_size_full(&self) -> i64 {
        self.regs_per_multiprocessor * BYTES_PER_REGISTER
    }

    /// Register budget persistent buffers may use: half the register file, the rest is left
    /// for everything else the kernel keeps live.
    pub fn register_file_size(&self) -> i64 {
        self.register_file_size_full() / 2
    }

    pub fn max_warps_per_multiprocessor(&self) -> i64 {
        self.max_threads_per_multiprocessor / self.warp_size
    }

    /// Shared memory one block can use after the driver reservation.
    pub fn available_shared_memory_per_block(&self) -> i64 {
        (self.shared_mem_per_block_optin - self.reserved_shared_mem_per_block).max(0)
    }
}
