//! Scheduling decisions produced by the heuristics.

use std::fmt;

use derive_more::Display;
use tessel_dtype::IndexType;
use tessel_ir::ParallelType;

/// Which heuristic produced a [`ReductionParams`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PersistentHeuristicKind {
    #[display("inner persistent search")]
    Search,
    #[display("inner shared memory persistent")]
    SharedMemory,
    #[display("inner persistent")]
    Legacy,
}

/// Launch dimensions fixed by the heuristic; `None` leaves the dimension to be inferred from the
/// scheduled fusion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LaunchParams {
    pub gdimx: Option<i64>,
    pub gdimy: Option<i64>,
    pub gdimz: Option<i64>,
    pub bdimx: Option<i64>,
    pub bdimy: Option<i64>,
    pub bdimz: Option<i64>,
}

/// How a persistent reduction is split across the launch.
///
/// The inner reduction dimension is covered by `unroll_factor_inner_reduction` (vectorized when
/// `vectorize_inner_reduction`), `batches_per_block_inner_reduction` persistent batches and
/// `block_dim_inner_reduction` threads. The iteration dimension goes to `block_dim_iter_dom`
/// when a block handles several rows and to `grid_dim_iter_dom` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReductionParams {
    pub heuristic: PersistentHeuristicKind,
    pub persistent_kernel: bool,
    pub fastest_dim: bool,
    pub project_persistent_buffers: bool,
    pub shared_mem_persistent_buffer: bool,
    pub index_type: IndexType,
    /// Register cap handed to the device compiler.
    pub max_register_count: Option<i64>,

    pub cross_block_inner_reduction: bool,
    pub block_dim_inner_reduction: Option<ParallelType>,
    pub pad_inner_reduction_to_warp: bool,
    pub batches_per_block_inner_reduction: i64,
    pub unroll_factor_inner_reduction: i64,
    pub vectorize_inner_reduction: bool,

    pub multiple_reds_per_blk: bool,
    pub block_dim_iter_dom: Option<ParallelType>,
    pub grid_dim_iter_dom: Option<ParallelType>,
    pub split_grid_dim_iter_dom_outer: bool,
    pub unroll_factor_iter_dom: i64,

    pub schedule_3d: bool,
    pub batches_per_block_outer_reduction: i64,
    pub block_dim_outer_reduction: Option<ParallelType>,
    pub cross_block_outer_reduction: bool,
    pub unroll_factor_outer_reduction: i64,

    pub launch: LaunchParams,
}

impl ReductionParams {
    pub fn new(heuristic: PersistentHeuristicKind, index_type: IndexType) -> Self {
        Self {
            heuristic,
            persistent_kernel: true,
            fastest_dim: true,
            project_persistent_buffers: false,
            shared_mem_persistent_buffer: false,
            index_type,
            max_register_count: None,
            cross_block_inner_reduction: true,
            block_dim_inner_reduction: Some(ParallelType::TIDx),
            pad_inner_reduction_to_warp: false,
            batches_per_block_inner_reduction: 1,
            unroll_factor_inner_reduction: 1,
            vectorize_inner_reduction: false,
            multiple_reds_per_blk: false,
            block_dim_iter_dom: None,
            grid_dim_iter_dom: None,
            split_grid_dim_iter_dom_outer: false,
            unroll_factor_iter_dom: 1,
            schedule_3d: false,
            batches_per_block_outer_reduction: 1,
            block_dim_outer_reduction: None,
            cross_block_outer_reduction: false,
            unroll_factor_outer_reduction: 1,
            launch: LaunchParams::default(),
        }
    }
}

impl fmt::Display for ReductionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (index {})", self.heuristic, self.index_type)?;
        if self.shared_mem_persistent_buffer {
            write!(f, ", shared memory buffers")?;
        }
        if self.project_persistent_buffers {
            write!(f, ", projected to inputs")?;
        }
        if let Some(regs) = self.max_register_count {
            write!(f, ", maxrregcount {regs}")?;
        }
        write!(f, "\n  inner reduction: ")?;
        if self.vectorize_inner_reduction {
            write!(f, "vectorize {}", self.unroll_factor_inner_reduction)?;
        } else {
            write!(f, "unroll {}", self.unroll_factor_inner_reduction)?;
        }
        write!(f, " x persistent batch {}", self.batches_per_block_inner_reduction)?;
        if let Some(pt) = self.block_dim_inner_reduction {
            write!(f, " x {pt}")?;
        }
        if self.pad_inner_reduction_to_warp {
            write!(f, " (warp padded)")?;
        }
        if self.schedule_3d {
            write!(
                f,
                "\n  outer reduction: unroll {} x persistent batch {}",
                self.unroll_factor_outer_reduction, self.batches_per_block_outer_reduction
            )?;
            if let Some(pt) = self.block_dim_outer_reduction {
                write!(f, " x {pt}")?;
            }
        }
        write!(f, "\n  iteration:")?;
        if let Some(pt) = self.block_dim_iter_dom {
            write!(f, " {pt}")?;
        }
        if let Some(pt) = self.grid_dim_iter_dom {
            write!(f, " {pt}")?;
            if self.split_grid_dim_iter_dom_outer {
                write!(f, " (split outer)")?;
            }
        }
        if self.unroll_factor_iter_dom > 1 {
            write!(f, " unroll {}", self.unroll_factor_iter_dom)?;
        }
        Ok(())
    }
}
