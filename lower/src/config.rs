//! Lowering configuration.
//!
//! Built explicitly through bon builders, or from `TESSEL_*` environment variables.

use std::collections::HashSet;
use std::str::FromStr;

use bon::bon;
use derive_more::Display;
use enumset::{EnumSet, EnumSetType};
use tessel_dtype::IndexType;
use tessel_ir::TvId;

// ============================================================================
// DEBUG DUMPS
// ============================================================================

/// Pipeline stages whose kernel IR can be dumped.
#[derive(Debug, Hash, PartialOrd, Ord, Display, EnumSetType)]
#[derive(strum::EnumString, strum::EnumIter, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[display(rename_all = "snake_case")]
pub enum LowerStage {
    Fusion,
    ExprSort,
    LoopNests,
    Allocation,
    RawSync,
    ReuseMemory,
    WarSync,
    DoubleBuffer,
    LoopRotation,
    Unroll,
    Vectorize,
    Predicates,
    Cleanup,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpConfig {
    pub stages: EnumSet<LowerStage>,
    /// Include predicates and index bindings of every computation.
    pub verbose: bool,
}

impl DumpConfig {
    pub fn all() -> Self {
        Self { stages: EnumSet::all(), verbose: false }
    }

    pub fn enabled(&self, stage: LowerStage) -> bool {
        self.stages.contains(stage)
    }

    /// Parse a comma-separated stage list; `all` selects every stage, unknown names are skipped.
    pub fn parse_stages(list: &str) -> EnumSet<LowerStage> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .fold(EnumSet::empty(), |acc, name| match name {
                "all" => EnumSet::all(),
                _ => match LowerStage::from_str(name) {
                    Ok(stage) => acc | stage,
                    Err(_) => {
                        tracing::warn!(stage = name, "unknown dump stage");
                        acc
                    }
                },
            })
    }
}

// ============================================================================
// LOOP ROTATION
// ============================================================================

/// Rotate the loop materializing `tv.leaf[axis]`, peeling the statements that define the
/// tensors in `selection` into the previous iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopRotation {
    pub tv: TvId,
    pub axis: usize,
    pub selection: HashSet<TvId>,
}

// ============================================================================
// LOWER CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LowerConfig {
    pub index_type: IndexType,
    pub dump: DumpConfig,
    pub loop_rotation: Vec<LoopRotation>,
}

#[bon]
impl LowerConfig {
    #[builder(finish_fn = build)]
    pub fn builder(
        #[builder(default)] index_type: IndexType,
        #[builder(default)] dump: DumpConfig,
        #[builder(default)] loop_rotation: Vec<LoopRotation>,
    ) -> Self {
        Self { index_type, dump, loop_rotation }
    }

    /// Configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `TESSEL_INDEX_TYPE=int32|int64` - Kernel index width (default `int64`)
    /// * `TESSEL_DUMP=all|stage,stage,...` - Stages whose kernel IR is dumped
    /// * `TESSEL_DUMP_VERBOSE=1` - Include predicates and bindings in dumps
    pub fn from_env() -> Self {
        let index_type = std::env::var("TESSEL_INDEX_TYPE").ok().and_then(|s| s.parse().ok()).unwrap_or_default();
        let stages = std::env::var("TESSEL_DUMP").map(|s| DumpConfig::parse_stages(&s)).unwrap_or_default();
        let verbose = std::env::var("TESSEL_DUMP_VERBOSE").is_ok();

        Self { index_type, dump: DumpConfig { stages, verbose }, loop_rotation: Vec::new() }
    }
}
