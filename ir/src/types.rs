use derive_more::Display;
use enumset::EnumSet;

/// Hardware mapping of an iteration domain.
#[derive(Debug, Hash, PartialOrd, Ord, Display, Default)]
#[derive(strum::EnumIter, strum::AsRefStr)]
#[derive(enumset::EnumSetType)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ParallelType {
    BIDz,
    BIDy,
    BIDx,
    TIDz,
    TIDy,
    TIDx,
    Vectorize,
    Unroll,
    Unswitch,
    #[default]
    Serial,
}

pub type ParallelTypeSet = EnumSet<ParallelType>;

impl ParallelType {
    /// Thread and block dimensions, outermost first.
    pub const THREAD_AND_BLOCK: [ParallelType; 6] = [
        ParallelType::BIDz,
        ParallelType::BIDy,
        ParallelType::BIDx,
        ParallelType::TIDz,
        ParallelType::TIDy,
        ParallelType::TIDx,
    ];

    pub fn threads() -> ParallelTypeSet {
        ParallelType::TIDx | ParallelType::TIDy | ParallelType::TIDz
    }

    pub fn blocks() -> ParallelTypeSet {
        ParallelType::BIDx | ParallelType::BIDy | ParallelType::BIDz
    }

    pub const fn is_thread(self) -> bool {
        matches!(self, Self::TIDx | Self::TIDy | Self::TIDz)
    }

    pub const fn is_block(self) -> bool {
        matches!(self, Self::BIDx | Self::BIDy | Self::BIDz)
    }

    pub const fn is_thread_or_block(self) -> bool {
        self.is_thread() || self.is_block()
    }

    /// Whether the loop for this type is replicated or widened at compile time.
    pub const fn is_unrolled(self) -> bool {
        matches!(self, Self::Vectorize | Self::Unroll | Self::Unswitch)
    }

    /// Name of the index variable bound to a thread/block dimension.
    pub const fn index_name(self) -> Option<&'static str> {
        match self {
            Self::BIDx => Some("blockIdx.x"),
            Self::BIDy => Some("blockIdx.y"),
            Self::BIDz => Some("blockIdx.z"),
            Self::TIDx => Some("threadIdx.x"),
            Self::TIDy => Some("threadIdx.y"),
            Self::TIDz => Some("threadIdx.z"),
            _ => None,
        }
    }

    /// Name of the launch dimension of a thread/block type.
    pub const fn dim_name(self) -> Option<&'static str> {
        match self {
            Self::BIDx => Some("gridDim.x"),
            Self::BIDy => Some("gridDim.y"),
            Self::BIDz => Some("gridDim.z"),
            Self::TIDx => Some("blockDim.x"),
            Self::TIDy => Some("blockDim.y"),
            Self::TIDz => Some("blockDim.z"),
            _ => None,
        }
    }
}

/// Role of an iteration domain in its tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IterType {
    #[display("i")]
    Iteration,
    #[display("r")]
    Reduction,
    #[display("b")]
    Broadcast,
}

/// Where a tensor is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MemoryType {
    #[default]
    #[display("l")]
    Local,
    #[display("s")]
    Shared,
    #[display("g")]
    Global,
}
