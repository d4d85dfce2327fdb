//! Element data types used by fusion tensors and scalar values.
//!
//! Only the properties the lowering pipeline cares about live here: byte width (allocation
//! sizes, vectorization limits, persistent buffer estimates) and the index width requested for
//! a kernel.

#[cfg(any(test, feature = "proptest"))]
pub mod test;

use derive_more::Display;

/// Element type of a tensor or scalar value.
#[derive(Debug, Hash, PartialOrd, Ord, Display)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray, strum::AsRefStr)]
#[derive(enumset::EnumSetType)]
#[cfg_attr(feature = "proptest", derive(proptest_derive::Arbitrary))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[enumset(repr = "u32")]
pub enum DataType {
    #[display("bool")]
    Bool,
    #[display("int32")]
    Int32,
    #[display("int64")]
    Int64,
    #[display("half")]
    Float16,
    #[display("bfloat16")]
    BFloat16,
    #[display("float")]
    Float32,
    #[display("double")]
    Float64,
    /// Width is decided by the kernel's [`IndexType`].
    #[display("index")]
    Index,
}

impl DataType {
    /// Size in bytes. `Index` is reported at its widest.
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int32 => 4,
            Self::Int64 => 8,
            Self::Float16 | Self::BFloat16 => 2,
            Self::Float32 => 4,
            Self::Float64 => 8,
            Self::Index => 8,
        }
    }

    /// Size in bytes once the kernel index width is known.
    pub const fn bytes_with_index(&self, index_type: IndexType) -> usize {
        match self {
            Self::Index => index_type.bytes(),
            _ => self.bytes(),
        }
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool)
    }

    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int32 | Self::Int64 | Self::Index)
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float16 | Self::BFloat16 | Self::Float32 | Self::Float64)
    }
}

/// Integer width used for indexing inside a generated kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
#[derive(strum::EnumString, strum::AsRefStr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IndexType {
    #[display("int32")]
    #[strum(serialize = "int32", serialize = "32")]
    Int32,
    #[default]
    #[display("int64")]
    #[strum(serialize = "int64", serialize = "64")]
    Int64,
}

impl IndexType {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Int32 => 4,
            Self::Int64 => 8,
        }
    }

    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Int32 => DataType::Int32,
            Self::Int64 => DataType::Int64,
        }
    }
}
