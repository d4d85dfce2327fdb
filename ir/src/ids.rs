//! Integer handles into the [`Fusion`](crate::Fusion) arena tables.

use std::fmt;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $name(pub u32);

        impl $name {
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            pub(crate) fn from_index(index: usize) -> Self {
                Self(index as u32)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

handle!(
    /// Scalar value.
    ValId,
    "v"
);
handle!(
    /// Iteration domain.
    IdId,
    "id"
);
handle!(
    /// Split / merge / resize between iteration domains.
    IdExprId,
    "ie"
);
handle!(
    /// Tensor view.
    TvId,
    "T"
);
handle!(
    /// Tensor expression.
    ExprId,
    "e"
);
