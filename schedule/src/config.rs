//! Heuristic configuration.
//!
//! Built explicitly through the bon builder, or from `TESSEL_*` environment variables.

use std::str::FromStr;

use bon::bon;
use derive_more::Display;

// ============================================================================
// VARIANT
// ============================================================================

/// Which register-persistent heuristic handles inner reductions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display)]
#[derive(strum::EnumString, strum::EnumIter, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
#[display(rename_all = "snake_case")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PersistentHeuristicVariant {
    /// Enumerate persistent batch sizes and rank the candidates.
    #[default]
    Search,
    /// Closed-form block sizing, kept for comparison and for non-vectorized problems.
    Legacy,
}

// ============================================================================
// HEURISTIC CONFIG
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeuristicConfig {
    pub variant: PersistentHeuristicVariant,
}

#[bon]
impl HeuristicConfig {
    #[builder(finish_fn = build)]
    pub fn builder(#[builder(default)] variant: PersistentHeuristicVariant) -> Self {
        Self { variant }
    }

    /// Configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `TESSEL_PERSISTENT_HEURISTIC=search|legacy` - Inner persistent heuristic (default `search`)
    pub fn from_env() -> Self {
        let variant = match std::env::var("TESSEL_PERSISTENT_HEURISTIC") {
            Ok(name) => PersistentHeuristicVariant::from_str(name.trim()).unwrap_or_else(|_| {
                tracing::warn!(variant = %name, "unknown persistent heuristic");
                PersistentHeuristicVariant::default()
            }),
            Err(_) => PersistentHeuristicVariant::default(),
        };
        Self { variant }
    }
}
