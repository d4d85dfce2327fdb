use std::str::FromStr;

use strum::IntoEnumIterator;

use crate::config::*;

#[test]
fn test_variant_names() {
    for variant in PersistentHeuristicVariant::iter() {
        assert_eq!(PersistentHeuristicVariant::from_str(&variant.to_string()).unwrap(), variant);
    }
    assert_eq!(PersistentHeuristicVariant::Legacy.as_ref(), "legacy");
    assert!(PersistentHeuristicVariant::from_str("fastest").is_err());
}

#[test]
fn test_builder_defaults() {
    let config = HeuristicConfig::builder().build();
    assert_eq!(config, HeuristicConfig::default());
    assert_eq!(config.variant, PersistentHeuristicVariant::Search);

    let config = HeuristicConfig::builder().variant(PersistentHeuristicVariant::Legacy).build();
    assert_eq!(config.variant, PersistentHeuristicVariant::Legacy);
}
