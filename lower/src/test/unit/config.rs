use enumset::EnumSet;
use tessel_dtype::IndexType;

use crate::config::*;

#[test]
fn test_parse_stages() {
    let stages = DumpConfig::parse_stages("loop_nests, cleanup,bogus");
    assert_eq!(stages, LowerStage::LoopNests | LowerStage::Cleanup);
    assert_eq!(DumpConfig::parse_stages("all"), EnumSet::all());
    assert!(DumpConfig::parse_stages("").is_empty());
}

#[test]
fn test_builder_defaults() {
    let config = LowerConfig::builder().build();
    assert_eq!(config, LowerConfig::default());
    assert!(!config.dump.enabled(LowerStage::Fusion));

    let config = LowerConfig::builder().index_type(IndexType::Int32).dump(DumpConfig::all()).build();
    assert_eq!(config.index_type, IndexType::Int32);
    assert!(config.dump.enabled(LowerStage::Predicates));
}
