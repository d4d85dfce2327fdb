use test_case::test_case;

use crate::*;

#[test]
fn builder_defaults_match_ampere() {
    let props = DeviceProperties::builder().name("A100").multiprocessor_count(108).build().unwrap();
    assert_eq!(props, DeviceProperties::a100());
}

#[test_case(DeviceProperties::builder().multiprocessor_count(0).build(), "multiprocessor_count"; "no SMs")]
#[test_case(DeviceProperties::builder().multiprocessor_count(8).warp_size(24).build(), "warp_size"; "odd warp")]
#[test_case(DeviceProperties::builder().multiprocessor_count(8).max_threads_per_block(1000).build(), "max_threads_per_block"; "ragged block")]
fn builder_rejects(result: Result<DeviceProperties>, property: &str) {
    match result {
        Err(Error::InvalidProperty { property: p, .. }) => assert_eq!(p, property),
        other => panic!("expected InvalidProperty, got {other:?}"),
    }
}

#[test]
fn register_budget_is_half_the_file() {
    let props = DeviceProperties::a100();
    assert_eq!(props.register_file_size_full(), 256 * 1024);
    assert_eq!(props.register_file_size(), 128 * 1024);
    assert_eq!(props.max_warps_per_multiprocessor(), 64);
    assert_eq!(props.available_shared_memory_per_block(), 166912 - 1024);
}
