use proptest::prelude::*;
use test_case::test_case;

use crate::*;

#[test_case(896, 72)]
#[test_case(1024, 64)]
#[test_case(1216, 48)]
#[test_case(2048, 32)]
#[test_case(32, 255; "capped")]
fn registers_for_threads(threads: i64, registers: i64) {
    assert_eq!(DeviceProperties::a100().reg_per_thread_given_threads_per_sm(threads), registers);
}

#[test_case(32, 2048)]
#[test_case(40, 1632)]
#[test_case(44, 1344)]
#[test_case(52, 1152)]
#[test_case(64, 1024)]
fn threads_for_registers(registers: i64, threads: i64) {
    assert_eq!(DeviceProperties::a100().threads_per_sm_given_reg_per_thread(registers), threads);
}

proptest! {
    #[test]
    fn more_registers_never_add_threads(reg in 1i64..=255) {
        let props = DeviceProperties::a100();
        prop_assert!(props.threads_per_sm_given_reg_per_thread(reg + 1) <= props.threads_per_sm_given_reg_per_thread(reg));
    }

    #[test]
    fn resident_threads_afford_their_registers(reg in 1i64..=MAX_REGISTERS_PER_THREAD) {
        let props = DeviceProperties::a100();
        let threads = props.threads_per_sm_given_reg_per_thread(reg);
        prop_assert!(threads > 0);
        prop_assert!(props.reg_per_thread_given_threads_per_sm(threads) >= reg);
    }
}

#[test_case(14000, 512, 28)]
#[test_case(1024, 32, 32)]
#[test_case(1, 4, 1)]
#[test_case(0, 4, 0)]
fn test_ceil_div(a: i64, b: i64, expected: i64) {
    assert_eq!(ceil_div(a, b), expected);
}
