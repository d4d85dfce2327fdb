use std::str::FromStr;

use proptest::prelude::*;
use test_case::test_case;

use crate::test::generators::data_type;
use crate::*;

#[test_case(DataType::Bool, 1)]
#[test_case(DataType::Float16, 2)]
#[test_case(DataType::BFloat16, 2)]
#[test_case(DataType::Float32, 4)]
#[test_case(DataType::Float64, 8)]
#[test_case(DataType::Int32, 4)]
fn byte_width(dtype: DataType, bytes: usize) {
    assert_eq!(dtype.bytes(), bytes);
}

#[test_case(IndexType::Int32, 4; "narrow index")]
#[test_case(IndexType::Int64, 8; "wide index")]
fn index_width_follows_kernel(index_type: IndexType, bytes: usize) {
    assert_eq!(DataType::Index.bytes_with_index(index_type), bytes);
    assert_eq!(index_type.data_type().bytes(), bytes);
}

#[test]
fn index_type_parses_both_spellings() {
    assert_eq!(IndexType::from_str("32").ok(), Some(IndexType::Int32));
    assert_eq!(IndexType::from_str("int64").ok(), Some(IndexType::Int64));
    assert!(IndexType::from_str("int16").is_err());
}

proptest! {
    #[test]
    fn categories_are_disjoint(dtype in data_type()) {
        let categories = [dtype.is_bool(), dtype.is_int(), dtype.is_float()];
        prop_assert_eq!(categories.iter().filter(|c| **c).count(), 1);
    }
}
