//! Integer helpers and launch limits shared by the heuristics.

pub use tessel_device::ceil_div;

/// Largest grid x dimension a launch accepts.
pub const X_GRID_LIMIT: i64 = (1 << 31) - 1;
/// Largest grid y dimension a launch accepts.
pub const Y_GRID_LIMIT: i64 = 65535;
/// Largest block z dimension a launch accepts.
pub const Z_BLOCK_LIMIT: i64 = 64;
/// Widest global memory access, in bytes.
pub const MAX_VECTOR_BYTES: i64 = 16;

/// `a / b`, never below one.
pub fn safe_div(a: i64, b: i64) -> i64 {
    if b == 0 { 1 } else { (a / b).max(1) }
}

/// Largest power of two not above `n` (one for `n <= 1`).
pub fn last_pow2(n: i64) -> i64 {
    if n <= 1 {
        return 1;
    }
    1 << (63 - n.leading_zeros() as i64)
}

/// Smallest power of two not below `n`.
pub fn round_up_pow2(n: i64) -> i64 {
    let pow2 = last_pow2(n);
    if pow2 < n { pow2 * 2 } else { pow2 }
}

/// The smaller of rounding `n` up to a power of two or up to a multiple of eight.
pub fn round_up_pow2_or_8(n: i64) -> i64 {
    let round_up_8 = if n % 8 == 0 { n } else { n + (8 - n % 8) };
    round_up_pow2(n).min(round_up_8)
}
