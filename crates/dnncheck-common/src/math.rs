//! Small integer helpers.

/// Ceiling division for unsigned sizes.
#[inline]
pub const fn div_up(a: usize, b: usize) -> usize {
    a.div_ceil(b)
}

/// `ceil(log2(x))`, with `log2_ceil(0) == log2_ceil(1) == 0`.
#[inline]
pub const fn log2_ceil(x: u64) -> u32 {
    if x <= 1 { 0 } else { 64 - (x - 1).leading_zeros() }
}
