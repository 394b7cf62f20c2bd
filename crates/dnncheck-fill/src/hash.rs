//! Stateless index hashing.
//!
//! None of these functions carry state between calls: the same arguments
//! always give the same answer on every platform.

const BIG_PRIME: u64 = 1_000_003;
const PRIME: u64 = 753_737;

/// Index-keyed coin flip that comes up `true` for roughly `probability` of
/// all seeds.
#[inline]
pub fn flip_coin(seed: u64, probability: f32) -> bool {
    let seed = seed.wrapping_mul(PRIME);
    ((seed % BIG_PRIME) as f32) < probability * BIG_PRIME as f32
}

/// SplitMix64 finalizer over `index` perturbed by `salt`.
#[inline]
pub const fn mix(index: u64, salt: u64) -> u64 {
    let mut z = index
        .wrapping_add(salt.wrapping_mul(0x9e37_79b9_7f4a_7c15))
        .wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Uniform value in `[0, 1)` derived from [`mix`].
#[inline]
pub fn unit(index: u64, salt: u64) -> f64 {
    (mix(index, salt) >> 11) as f64 / (1u64 << 53) as f64
}

/// Keep the top `digits` significant bits of `x`, clearing the rest of the
/// mantissa (round toward zero).
#[inline]
pub fn truncate_mantissa(x: f32, digits: u32) -> f32 {
    if digits >= 24 || !x.is_finite() {
        return x;
    }
    let drop = 24 - digits.max(1);
    f32::from_bits(x.to_bits() & !((1u32 << drop) - 1))
}
