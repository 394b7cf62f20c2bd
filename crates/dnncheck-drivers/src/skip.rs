//! Skip policy shared by the drivers.

use dnncheck_common::{DataType, Direction, MemoryDesc, SkipReason, TestResult};
use tracing::{debug, info};

use crate::warn_once::warn_non_jit_once;

/// Integral types have no meaningful gradients.
pub fn check_known_skipped_case_common(dts: &[DataType], dir: Direction, res: &mut TestResult) {
    if !dir.is_fwd() && dts.iter().any(|dt| dt.is_integral()) {
        debug!(?dts, %dir, "integral data type on backward");
        res.set_skipped(SkipReason::InvalidCase);
    }
}

/// Whether `impl_name` contains any of the non-empty `patterns`.
pub fn maybe_skip_impl(patterns: &[String], impl_name: &str) -> bool {
    patterns.iter().map(|p| p.trim()).filter(|p| !p.is_empty()).any(|p| impl_name.contains(p))
}

/// Record the implementation and apply the skip list. Returns `true` when
/// the case was skipped.
pub fn check_impl(patterns: &[String], impl_name: &str, res: &mut TestResult) -> bool {
    res.impl_name = impl_name.to_string();
    info!(impl_name, "implementation");
    if maybe_skip_impl(patterns, impl_name) {
        res.set_skipped(SkipReason::SkipImplHit);
        return true;
    }
    if !impl_name.contains("jit") {
        warn_non_jit_once(impl_name);
    }
    false
}

/// Bytes needed to hold every tensor in working precision plus its `f32`
/// reference copy.
pub fn required_bytes<'a>(mds: impl IntoIterator<Item = &'a MemoryDesc>) -> usize {
    mds.into_iter().map(|md| md.size_bytes() + md.nelems() * DataType::F32.size_of()).sum()
}

/// Skip with `NotEnoughRam` when `required` exceeds `limit`. Returns `true`
/// when the case was skipped.
pub fn check_mem_size(limit: Option<usize>, required: usize, res: &mut TestResult) -> bool {
    match limit {
        Some(limit) if required > limit => {
            debug!(required, limit, "case does not fit in memory limit");
            res.set_skipped(SkipReason::NotEnoughRam);
            true
        }
        _ => false,
    }
}
