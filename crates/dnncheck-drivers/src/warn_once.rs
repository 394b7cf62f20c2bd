//! Advisory for implementations that are not jit kernels, logged once per
//! implementation name for the whole run.

use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

static WARNED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

/// Warn that `impl_name` may differ from the reference beyond rounding.
/// Only the first call for a given name warns; returns whether it did.
pub fn warn_non_jit_once(impl_name: &str) -> bool {
    let warned = WARNED.get_or_init(|| Mutex::new(HashSet::new()));
    let first = match warned.lock() {
        Ok(mut set) => set.insert(impl_name.to_string()),
        Err(poisoned) => poisoned.into_inner().insert(impl_name.to_string()),
    };
    if first {
        tracing::warn!(
            impl_name,
            "implementation is not a jit kernel; results may differ from the reference beyond the usual rounding"
        );
    }
    first
}
