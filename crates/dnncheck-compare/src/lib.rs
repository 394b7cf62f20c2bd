//! Result verification for dnncheck.
//!
//! [`tolerance`] decides how close is close enough for each data type,
//! algorithm and tensor kind. [`Comparator`] walks a reference buffer and a
//! computed buffer element by element and folds the outcome into the
//! case's [`TestResult`](dnncheck_common::TestResult). Drivers can pass an
//! exception predicate from [`exceptions`] to re-admit mismatches that are
//! explained by catastrophic cancellation.

pub mod comparator;
pub mod exceptions;
pub mod tolerance;

pub use comparator::{CheckArgs, CompareReport, Comparator, DriverCheck, Mismatch};
pub use tolerance::{DEFAULT_ZERO_TRUST_PERCENT, Tolerance};
