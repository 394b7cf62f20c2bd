//! Test-case drivers for dnncheck.
//!
//! Each driver exposes `run(ctx, prb) -> TestResult` and the underlying
//! `doit`, which walks one problem through listing, skip checks, primitive
//! creation, data generation, execution, reference computation and
//! comparison. Outcomes such as SKIPPED or MISTRUSTED are recorded in the
//! [`TestResult`](dnncheck_common::TestResult); only unexpected
//! collaborator failures surface as [`DriverError`].

pub mod context;
pub mod eltwise;
pub mod error;
pub mod lnorm;
pub mod perf;
pub mod skip;
pub mod warn_once;

pub use context::BenchContext;
pub use error::{DriverError, Result};
pub use perf::measure_perf;
