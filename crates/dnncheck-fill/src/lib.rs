//! Deterministic data generation for dnncheck.
//!
//! Every generator here is a pure function of the problem descriptor and
//! of index-keyed hashing. Layer-normalization data is constructed so that
//! row statistics and gradient accumulations are exactly representable and
//! independent of summation order; eltwise data covers each algorithm's
//! interesting regions while staying representable in the working type.

pub mod eltwise;
pub mod error;
pub mod hash;
pub mod lnorm;

pub use error::{FillError, Result};
pub use hash::{flip_coin, mix, truncate_mantissa};
