//! Common types, traits, and utilities for dnncheck
//!
//! This crate provides the foundational types shared by the generator, the
//! comparator, the engines and the drivers: data types, problem descriptors,
//! memory descriptors with dual-precision buffers, the test-result state
//! machine, configuration and error handling.

pub mod config;
pub mod error;
pub mod math;
pub mod memory;
pub mod problem;
pub mod result;
pub mod types;

pub use config::*;
pub use error::*;
pub use math::{div_up, log2_ceil};
pub use memory::{MemoryDesc, RefBuffer, Storage, WorkBuffer};
pub use problem::{eltwise, lnorm, parse_dims};
pub use result::{PerfTimer, ResState, SkipReason, TestResult};
pub use types::*;
