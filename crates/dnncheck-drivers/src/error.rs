//! Driver error types.
//!
//! Only unexpected collaborator failures travel as errors; skips,
//! infeasible fills and mismatches are recorded in the test result.

use dnncheck_common::DnnCheckError;
use dnncheck_fill::FillError;
use dnncheck_kernels::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Common(#[from] DnnCheckError),

    /// Buffer-shape misuse of the generator. Infeasible constructions are
    /// recorded as MISTRUSTED instead.
    #[error("fill: {0}")]
    Fill(#[from] FillError),

    #[error("{what} failed: {reason}")]
    Crit { what: &'static str, reason: String },
}

pub(crate) fn crit(what: &'static str, reason: impl Into<String>) -> DriverError {
    DriverError::Crit { what, reason: reason.into() }
}

pub type Result<T> = std::result::Result<T, DriverError>;
