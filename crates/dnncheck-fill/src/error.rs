//! Errors reported by the data generators.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FillError {
    /// No exact construction exists for this size and precision. The case
    /// cannot be trusted, but the primitive under test is not at fault.
    #[error("infeasible fill: {reason}")]
    Infeasible { reason: String },

    #[error("{what} buffer holds {actual} elements, expected {expected}")]
    BufferSize { what: &'static str, expected: usize, actual: usize },
}

impl FillError {
    pub(crate) fn infeasible(reason: impl Into<String>) -> Self {
        Self::Infeasible { reason: reason.into() }
    }
}

pub type Result<T> = std::result::Result<T, FillError>;

pub(crate) fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(FillError::BufferSize { what, expected, actual });
    }
    Ok(())
}
