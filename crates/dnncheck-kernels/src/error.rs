//! Engine error types.

use dnncheck_common::DnnCheckError;
use thiserror::Error;

use crate::args::Arg;

/// Failures reported by engines, primitives and graph objects.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine has no implementation for the requested configuration.
    #[error("unimplemented: {what}")]
    Unimplemented { what: String },

    #[error("invalid arguments: {reason}")]
    InvalidArguments { reason: String },

    #[error("missing execution argument {0}")]
    MissingArgument(Arg),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error(transparent)]
    Common(#[from] DnnCheckError),
}

impl EngineError {
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, EngineError::Unimplemented { .. })
    }
}

pub(crate) fn invalid_args(reason: impl Into<String>) -> EngineError {
    EngineError::InvalidArguments { reason: reason.into() }
}

pub(crate) fn unimplemented(what: impl Into<String>) -> EngineError {
    EngineError::Unimplemented { what: what.into() }
}

pub type Result<T> = std::result::Result<T, EngineError>;
