//! Error types shared across dnncheck crates.

use thiserror::Error;

/// Errors raised while building problems, buffers or configuration.
#[derive(Error, Debug)]
pub enum DnnCheckError {
    #[error("invalid problem: {0}")]
    InvalidProblem(String),

    #[error("failed to parse {what} from {input:?}: {reason}")]
    Parse { what: &'static str, input: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    Shape { expected: Vec<usize>, actual: Vec<usize> },

    #[error("invalid format tag {tag:?} for {ndims}-D tensor")]
    InvalidTag { tag: String, ndims: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DnnCheckError {
    pub(crate) fn parse(what: &'static str, input: &str, reason: impl Into<String>) -> Self {
        Self::Parse { what, input: input.to_string(), reason: reason.into() }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, DnnCheckError>;
