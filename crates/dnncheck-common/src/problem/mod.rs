//! Problem descriptors: immutable descriptions of a single test case.

pub mod eltwise;
pub mod lnorm;

use crate::error::{DnnCheckError, Result};

/// Parse a dims string such as `2x3x4` into a vector of sizes.
pub fn parse_dims(s: &str) -> Result<Vec<usize>> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(DnnCheckError::parse("dims", s, "empty"));
    }
    trimmed
        .split('x')
        .map(|part| {
            part.parse::<usize>()
                .map_err(|e| DnnCheckError::parse("dims", s, format!("bad dimension {part:?}: {e}")))
        })
        .collect()
}

pub(crate) fn format_dims(dims: &[usize]) -> String {
    dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("x")
}
