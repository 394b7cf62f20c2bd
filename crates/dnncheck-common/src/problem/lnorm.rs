//! Layer-normalization problem descriptor.

use serde::{Deserialize, Serialize};

use super::format_dims;
use crate::error::{DnnCheckError, Result};
use crate::types::{CheckAlg, DataType, Direction, NormFlags};

/// Default epsilon added to the variance.
pub const DEFAULT_EPS: f32 = 1.0 / 16.0;

/// One layer-normalization test case. The normalized axis is the last
/// logical dimension (`C`); all leading dimensions collapse into `N`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub dims: Vec<usize>,
    pub dt: DataType,
    pub tag: String,
    pub stat_tag: Option<String>,
    pub dir: Direction,
    pub flags: NormFlags,
    pub eps: f32,
    pub check_alg: CheckAlg,
    pub inplace: bool,
}

impl Problem {
    pub fn new(dims: Vec<usize>) -> Result<Self> {
        if dims.len() < 2 {
            return Err(DnnCheckError::InvalidProblem(format!(
                "layer normalization needs at least 2 dims, got {}",
                format_dims(&dims)
            )));
        }
        if dims.contains(&0) {
            return Err(DnnCheckError::InvalidProblem(format!(
                "zero-sized dimension in {}",
                format_dims(&dims)
            )));
        }
        Ok(Self {
            dims,
            dt: DataType::F32,
            tag: "abx".to_string(),
            stat_tag: None,
            dir: Direction::FwdD,
            flags: NormFlags::NONE,
            eps: DEFAULT_EPS,
            check_alg: CheckAlg::Auto,
            inplace: false,
        })
    }

    pub fn with_dt(mut self, dt: DataType) -> Self {
        self.dt = dt;
        self
    }

    pub fn with_dir(mut self, dir: Direction) -> Self {
        self.dir = dir;
        self
    }

    pub fn with_flags(mut self, flags: NormFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_eps(mut self, eps: f32) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_check_alg(mut self, check_alg: CheckAlg) -> Self {
        self.check_alg = check_alg;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_stat_tag(mut self, stat_tag: Option<String>) -> Self {
        self.stat_tag = stat_tag;
        self
    }

    pub fn with_inplace(mut self, inplace: bool) -> Self {
        self.inplace = inplace;
        self
    }

    pub fn ndims(&self) -> usize {
        self.dims.len()
    }

    /// Number of normalized rows.
    pub fn n(&self) -> usize {
        self.dims[..self.dims.len() - 1].iter().product()
    }

    /// Length of each normalized row.
    pub fn c(&self) -> usize {
        self.dims[self.dims.len() - 1]
    }

    pub fn nelems(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn stat_dims(&self) -> &[usize] {
        &self.dims[..self.dims.len() - 1]
    }

    pub fn use_ss(&self) -> bool {
        self.flags.scale_shift
    }

    pub fn use_sc(&self) -> bool {
        self.flags.scale
    }

    pub fn use_sh(&self) -> bool {
        self.flags.shift
    }

    pub fn global_stats(&self) -> bool {
        self.flags.global_stats
    }

    /// Command-line reproducer for this case.
    pub fn repro(&self) -> String {
        let mut s = format!("--dir={} --dt={} --tag={}", self.dir, self.dt, self.tag);
        if let Some(stat_tag) = &self.stat_tag {
            s.push_str(&format!(" --stat-tag={stat_tag}"));
        }
        let flags = self.flags.to_string();
        if !flags.is_empty() {
            s.push_str(&format!(" --flags={flags}"));
        }
        if self.eps != DEFAULT_EPS {
            s.push_str(&format!(" --eps={}", self.eps));
        }
        if self.check_alg != CheckAlg::Auto {
            s.push_str(&format!(" --check-alg={}", self.check_alg));
        }
        if self.inplace {
            s.push_str(" --inplace");
        }
        s.push(' ');
        s.push_str(&format_dims(&self.dims));
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n_collapses_leading_dims() {
        let prb = Problem::new(vec![2, 3, 5]).unwrap();
        assert_eq!(prb.n(), 6);
        assert_eq!(prb.c(), 5);
        assert_eq!(prb.stat_dims(), &[2, 3]);
    }

    #[test]
    fn rejects_degenerate_shapes() {
        assert!(Problem::new(vec![4]).is_err());
        assert!(Problem::new(vec![2, 0]).is_err());
    }

    #[test]
    fn repro_lists_non_default_knobs() {
        let prb = Problem::new(vec![2, 4])
            .unwrap()
            .with_dt(DataType::Bf16)
            .with_dir(Direction::BwdDw)
            .with_flags("CH".parse().unwrap())
            .with_inplace(true);
        assert_eq!(prb.repro(), "--dir=BWD_DW --dt=bf16 --tag=abx --flags=CH --inplace 2x4");
    }
}
