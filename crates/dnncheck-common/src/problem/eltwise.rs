//! Elementwise (activation) problem descriptor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::format_dims;
use crate::error::{DnnCheckError, Result};
use crate::types::{DataType, Direction};

/// Elementwise algorithm kinds. `*Dst` variants compute the same forward
/// function but take the destination instead of the source on backward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alg {
    Relu,
    Tanh,
    Elu,
    Square,
    Abs,
    Sqrt,
    Linear,
    BoundedRelu,
    SoftRelu,
    Logistic,
    Exp,
    GeluTanh,
    Swish,
    Log,
    Clip,
    Pow,
    GeluErf,
    Round,
    LogSigmoid,
    Mish,
    HardSwish,
    ReluDst,
    TanhDst,
    EluDst,
    SqrtDst,
    LogisticDst,
    ExpDst,
}

impl Alg {
    pub const ALL: [Alg; 27] = [
        Alg::Relu,
        Alg::Tanh,
        Alg::Elu,
        Alg::Square,
        Alg::Abs,
        Alg::Sqrt,
        Alg::Linear,
        Alg::BoundedRelu,
        Alg::SoftRelu,
        Alg::Logistic,
        Alg::Exp,
        Alg::GeluTanh,
        Alg::Swish,
        Alg::Log,
        Alg::Clip,
        Alg::Pow,
        Alg::GeluErf,
        Alg::Round,
        Alg::LogSigmoid,
        Alg::Mish,
        Alg::HardSwish,
        Alg::ReluDst,
        Alg::TanhDst,
        Alg::EluDst,
        Alg::SqrtDst,
        Alg::LogisticDst,
        Alg::ExpDst,
    ];

    /// Whether backward is expressed through the destination.
    pub const fn use_dst(self) -> bool {
        matches!(
            self,
            Alg::ReluDst | Alg::TanhDst | Alg::EluDst | Alg::SqrtDst | Alg::LogisticDst | Alg::ExpDst
        )
    }

    /// The source-based algorithm with the same forward function.
    pub const fn base(self) -> Alg {
        match self {
            Alg::ReluDst => Alg::Relu,
            Alg::TanhDst => Alg::Tanh,
            Alg::EluDst => Alg::Elu,
            Alg::SqrtDst => Alg::Sqrt,
            Alg::LogisticDst => Alg::Logistic,
            Alg::ExpDst => Alg::Exp,
            other => other,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Alg::Relu => "relu",
            Alg::Tanh => "tanh",
            Alg::Elu => "elu",
            Alg::Square => "square",
            Alg::Abs => "abs",
            Alg::Sqrt => "sqrt",
            Alg::Linear => "linear",
            Alg::BoundedRelu => "bounded_relu",
            Alg::SoftRelu => "soft_relu",
            Alg::Logistic => "logistic",
            Alg::Exp => "exp",
            Alg::GeluTanh => "gelu_tanh",
            Alg::Swish => "swish",
            Alg::Log => "log",
            Alg::Clip => "clip",
            Alg::Pow => "pow",
            Alg::GeluErf => "gelu_erf",
            Alg::Round => "round",
            Alg::LogSigmoid => "logsigmoid",
            Alg::Mish => "mish",
            Alg::HardSwish => "hardswish",
            Alg::ReluDst => "relu_dst",
            Alg::TanhDst => "tanh_dst",
            Alg::EluDst => "elu_dst",
            Alg::SqrtDst => "sqrt_dst",
            Alg::LogisticDst => "logistic_dst",
            Alg::ExpDst => "exp_dst",
        }
    }
}

impl fmt::Display for Alg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Alg {
    type Err = DnnCheckError;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_ascii_lowercase();
        let key = match key.as_str() {
            "brelu" => "bounded_relu",
            "srelu" => "soft_relu",
            "gelu" => "gelu_tanh",
            "sigmoid" => "logistic",
            other => other,
        };
        Alg::ALL
            .into_iter()
            .find(|alg| alg.as_str() == key)
            .ok_or_else(|| DnnCheckError::parse("eltwise algorithm", s, "unknown algorithm"))
    }
}

/// Operation fused after the elementwise function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostOp {
    /// `dst = f(src) + src1`, with `src1` stored in `dt`.
    BinaryAdd { dt: DataType },
}

/// One elementwise test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub dims: Vec<usize>,
    pub dt: DataType,
    pub tag: String,
    pub dir: Direction,
    pub alg: Alg,
    pub alpha: f32,
    pub beta: f32,
    pub inplace: bool,
    pub post_ops: Vec<PostOp>,
}

impl Problem {
    pub fn new(dims: Vec<usize>, alg: Alg) -> Result<Self> {
        if dims.is_empty() {
            return Err(DnnCheckError::InvalidProblem("eltwise needs at least 1 dim".into()));
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
            dir: Direction::FwdD,
            alg,
            alpha: 0.0,
            beta: 0.0,
            inplace: false,
            post_ops: Vec::new(),
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

    pub fn with_alpha_beta(mut self, alpha: f32, beta: f32) -> Self {
        self.alpha = alpha;
        self.beta = beta;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_inplace(mut self, inplace: bool) -> Self {
        self.inplace = inplace;
        self
    }

    pub fn with_post_op(mut self, post_op: PostOp) -> Self {
        self.post_ops.push(post_op);
        self
    }

    pub fn nelems(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_fwd(&self) -> bool {
        self.dir.is_fwd()
    }

    pub fn use_dst(&self) -> bool {
        self.alg.use_dst()
    }

    /// Position of the first binary post-op, if any.
    pub fn binary_index(&self) -> Option<usize> {
        self.post_ops.iter().position(|po| matches!(po, PostOp::BinaryAdd { .. }))
    }

    pub fn repro(&self) -> String {
        let mut s = format!("--dir={} --dt={} --tag={} --alg={}", self.dir, self.dt, self.tag, self.alg);
        if self.alpha != 0.0 {
            s.push_str(&format!(" --alpha={}", self.alpha));
        }
        if self.beta != 0.0 {
            s.push_str(&format!(" --beta={}", self.beta));
        }
        if self.inplace {
            s.push_str(" --inplace");
        }
        for po in &self.post_ops {
            match po {
                PostOp::BinaryAdd { dt } => s.push_str(&format!(" --binary-add={dt}")),
            }
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
    fn alg_names_round_trip() {
        for alg in Alg::ALL {
            assert_eq!(alg.as_str().parse::<Alg>().unwrap(), alg);
        }
        assert_eq!("srelu".parse::<Alg>().unwrap(), Alg::SoftRelu);
        assert!("softmax".parse::<Alg>().is_err());
    }

    #[test]
    fn dst_variants_map_to_base() {
        for alg in Alg::ALL {
            if alg.use_dst() {
                assert!(!alg.base().use_dst());
                assert_ne!(alg.base(), alg);
            } else {
                assert_eq!(alg.base(), alg);
            }
        }
    }

    #[test]
    fn binary_index_finds_post_op() {
        let prb = Problem::new(vec![8], Alg::Relu).unwrap();
        assert_eq!(prb.binary_index(), None);
        let prb = prb.with_post_op(PostOp::BinaryAdd { dt: DataType::F32 });
        assert_eq!(prb.binary_index(), Some(0));
        assert!(prb.repro().contains("--binary-add=f32"));
    }
}
