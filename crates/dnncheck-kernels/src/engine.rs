//! Primitive descriptors and the engine/primitive seams.
//!
//! An [`Engine`] turns a [`PrimitiveDesc`] into a [`Primitive`]; the
//! primitive reports its implementation name and the memory descriptors it
//! expects, and executes over an [`ExecArgs`] binding.

use dnncheck_common::eltwise::{self, Alg, PostOp};
use dnncheck_common::{DataType, Direction, MemoryDesc, NormFlags, lnorm};

use crate::args::{Arg, ExecArgs};
use crate::error::Result;

// ── Propagation kind ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropKind {
    ForwardTraining,
    ForwardInference,
    /// Backward by data and weights.
    Backward,
    BackwardData,
}

impl PropKind {
    pub const fn is_fwd(self) -> bool {
        matches!(self, PropKind::ForwardTraining | PropKind::ForwardInference)
    }
}

impl From<Direction> for PropKind {
    fn from(dir: Direction) -> Self {
        match dir {
            Direction::FwdD => PropKind::ForwardTraining,
            Direction::FwdI => PropKind::ForwardInference,
            Direction::BwdD => PropKind::BackwardData,
            Direction::BwdDw => PropKind::Backward,
        }
    }
}

// ── Descriptors ────────────────────────────────────────────────────

/// Layer normalization over the last logical dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct LnormDesc {
    pub prop: PropKind,
    pub data: MemoryDesc,
    /// Per-row statistics, always `f32`.
    pub stat: MemoryDesc,
    pub eps: f32,
    pub flags: NormFlags,
    pub inplace: bool,
}

impl LnormDesc {
    pub fn from_problem(prb: &lnorm::Problem) -> Result<Self> {
        let data = MemoryDesc::from_tag(&prb.dims, prb.dt, &prb.tag)?;
        let stat_tag = prb.stat_tag.as_deref().unwrap_or("abx");
        let stat = MemoryDesc::from_tag(prb.stat_dims(), DataType::F32, stat_tag)?;
        Ok(Self {
            prop: prb.dir.into(),
            data,
            stat,
            eps: prb.eps,
            flags: prb.flags,
            inplace: prb.inplace,
        })
    }

    /// Forward-training counterpart used as a creation hint for backward.
    pub fn forward_hint(&self) -> Self {
        Self { prop: PropKind::ForwardTraining, inplace: false, ..self.clone() }
    }

    /// Normalized row length.
    pub fn c(&self) -> usize {
        self.data.dims().last().copied().unwrap_or(0)
    }

    /// Number of normalized rows.
    pub fn n(&self) -> usize {
        self.data.nelems().checked_div(self.c()).unwrap_or(0)
    }
}

/// Elementwise function, optionally followed by binary post-ops.
#[derive(Debug, Clone, PartialEq)]
pub struct EltwiseDesc {
    pub prop: PropKind,
    pub alg: Alg,
    pub alpha: f32,
    pub beta: f32,
    pub data: MemoryDesc,
    pub inplace: bool,
    pub post_ops: Vec<PostOp>,
}

impl EltwiseDesc {
    pub fn from_problem(prb: &eltwise::Problem) -> Result<Self> {
        Ok(Self {
            prop: prb.dir.into(),
            alg: prb.alg,
            alpha: prb.alpha,
            beta: prb.beta,
            data: MemoryDesc::from_tag(&prb.dims, prb.dt, &prb.tag)?,
            inplace: prb.inplace,
            post_ops: prb.post_ops.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveDesc {
    Lnorm(LnormDesc),
    Eltwise(EltwiseDesc),
}

impl PrimitiveDesc {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PrimitiveDesc::Lnorm(_) => "layer_normalization",
            PrimitiveDesc::Eltwise(_) => "eltwise",
        }
    }
}

// ── Traits ─────────────────────────────────────────────────────────

/// An executable primitive.
pub trait Primitive: Send + Sync {
    /// Name of the implementation that was selected.
    fn impl_name(&self) -> &str;

    fn desc(&self) -> &PrimitiveDesc;

    /// Memory descriptor expected for `arg`, or `None` if the primitive
    /// does not use it.
    fn query_md(&self, arg: Arg) -> Option<MemoryDesc>;

    /// Run once over the bound buffers.
    fn execute(&self, args: &mut ExecArgs) -> Result<()>;
}

/// Source of primitives.
pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool {
        true
    }

    /// Create a primitive for `desc`. Backward primitives may require a
    /// forward `hint`.
    fn create(&self, desc: &PrimitiveDesc, hint: Option<&dyn Primitive>) -> Result<Box<dyn Primitive>>;
}
