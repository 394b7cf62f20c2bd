//! Execution argument binding.

use std::collections::BTreeMap;
use std::fmt;

use dnncheck_common::WorkBuffer;

use crate::error::{EngineError, Result};

/// Role of a buffer bound to a primitive execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arg {
    Src,
    /// Second source of a binary post-op.
    Src1,
    Dst,
    Mean,
    Variance,
    /// Combined `[2, C]` scale and shift.
    ScaleShift,
    Scale,
    Shift,
    DiffDst,
    DiffSrc,
    DiffScaleShift,
    DiffScale,
    DiffShift,
    Scratchpad,
}

impl Arg {
    pub const fn as_str(self) -> &'static str {
        match self {
            Arg::Src => "SRC",
            Arg::Src1 => "SRC_1",
            Arg::Dst => "DST",
            Arg::Mean => "MEAN",
            Arg::Variance => "VARIANCE",
            Arg::ScaleShift => "SCALE_SHIFT",
            Arg::Scale => "SCALE",
            Arg::Shift => "SHIFT",
            Arg::DiffDst => "DIFF_DST",
            Arg::DiffSrc => "DIFF_SRC",
            Arg::DiffScaleShift => "DIFF_SCALE_SHIFT",
            Arg::DiffScale => "DIFF_SCALE",
            Arg::DiffShift => "DIFF_SHIFT",
            Arg::Scratchpad => "SCRATCHPAD",
        }
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Working buffers keyed by their role. The map owns the buffers for the
/// duration of an execution; callers take them back afterwards.
#[derive(Debug, Default, Clone)]
pub struct ExecArgs {
    bufs: BTreeMap<Arg, WorkBuffer>,
}

impl ExecArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `buf` to `arg`, replacing any previous binding.
    pub fn set(&mut self, arg: Arg, buf: WorkBuffer) {
        self.bufs.insert(arg, buf);
    }

    pub fn get(&self, arg: Arg) -> Result<&WorkBuffer> {
        self.bufs.get(&arg).ok_or(EngineError::MissingArgument(arg))
    }

    pub fn get_mut(&mut self, arg: Arg) -> Result<&mut WorkBuffer> {
        self.bufs.get_mut(&arg).ok_or(EngineError::MissingArgument(arg))
    }

    pub fn take(&mut self, arg: Arg) -> Result<WorkBuffer> {
        self.bufs.remove(&arg).ok_or(EngineError::MissingArgument(arg))
    }

    pub fn contains(&self, arg: Arg) -> bool {
        self.bufs.contains_key(&arg)
    }

    pub fn len(&self) -> usize {
        self.bufs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bufs.is_empty()
    }

    /// Bytes held by all bound buffers.
    pub fn size_bytes(&self) -> usize {
        self.bufs.values().map(|b| b.desc().size_bytes()).sum()
    }
}
