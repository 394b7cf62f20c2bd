//! Core enumerations: data types, propagation directions, normalization
//! flags, check algorithms, bench modes and data kinds.

use std::fmt;
use std::str::FromStr;

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use crate::error::{DnnCheckError, Result};

// ── Data types ─────────────────────────────────────────────────────

/// Element data type of a working-precision buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    F32,
    Bf16,
    F16,
    S32,
    S8,
    U8,
}

impl DataType {
    pub const ALL: [DataType; 6] =
        [DataType::F32, DataType::Bf16, DataType::F16, DataType::S32, DataType::S8, DataType::U8];

    /// Number of significant binary digits, including the implicit bit for
    /// floating types.
    pub const fn digits(self) -> u32 {
        match self {
            DataType::F32 => 24,
            DataType::Bf16 => 8,
            DataType::F16 => 11,
            DataType::S32 => 31,
            DataType::S8 => 7,
            DataType::U8 => 8,
        }
    }

    /// Machine epsilon; zero for integral types.
    pub fn epsilon(self) -> f32 {
        match self {
            DataType::F32 => f32::EPSILON,
            DataType::Bf16 => bf16::EPSILON.to_f32(),
            DataType::F16 => f16::EPSILON.to_f32(),
            DataType::S32 | DataType::S8 | DataType::U8 => 0.0,
        }
    }

    pub const fn is_integral(self) -> bool {
        matches!(self, DataType::S32 | DataType::S8 | DataType::U8)
    }

    pub const fn size_of(self) -> usize {
        match self {
            DataType::F32 | DataType::S32 => 4,
            DataType::Bf16 | DataType::F16 => 2,
            DataType::S8 | DataType::U8 => 1,
        }
    }

    /// Finite `(lowest, highest)` values representable in this type.
    pub fn bounds(self) -> (f32, f32) {
        match self {
            DataType::F32 => (f32::MIN, f32::MAX),
            DataType::Bf16 => (bf16::MIN.to_f32(), bf16::MAX.to_f32()),
            DataType::F16 => (f16::MIN.to_f32(), f16::MAX.to_f32()),
            // Largest f32 strictly below 2^31.
            DataType::S32 => (i32::MIN as f32, 2_147_483_520.0),
            DataType::S8 => (i8::MIN as f32, i8::MAX as f32),
            DataType::U8 => (u8::MIN as f32, u8::MAX as f32),
        }
    }

    /// Round `v` to the nearest value of this type and widen it back.
    ///
    /// Floating types round to nearest even; integral types saturate and
    /// round half to even, mapping NaN to zero.
    pub fn round_to_representable(self, v: f32) -> f32 {
        match self {
            DataType::F32 => v,
            DataType::Bf16 => bf16::from_f32(v).to_f32(),
            DataType::F16 => f16::from_f32(v).to_f32(),
            DataType::S32 | DataType::S8 | DataType::U8 => {
                if v.is_nan() {
                    return 0.0;
                }
                let (lo, hi) = self.bounds();
                v.clamp(lo, hi).round_ties_even()
            }
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::Bf16 => "bf16",
            DataType::F16 => "f16",
            DataType::S32 => "s32",
            DataType::S8 => "s8",
            DataType::U8 => "u8",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = DnnCheckError;

    fn from_str(s: &str) -> Result<Self> {
        DataType::ALL
            .into_iter()
            .find(|dt| dt.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DnnCheckError::parse("data type", s, "expected f32, bf16, f16, s32, s8 or u8"))
    }
}

// ── Direction ──────────────────────────────────────────────────────

/// Propagation kind of a test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Forward training.
    #[serde(rename = "FWD_D")]
    FwdD,
    /// Forward inference.
    #[serde(rename = "FWD_I")]
    FwdI,
    /// Backward by data.
    #[serde(rename = "BWD_D")]
    BwdD,
    /// Backward by data and weights.
    #[serde(rename = "BWD_DW")]
    BwdDw,
}

impl Direction {
    pub const fn is_fwd(self) -> bool {
        matches!(self, Direction::FwdD | Direction::FwdI)
    }

    pub const fn is_inference(self) -> bool {
        matches!(self, Direction::FwdI)
    }

    /// Whether weight gradients (scale/shift) are produced.
    pub const fn has_weights(self) -> bool {
        matches!(self, Direction::BwdDw)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::FwdD => "FWD_D",
            Direction::FwdI => "FWD_I",
            Direction::BwdD => "BWD_D",
            Direction::BwdDw => "BWD_DW",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = DnnCheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FWD_D" | "FWD" | "FWD_B" => Ok(Direction::FwdD),
            "FWD_I" => Ok(Direction::FwdI),
            "BWD_D" | "BWD" => Ok(Direction::BwdD),
            "BWD_DW" => Ok(Direction::BwdDw),
            _ => Err(DnnCheckError::parse("direction", s, "expected FWD_D, FWD_I, BWD_D or BWD_DW")),
        }
    }
}

// ── Normalization flags ────────────────────────────────────────────

/// Normalization flags, spelled as letters on the command line:
/// `G` global stats, `S` combined scale-shift, `C` scale, `H` shift.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormFlags {
    pub global_stats: bool,
    pub scale_shift: bool,
    pub scale: bool,
    pub shift: bool,
}

impl NormFlags {
    pub const NONE: NormFlags =
        NormFlags { global_stats: false, scale_shift: false, scale: false, shift: false };

    pub fn any_affine(&self) -> bool {
        self.scale_shift || self.scale || self.shift
    }
}

impl fmt::Display for NormFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.global_stats {
            f.write_str("G")?;
        }
        if self.scale_shift {
            f.write_str("S")?;
        }
        if self.scale {
            f.write_str("C")?;
        }
        if self.shift {
            f.write_str("H")?;
        }
        Ok(())
    }
}

impl FromStr for NormFlags {
    type Err = DnnCheckError;

    fn from_str(s: &str) -> Result<Self> {
        let mut flags = NormFlags::NONE;
        for ch in s.trim().chars() {
            match ch.to_ascii_uppercase() {
                'G' => flags.global_stats = true,
                'S' => flags.scale_shift = true,
                'C' => flags.scale = true,
                'H' => flags.shift = true,
                other => {
                    return Err(DnnCheckError::parse(
                        "normalization flags",
                        s,
                        format!("unknown flag '{other}', expected a combination of G, S, C, H"),
                    ));
                }
            }
        }
        if flags.scale_shift && (flags.scale || flags.shift) {
            return Err(DnnCheckError::parse(
                "normalization flags",
                s,
                "combined scale-shift (S) cannot be mixed with separate scale (C) or shift (H)",
            ));
        }
        Ok(flags)
    }
}

// ── Check algorithm ────────────────────────────────────────────────

/// Analytic construction used to fill layer-norm forward data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckAlg {
    /// Mean pinned to zero, sparse data.
    #[serde(rename = "ALG_0")]
    Alg0,
    /// Mean set to a per-row power of two, dense data.
    #[serde(rename = "ALG_1")]
    Alg1,
    /// Pick one of the above from the mantissa budget.
    #[default]
    #[serde(rename = "AUTO")]
    Auto,
}

impl CheckAlg {
    pub const fn as_str(self) -> &'static str {
        match self {
            CheckAlg::Alg0 => "ALG_0",
            CheckAlg::Alg1 => "ALG_1",
            CheckAlg::Auto => "AUTO",
        }
    }
}

impl fmt::Display for CheckAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckAlg {
    type Err = DnnCheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALG_0" | "0" => Ok(CheckAlg::Alg0),
            "ALG_1" | "1" => Ok(CheckAlg::Alg1),
            "AUTO" | "ALG_AUTO" => Ok(CheckAlg::Auto),
            _ => Err(DnnCheckError::parse("check algorithm", s, "expected ALG_0, ALG_1 or AUTO")),
        }
    }
}

// ── Bench mode ─────────────────────────────────────────────────────

/// What a run does with each test case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchMode {
    /// Correctness only.
    #[default]
    Corr,
    /// Performance only.
    Perf,
    /// Correctness and performance.
    Both,
    /// Enumerate cases without running them.
    List,
}

impl BenchMode {
    pub const fn checks_correctness(self) -> bool {
        matches!(self, BenchMode::Corr | BenchMode::Both)
    }

    pub const fn measures_perf(self) -> bool {
        matches!(self, BenchMode::Perf | BenchMode::Both)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            BenchMode::Corr => "corr",
            BenchMode::Perf => "perf",
            BenchMode::Both => "both",
            BenchMode::List => "list",
        }
    }
}

impl fmt::Display for BenchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BenchMode {
    type Err = DnnCheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "corr" | "c" => Ok(BenchMode::Corr),
            "perf" | "p" => Ok(BenchMode::Perf),
            "both" | "cp" | "pc" => Ok(BenchMode::Both),
            "list" | "l" => Ok(BenchMode::List),
            _ => Err(DnnCheckError::parse("bench mode", s, "expected corr, perf, both or list")),
        }
    }
}

// ── Data kinds ─────────────────────────────────────────────────────

/// Logical role of a tensor, used for filling seeds and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    Src,
    Src1,
    DiffDst,
    Data,
    Mean,
    Var,
    ScaleShift,
    Scale,
    Shift,
}

impl DataKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            DataKind::Src => "SRC",
            DataKind::Src1 => "SRC_1",
            DataKind::DiffDst => "DIFF_DST",
            DataKind::Data => "DATA",
            DataKind::Mean => "MEAN",
            DataKind::Var => "VAR",
            DataKind::ScaleShift => "SS",
            DataKind::Scale => "SC",
            DataKind::Shift => "SH",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
