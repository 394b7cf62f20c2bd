//! Eltwise data filling.
//!
//! Values come from [`mix`] keyed by the logical index and the data kind:
//! a sprinkling of special values (zeros, small powers of two) over a
//! uniform spread. Every value is rounded to the working type before it is
//! stored, so the reference copy and the working copy hold the same
//! numbers.

use dnncheck_common::eltwise::{Alg, Problem};
use dnncheck_common::{DataKind, DataType, RefBuffer};
use rayon::prelude::*;

use crate::error::{Result, check_len};
use crate::hash::{mix, unit};

const SPECIALS: [f32; 9] = [0.0, 0.5, -0.5, 1.0, -1.0, 2.0, -2.0, 16.0, -16.0];

/// One in this many elements is drawn from [`SPECIALS`].
const SPECIAL_PERIOD: u64 = 8;

fn salt(kind: DataKind) -> u64 {
    match kind {
        DataKind::Src => 0,
        DataKind::DiffDst => 1,
        DataKind::Src1 => 2,
        other => 16 + other as u64,
    }
}

/// Half-width of the uniform spread for `kind`.
fn range(prb: &Problem, kind: DataKind) -> f64 {
    if kind != DataKind::Src {
        return 4.0;
    }
    match prb.alg.base() {
        Alg::Exp | Alg::Pow | Alg::Square => 8.0,
        _ => 16.0,
    }
}

/// Map a raw sample into the domain `alg` is defined on.
fn constrain(alg: Alg, beta: f32, v: f32) -> f32 {
    match alg.base() {
        Alg::Sqrt => v.abs(),
        Alg::Log => {
            let a = v.abs();
            if a == 0.0 { 1.0 } else { a }
        }
        Alg::Pow if beta.fract() != 0.0 => v.abs(),
        _ => v,
    }
}

/// Value of element `idx` for a tensor of role `kind`, already rounded to
/// the tensor's working type `dt`.
pub fn value(prb: &Problem, kind: DataKind, dt: DataType, idx: usize) -> f32 {
    let h = mix(idx as u64, salt(kind));
    let raw = if h % SPECIAL_PERIOD == 0 {
        SPECIALS[((h >> 8) % SPECIALS.len() as u64) as usize]
    } else {
        let r = range(prb, kind);
        ((unit(idx as u64, salt(kind) + 0x100) * 2.0 - 1.0) * r) as f32
    };
    let v = if kind == DataKind::Src { constrain(prb.alg, prb.beta, raw) } else { raw };
    let v = if dt.is_integral() { v.round() } else { v };
    dt.round_to_representable(v)
}

/// Fill `out` with the tensor of role `kind`, rounded to `dt`.
pub fn fill(prb: &Problem, kind: DataKind, dt: DataType, out: &mut RefBuffer) -> Result<()> {
    check_len(kind.as_str(), prb.nelems(), out.nelems())?;
    out.as_mut_slice().par_iter_mut().enumerate().for_each(|(idx, v)| {
        *v = value(prb, kind, dt, idx);
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_representable_in_the_working_type() {
        let prb = Problem::new(vec![4, 64], Alg::Tanh).unwrap().with_dt(DataType::Bf16);
        let mut out = RefBuffer::new(&prb.dims);
        fill(&prb, DataKind::Src, DataType::Bf16, &mut out).unwrap();
        for &v in out.as_slice() {
            assert_eq!(DataType::Bf16.round_to_representable(v), v);
        }
    }

    #[test]
    fn domains_are_respected() {
        let prb = Problem::new(vec![512], Alg::Log).unwrap();
        let mut out = RefBuffer::new(&prb.dims);
        fill(&prb, DataKind::Src, DataType::F32, &mut out).unwrap();
        assert!(out.as_slice().iter().all(|&v| v > 0.0));

        let prb = Problem::new(vec![512], Alg::SqrtDst).unwrap();
        fill(&prb, DataKind::Src, DataType::F32, &mut out).unwrap();
        assert!(out.as_slice().iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn integral_types_get_integers_within_bounds() {
        let prb = Problem::new(vec![256], Alg::Relu).unwrap().with_dt(DataType::U8);
        let mut out = RefBuffer::new(&prb.dims);
        fill(&prb, DataKind::Src, DataType::U8, &mut out).unwrap();
        for &v in out.as_slice() {
            assert_eq!(v.fract(), 0.0);
            assert!((0.0..=255.0).contains(&v));
        }
    }

    #[test]
    fn kinds_differ_and_specials_appear() {
        let prb = Problem::new(vec![1024], Alg::Relu).unwrap();
        let mut src = RefBuffer::new(&prb.dims);
        let mut diff = RefBuffer::new(&prb.dims);
        fill(&prb, DataKind::Src, DataType::F32, &mut src).unwrap();
        fill(&prb, DataKind::DiffDst, DataType::F32, &mut diff).unwrap();
        assert_ne!(src.as_slice(), diff.as_slice());
        assert!(src.as_slice().iter().any(|&v| v == 0.0));
    }
}
