//! Reference elementwise functions in `f64`.

use std::f64::consts::{FRAC_1_SQRT_2, PI};

use dnncheck_common::RefBuffer;
use dnncheck_common::eltwise::{Alg, Problem};

use crate::error::{Result, crit};

const SQRT_2_OVER_PI: f64 = 0.797_884_560_802_865_4;
const GELU_TANH_FITTING: f64 = 0.044_715;

fn sigmoid(s: f64) -> f64 {
    if s >= 0.0 {
        1.0 / (1.0 + (-s).exp())
    } else {
        let e = s.exp();
        e / (1.0 + e)
    }
}

fn soft_relu(s: f64) -> f64 {
    // log1p(exp(s)) equals s to f32 precision past this point.
    if s < (f32::MAX as f64).ln() { s.exp().ln_1p() } else { s }
}

/// Forward function of `alg` at `s`.
pub fn eltwise_fwd(alg: Alg, s: f64, alpha: f64, beta: f64) -> f64 {
    match alg.base() {
        Alg::Relu => {
            if s > 0.0 {
                s
            } else {
                alpha * s
            }
        }
        Alg::Tanh => s.tanh(),
        Alg::Elu => {
            if s > 0.0 {
                s
            } else {
                alpha * s.exp_m1()
            }
        }
        Alg::Square => s * s,
        Alg::Abs => s.abs(),
        Alg::Sqrt => s.sqrt(),
        Alg::Linear => alpha * s + beta,
        Alg::BoundedRelu => s.max(0.0).min(alpha),
        Alg::SoftRelu => soft_relu(s),
        Alg::Logistic => sigmoid(s),
        Alg::Exp => s.exp(),
        Alg::GeluTanh => {
            let u = SQRT_2_OVER_PI * s * (1.0 + GELU_TANH_FITTING * s * s);
            0.5 * s * (1.0 + u.tanh())
        }
        Alg::Swish => s * sigmoid(alpha * s),
        Alg::Log => s.ln(),
        Alg::Clip => s.max(alpha).min(beta),
        Alg::Pow => alpha * s.powf(beta),
        Alg::GeluErf => 0.5 * s * libm::erfc(-s * FRAC_1_SQRT_2),
        Alg::Round => s.round_ties_even(),
        Alg::LogSigmoid => -soft_relu(-s),
        Alg::Mish => s * soft_relu(s).tanh(),
        Alg::HardSwish => s * (s + 3.0).clamp(0.0, 6.0) / 6.0,
        Alg::ReluDst | Alg::TanhDst | Alg::EluDst | Alg::SqrtDst | Alg::LogisticDst | Alg::ExpDst => {
            f64::NAN
        }
    }
}

/// Input gradient of `alg`. `s` is the destination value for algorithms
/// with [`Alg::use_dst`], the source value otherwise.
pub fn eltwise_bwd(alg: Alg, dd: f64, s: f64, alpha: f64, beta: f64) -> f64 {
    match alg {
        Alg::Relu | Alg::ReluDst => {
            if s > 0.0 {
                dd
            } else {
                dd * alpha
            }
        }
        Alg::Tanh => {
            let t = s.tanh();
            dd * (1.0 - t * t)
        }
        Alg::TanhDst => dd * (1.0 - s * s),
        Alg::Elu => {
            if s > 0.0 {
                dd
            } else {
                dd * alpha * s.exp()
            }
        }
        Alg::EluDst => {
            if s > 0.0 {
                dd
            } else {
                dd * (s + alpha)
            }
        }
        Alg::Square => dd * 2.0 * s,
        Alg::Abs => dd * if s > 0.0 { 1.0 } else if s < 0.0 { -1.0 } else { 0.0 },
        Alg::Sqrt => dd / (2.0 * s.sqrt()),
        Alg::SqrtDst => dd / (2.0 * s),
        Alg::Linear => dd * alpha,
        Alg::BoundedRelu => {
            if s > 0.0 && s <= alpha {
                dd
            } else {
                0.0
            }
        }
        Alg::SoftRelu => dd * sigmoid(s),
        Alg::Logistic => {
            let w = sigmoid(s);
            dd * w * (1.0 - w)
        }
        Alg::LogisticDst => dd * s * (1.0 - s),
        Alg::Exp => dd * s.exp(),
        Alg::ExpDst => dd * s,
        Alg::GeluTanh => {
            let u = SQRT_2_OVER_PI * s * (1.0 + GELU_TANH_FITTING * s * s);
            let du = SQRT_2_OVER_PI * (1.0 + 3.0 * GELU_TANH_FITTING * s * s);
            let t = u.tanh();
            dd * 0.5 * ((1.0 + t) + s * (1.0 - t * t) * du)
        }
        Alg::Swish => {
            let w = sigmoid(alpha * s);
            dd * (w + alpha * s * w * (1.0 - w))
        }
        Alg::Log => dd / s,
        Alg::Clip => {
            if s > alpha && s <= beta {
                dd
            } else {
                0.0
            }
        }
        Alg::Pow => {
            if beta == 0.0 {
                0.0
            } else {
                dd * alpha * beta * s.powf(beta - 1.0)
            }
        }
        Alg::GeluErf => {
            let cdf = 0.5 * libm::erfc(-s * FRAC_1_SQRT_2);
            let pdf = (-0.5 * s * s).exp() / (2.0 * PI).sqrt();
            dd * (cdf + s * pdf)
        }
        Alg::Round => 0.0,
        Alg::LogSigmoid => dd * sigmoid(-s),
        Alg::Mish => {
            let t = soft_relu(s).tanh();
            dd * (t + s * (1.0 - t * t) * sigmoid(s))
        }
        Alg::HardSwish => {
            if s <= -3.0 {
                0.0
            } else if s >= 3.0 {
                dd
            } else {
                dd * (2.0 * s + 3.0) / 6.0
            }
        }
    }
}

/// Forward reference. The binary post-op, when present, adds `src1` to the
/// function value after it was narrowed to `f32`.
pub fn compute_ref_fwd(prb: &Problem, src: &RefBuffer, src1: Option<&RefBuffer>) -> Result<RefBuffer> {
    if src.nelems() != prb.nelems() {
        return Err(crit("eltwise reference", format!("src holds {} values, expected {}", src.nelems(), prb.nelems())));
    }
    let src1 = match (prb.binary_index(), src1) {
        (Some(_), Some(s1)) if s1.nelems() == prb.nelems() => Some(s1.as_slice()),
        (Some(_), _) => return Err(crit("eltwise reference", "binary post-op without a matching src1")),
        (None, _) => None,
    };

    let (alpha, beta) = (prb.alpha as f64, prb.beta as f64);
    let mut dst = RefBuffer::new(&prb.dims);
    for (idx, (d, &s)) in dst.as_mut_slice().iter_mut().zip(src.as_slice()).enumerate() {
        let v = eltwise_fwd(prb.alg, s as f64, alpha, beta) as f32;
        *d = match src1 {
            Some(s1) => (v as f64 + s1[idx] as f64) as f32,
            None => v,
        };
    }
    Ok(dst)
}

/// Backward reference over `arg` (sources, or destinations for `*_dst`
/// algorithms) and the output gradient.
pub fn compute_ref_bwd(prb: &Problem, arg: &RefBuffer, d_dst: &RefBuffer) -> Result<RefBuffer> {
    if arg.nelems() != prb.nelems() || d_dst.nelems() != prb.nelems() {
        return Err(crit("eltwise reference", format!("buffer sizes do not match {}", prb.repro())));
    }
    let (alpha, beta) = (prb.alpha as f64, prb.beta as f64);
    let mut d_src = RefBuffer::new(&prb.dims);
    for ((ds, &s), &dd) in d_src.as_mut_slice().iter_mut().zip(arg.as_slice()).zip(d_dst.as_slice()) {
        *ds = eltwise_bwd(prb.alg, dd as f64, s as f64, alpha, beta) as f32;
    }
    Ok(d_src)
}
