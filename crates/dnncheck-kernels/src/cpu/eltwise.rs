//! CPU elementwise kernels.
//!
//! Piecewise-linear functions run in `f32`; transcendental ones are
//! evaluated in `f64` and narrowed once on return.

use dnncheck_common::eltwise::Alg;
use rayon::prelude::*;

use std::f64::consts::{FRAC_1_SQRT_2, PI};

const SQRT_2_OVER_PI: f64 = 0.797_884_560_802_865_4;
const GELU_TANH_FITTING: f64 = 0.044_715;

// ── Individual functions ────────────────────────────────────────────

#[inline]
fn relu(s: f32, alpha: f32) -> f32 {
    if s > 0.0 { s } else { alpha * s }
}

#[inline]
fn bounded_relu(s: f32, alpha: f32) -> f32 {
    let r = relu(s, 0.0);
    if r > alpha { alpha } else { r }
}

#[inline]
fn clip(s: f32, lo: f32, hi: f32) -> f32 {
    if s > hi {
        hi
    } else if s < lo {
        lo
    } else {
        s
    }
}

#[inline]
fn hardswish(s: f32) -> f32 {
    s * (s + 3.0).clamp(0.0, 6.0) / 6.0
}

#[inline]
fn logistic(s: f64) -> f64 {
    1.0 / (1.0 + (-s).exp())
}

/// log(1 + exp(s)) without overflow for large `s`.
#[inline]
fn soft_relu(s: f64) -> f64 {
    if s < f64::from(f32::MAX).ln() { s.exp().ln_1p() } else { s }
}

#[inline]
fn gelu_tanh(s: f64) -> f64 {
    let g = SQRT_2_OVER_PI * s * (1.0 + GELU_TANH_FITTING * s * s);
    0.5 * s * (1.0 + g.tanh())
}

#[inline]
fn gelu_erf(s: f64) -> f64 {
    0.5 * s * (1.0 + libm::erf(s * FRAC_1_SQRT_2))
}

// ── Dispatch ────────────────────────────────────────────────────────

/// Forward value of `alg` at `s`. Destination-based variants compute
/// their base function.
#[inline]
pub fn forward(alg: Alg, s: f32, alpha: f32, beta: f32) -> f32 {
    let x = s as f64;
    match alg.base() {
        Alg::Relu => relu(s, alpha),
        Alg::Square => s * s,
        Alg::Abs => s.abs(),
        Alg::Sqrt => s.sqrt(),
        Alg::Linear => alpha.mul_add(s, beta),
        Alg::BoundedRelu => bounded_relu(s, alpha),
        Alg::Clip => clip(s, alpha, beta),
        Alg::Round => s.round_ties_even(),
        Alg::HardSwish => hardswish(s),
        Alg::Tanh => x.tanh() as f32,
        Alg::Elu => {
            if s > 0.0 {
                s
            } else {
                (alpha as f64 * x.exp_m1()) as f32
            }
        }
        Alg::SoftRelu => soft_relu(x) as f32,
        Alg::Logistic => logistic(x) as f32,
        Alg::Exp => x.exp() as f32,
        Alg::GeluTanh => gelu_tanh(x) as f32,
        Alg::Swish => (x * logistic(alpha as f64 * x)) as f32,
        Alg::Log => x.ln() as f32,
        Alg::Pow => (alpha as f64 * x.powf(beta as f64)) as f32,
        Alg::GeluErf => gelu_erf(x) as f32,
        Alg::LogSigmoid => (-soft_relu(-x)) as f32,
        Alg::Mish => (x * soft_relu(x).tanh()) as f32,
        // base() never returns a *Dst variant
        Alg::ReluDst
        | Alg::TanhDst
        | Alg::EluDst
        | Alg::SqrtDst
        | Alg::LogisticDst
        | Alg::ExpDst => f32::NAN,
    }
}

/// Input gradient of `alg` for output gradient `dd`. `s` is the source
/// value, or the destination value for algorithms where
/// [`Alg::use_dst`] holds.
#[inline]
pub fn backward(alg: Alg, dd: f32, s: f32, alpha: f32, beta: f32) -> f32 {
    let (g, x) = (dd as f64, s as f64);
    let a = alpha as f64;
    match alg {
        Alg::Relu | Alg::ReluDst => {
            if s > 0.0 {
                dd
            } else {
                dd * alpha
            }
        }
        Alg::Square => dd * 2.0 * s,
        Alg::Abs => {
            if s > 0.0 {
                dd
            } else if s < 0.0 {
                -dd
            } else {
                0.0
            }
        }
        Alg::Linear => dd * alpha,
        Alg::BoundedRelu => {
            if s > 0.0 && s <= alpha {
                dd
            } else {
                0.0
            }
        }
        Alg::Clip => {
            if s > alpha && s <= beta {
                dd
            } else {
                0.0
            }
        }
        Alg::Round => 0.0,
        Alg::HardSwish => {
            if s <= -3.0 {
                0.0
            } else if s >= 3.0 {
                dd
            } else {
                (g * (2.0 * x + 3.0) / 6.0) as f32
            }
        }
        Alg::Tanh => {
            let t = x.tanh();
            (g * (1.0 - t) * (1.0 + t)) as f32
        }
        Alg::TanhDst => (g * (1.0 - x) * (1.0 + x)) as f32,
        Alg::Elu => {
            if s > 0.0 {
                dd
            } else {
                (g * a * x.exp()) as f32
            }
        }
        Alg::EluDst => {
            if s > 0.0 {
                dd
            } else {
                (g * (x + a)) as f32
            }
        }
        Alg::Sqrt => (g / (2.0 * x.sqrt())) as f32,
        Alg::SqrtDst => (g / (2.0 * x)) as f32,
        Alg::SoftRelu => (g * logistic(x)) as f32,
        Alg::Logistic => (g * logistic(x) * logistic(-x)) as f32,
        Alg::LogisticDst => (g * x * (1.0 - x)) as f32,
        Alg::Exp => (g * x.exp()) as f32,
        Alg::ExpDst => (g * x) as f32,
        Alg::GeluTanh => {
            let v = (SQRT_2_OVER_PI * x * (1.0 + GELU_TANH_FITTING * x * x)).tanh();
            let dg = SQRT_2_OVER_PI * (1.0 + 3.0 * GELU_TANH_FITTING * x * x);
            (g * 0.5 * (1.0 + v) * (1.0 + x * (1.0 - v) * dg)) as f32
        }
        Alg::Swish => {
            let w = logistic(a * x);
            (g * w * (1.0 + a * x * (1.0 - w))) as f32
        }
        Alg::Log => (g / x) as f32,
        Alg::Pow => {
            if beta == 0.0 {
                0.0
            } else {
                let b = beta as f64;
                (g * a * b * x.powf(b - 1.0)) as f32
            }
        }
        Alg::GeluErf => {
            let cdf = 0.5 * (1.0 + libm::erf(x * FRAC_1_SQRT_2));
            let pdf = (-0.5 * x * x).exp() / (2.0 * PI).sqrt();
            (g * (cdf + x * pdf)) as f32
        }
        Alg::LogSigmoid => (g * logistic(-x)) as f32,
        Alg::Mish => {
            let t = soft_relu(x).tanh();
            (g * (t + x * (1.0 - t * t) * logistic(x))) as f32
        }
    }
}

// ── Slice API ───────────────────────────────────────────────────────

/// Apply `alg` to every element of `src` into `dst`.
pub fn forward_slice(alg: Alg, alpha: f32, beta: f32, src: &[f32], dst: &mut [f32]) {
    dst.par_iter_mut().zip(src.par_iter()).for_each(|(d, &s)| *d = forward(alg, s, alpha, beta));
}

/// Gradient of `alg` for every element. `arg` holds sources or, for
/// destination-based variants, destinations.
pub fn backward_slice(
    alg: Alg,
    alpha: f32,
    beta: f32,
    diff_dst: &[f32],
    arg: &[f32],
    diff_src: &mut [f32],
) {
    diff_src
        .par_iter_mut()
        .zip(diff_dst.par_iter().zip(arg.par_iter()))
        .for_each(|(ds, (&dd, &s))| *ds = backward(alg, dd, s, alpha, beta));
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
        (a - b).abs() <= tol
    }

    fn numerical_derivative(alg: Alg, alpha: f32, beta: f32, x: f32) -> f32 {
        let h = 1e-3f64;
        let f = |v: f64| forward(alg, v as f32, alpha, beta) as f64;
        ((f(x as f64 + h) - f(x as f64 - h)) / (2.0 * h)) as f32
    }

    #[test]
    fn piecewise_linear_values() {
        assert_eq!(forward(Alg::Relu, -2.0, 0.5, 0.0), -1.0);
        assert_eq!(forward(Alg::Relu, 3.0, 0.0, 0.0), 3.0);
        assert_eq!(forward(Alg::BoundedRelu, 7.0, 6.0, 0.0), 6.0);
        assert_eq!(forward(Alg::BoundedRelu, -1.0, 6.0, 0.0), 0.0);
        assert_eq!(forward(Alg::Clip, 5.0, -1.0, 2.0), 2.0);
        assert_eq!(forward(Alg::Clip, -5.0, -1.0, 2.0), -1.0);
        assert_eq!(forward(Alg::Linear, 3.0, 2.0, 1.0), 7.0);
        assert_eq!(forward(Alg::Round, 2.5, 0.0, 0.0), 2.0);
        assert_eq!(forward(Alg::HardSwish, 4.0, 0.0, 0.0), 4.0);
        assert_eq!(forward(Alg::HardSwish, -4.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn transcendental_values() {
        assert!(approx_eq(forward(Alg::Logistic, 0.0, 0.0, 0.0), 0.5, 1e-7));
        assert!(approx_eq(forward(Alg::Tanh, 1.0, 0.0, 0.0), 0.761_594_2, 1e-6));
        assert!(approx_eq(forward(Alg::GeluErf, 1.0, 0.0, 0.0), 0.841_344_7, 1e-6));
        assert!(approx_eq(forward(Alg::GeluTanh, 1.0, 0.0, 0.0), 0.841_192, 1e-5));
        assert!(approx_eq(forward(Alg::SoftRelu, 0.0, 0.0, 0.0), std::f32::consts::LN_2, 1e-7));
        assert_eq!(forward(Alg::SoftRelu, 1e30, 0.0, 0.0), 1e30);
        assert!(approx_eq(forward(Alg::LogSigmoid, 0.0, 0.0, 0.0), -std::f32::consts::LN_2, 1e-7));
        assert!(approx_eq(forward(Alg::Elu, -1.0, 1.0, 0.0), -0.632_120_56, 1e-7));
        assert_eq!(forward(Alg::Pow, 3.0, 2.0, 2.0), 18.0);
    }

    #[test]
    fn dst_variants_share_forward() {
        for alg in Alg::ALL.into_iter().filter(|a| a.use_dst()) {
            let s = 0.75;
            assert_eq!(forward(alg, s, 1.0, 0.0), forward(alg.base(), s, 1.0, 0.0));
        }
    }

    #[test]
    fn smooth_gradients_match_finite_differences() {
        let cases = [
            (Alg::Tanh, 0.0, 0.0),
            (Alg::Elu, 0.7, 0.0),
            (Alg::Square, 0.0, 0.0),
            (Alg::SoftRelu, 0.0, 0.0),
            (Alg::Logistic, 0.0, 0.0),
            (Alg::Exp, 0.0, 0.0),
            (Alg::GeluTanh, 0.0, 0.0),
            (Alg::GeluErf, 0.0, 0.0),
            (Alg::Swish, 1.5, 0.0),
            (Alg::Mish, 0.0, 0.0),
            (Alg::LogSigmoid, 0.0, 0.0),
            (Alg::Pow, 1.5, 3.0),
        ];
        for (alg, alpha, beta) in cases {
            for x in [-1.7f32, -0.4, 0.3, 1.2, 2.5] {
                let analytic = backward(alg, 1.0, x, alpha, beta);
                let numeric = numerical_derivative(alg, alpha, beta, x);
                assert!(approx_eq(analytic, numeric, 1e-2), "{alg} at {x}: {analytic} vs {numeric}");
            }
        }
    }

    #[test]
    fn dst_based_gradients_agree_with_src_based() {
        for alg in Alg::ALL.into_iter().filter(|a| a.use_dst()) {
            let alpha = if alg == Alg::EluDst { 0.5 } else { 0.0 };
            for x in [-1.5f32, -0.25, 0.5, 2.0] {
                let x = if alg == Alg::SqrtDst { x.abs() } else { x };
                let d = forward(alg, x, alpha, 0.0);
                let from_dst = backward(alg, 0.5, d, alpha, 0.0);
                let from_src = backward(alg.base(), 0.5, x, alpha, 0.0);
                assert!(approx_eq(from_dst, from_src, 1e-6), "{alg} at {x}");
            }
        }
    }

    #[test]
    fn slices_apply_elementwise() {
        let src = [-1.0, 0.0, 2.0];
        let mut dst = [0.0; 3];
        forward_slice(Alg::Abs, 0.0, 0.0, &src, &mut dst);
        assert_eq!(dst, [1.0, 0.0, 2.0]);

        let mut ds = [0.0; 3];
        backward_slice(Alg::Abs, 0.0, 0.0, &[1.0; 3], &src, &mut ds);
        assert_eq!(ds, [-1.0, 0.0, 1.0]);
    }
}
