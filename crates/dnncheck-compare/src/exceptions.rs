//! Driver exception predicates.
//!
//! Each builder returns a closure for
//! [`Comparator::with_driver_check`](crate::Comparator::with_driver_check)
//! capturing whatever problem context it needs. They are consulted only for
//! elements that already failed the default check.

use dnncheck_common::eltwise::{self, Alg};
use dnncheck_common::lnorm;

use crate::comparator::CheckArgs;

/// Layer-norm forward: `dst = a * x + b` can lose every meaningful digit
/// when `a * x` and `-b` nearly cancel. When `got` sits far from `b`
/// relative to its own size, judge the `a * x` part by absolute error.
pub fn lnorm_affine_check<'a>(
    prb: &'a lnorm::Problem,
    shift: &'a [f32],
    eps: f32,
) -> impl Fn(&CheckArgs) -> bool + Send + Sync + 'a {
    move |args: &CheckArgs| {
        if !prb.flags.any_affine() {
            return false;
        }
        let c = args.idx % prb.c();
        let beta = shift[c];
        let denom = if args.got.abs() > f32::MIN_POSITIVE { args.got.abs() } else { 1.0 };
        let maybe_cancellation = (args.got - beta).abs() / denom > 1.0;
        if !maybe_cancellation {
            return false;
        }
        let diff_ax = ((args.got - beta) - (args.got + args.diff - beta)).abs();
        diff_ax <= eps
    }
}

/// Whether the input value `s` is in a region where `prb.alg` suffers
/// catastrophic cancellation, so only the absolute error is meaningful.
pub fn check_abs_err(prb: &eltwise::Problem, s: f32, trh: f32) -> bool {
    let approx_machine_eps = 2.0 * f32::EPSILON;
    let comp_err = approx_machine_eps / trh;
    let fwd = prb.is_fwd();
    let bwd = !fwd;

    match prb.alg {
        // exp(s) - 1 for small negative s
        Alg::Elu | Alg::EluDst => fwd && s.is_sign_negative() && (s.exp() - 1.0).abs() <= comp_err,
        Alg::GeluTanh => {
            let sqrt_2_over_pi = 0.797_884_6_f32;
            let fitting_const = 0.044_715_f32;
            let v = (sqrt_2_over_pi * s * (1.0 + fitting_const * s * s)).tanh();
            let dg = sqrt_2_over_pi * (1.0 + 3.0 * fitting_const * s * s);
            if (1.0 + v).abs() <= comp_err {
                return true;
            }
            bwd && s.is_sign_negative() && (1.0 + s * (1.0 - v) * dg).abs() <= 4.0 * comp_err
        }
        Alg::GeluErf => {
            let v = s * std::f32::consts::FRAC_1_SQRT_2;
            if fwd {
                (1.0 + libm::erff(v)).abs() <= comp_err
            } else {
                let two_over_sqrt_pi = std::f32::consts::FRAC_2_SQRT_PI;
                (1.0 + libm::erff(v) + v * two_over_sqrt_pi * (-v * v).exp()).abs() <= 2.0 * comp_err
            }
        }
        // 1 - tanh(s)^2 with tanh(s) close to 1
        Alg::Tanh => bwd && 1.0 - s.abs().tanh() <= comp_err,
        Alg::TanhDst => bwd && 1.0 - s * s <= comp_err,
        // log1p(exp(s)) vanishes quickly for negative s
        Alg::SoftRelu => fwd && s.is_sign_negative() && s.exp().ln_1p() <= 10.0 * comp_err,
        Alg::LogSigmoid => fwd && s.is_sign_positive() && (-s).exp().ln_1p() <= 10.0 * comp_err,
        Alg::Mish => fwd && s.is_sign_negative() && s * s.exp().ln_1p().tanh() <= 10.0 * comp_err,
        Alg::Logistic => bwd && s.is_sign_positive() && 1.0 / (1.0 + s.exp()) <= comp_err,
        Alg::LogisticDst => bwd && 1.0 - s <= comp_err,
        // 1 + W(s) with W(s) close to -1
        Alg::Swish => {
            let alpha_s = prb.alpha * s;
            bwd && alpha_s * (1.0 - 1.0 / (1.0 + (-alpha_s).exp())) <= comp_err
        }
        _ => false,
    }
}

/// Eltwise: accept absolute error near algorithm singularities, and
/// whenever a binary post-op adds its own rounding on top.
pub fn eltwise_check<'a>(
    prb: &'a eltwise::Problem,
    src: &'a [f32],
) -> impl Fn(&CheckArgs) -> bool + Send + Sync + 'a {
    move |args: &CheckArgs| {
        if check_abs_err(prb, src[args.idx], args.trh) {
            return args.diff <= args.trh;
        }
        if prb.binary_index().is_some() {
            return args.diff <= args.trh;
        }
        false
    }
}
