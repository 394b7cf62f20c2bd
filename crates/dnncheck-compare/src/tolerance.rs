//! Numeric thresholds and zero-trust allowances.
//!
//! Layer-norm thresholds scale with the mantissa gap between `f32` and the
//! working type: `2^(24 - digits) * base`, with a larger base on forward.

use dnncheck_common::eltwise::{self, Alg};
use dnncheck_common::lnorm;
use dnncheck_common::{DataKind, DataType};

/// Percentage of exact-zero reference values tolerated before a
/// comparison is considered unable to tell right from wrong.
pub const DEFAULT_ZERO_TRUST_PERCENT: f32 = 30.0;

const F32_DIGITS: i32 = 24;
const LNORM_FWD_BASE: f32 = 5e-7;
const LNORM_BWD_BASE: f32 = 2e-7;

/// Threshold record for one comparison target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    /// Maximum relative (or, near zero, absolute) difference.
    pub threshold: f32,
    /// At 100 or more the result is never mistrusted.
    pub zero_trust_percent: f32,
    /// Accept every element whatever its difference.
    pub accept_all: bool,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { threshold: 0.0, zero_trust_percent: DEFAULT_ZERO_TRUST_PERCENT, accept_all: false }
    }
}

fn precision_gap(dt: DataType) -> f32 {
    2f32.powi(F32_DIGITS - dt.digits() as i32)
}

// ── Layer normalization ────────────────────────────────────────────

pub fn lnorm_fwd_threshold(dt: DataType) -> f32 {
    precision_gap(dt) * LNORM_FWD_BASE
}

pub fn lnorm_bwd_threshold(dt: DataType) -> f32 {
    precision_gap(dt) * LNORM_BWD_BASE
}

/// Tolerance for one layer-norm output of kind `kind`.
///
/// Statistics must match exactly: the fill makes them exactly computable.
/// Reduced-precision statistics are accepted unchecked.
pub fn lnorm_tolerance(prb: &lnorm::Problem, kind: DataKind) -> Tolerance {
    let low_precision = matches!(prb.dt, DataType::Bf16 | DataType::F16);
    if prb.dir.is_fwd() {
        match kind {
            DataKind::Data => Tolerance {
                threshold: lnorm_fwd_threshold(prb.dt),
                zero_trust_percent: if prb.dt == DataType::Bf16 {
                    100.0
                } else {
                    DEFAULT_ZERO_TRUST_PERCENT
                },
                ..Tolerance::default()
            },
            DataKind::Mean | DataKind::Var if low_precision => {
                Tolerance { zero_trust_percent: 100.0, accept_all: true, ..Tolerance::default() }
            }
            _ => Tolerance::default(),
        }
    } else {
        let threshold = lnorm_bwd_threshold(prb.dt);
        match kind {
            DataKind::Data => Tolerance { threshold, zero_trust_percent: 70.0, ..Tolerance::default() },
            DataKind::ScaleShift | DataKind::Scale | DataKind::Shift => {
                Tolerance { threshold, ..Tolerance::default() }
            }
            _ => Tolerance::default(),
        }
    }
}

// ── Eltwise ────────────────────────────────────────────────────────

/// Algorithms whose implementations legitimately carry more compute error.
fn has_higher_tolerance(prb: &eltwise::Problem) -> bool {
    match prb.alg {
        Alg::GeluTanh
        | Alg::GeluErf
        | Alg::Elu
        | Alg::Swish
        | Alg::Tanh
        | Alg::SoftRelu
        | Alg::Mish
        | Alg::Log
        | Alg::LogSigmoid => true,
        Alg::EluDst | Alg::TanhDst => !prb.is_fwd(),
        _ => false,
    }
}

pub fn eltwise_threshold(prb: &eltwise::Problem) -> f32 {
    match prb.dt {
        DataType::F32 if has_higher_tolerance(prb) => 2e-5,
        DataType::F32 => 4e-6,
        DataType::F16 => 5e-3,
        DataType::Bf16 => 1.6e-2,
        DataType::S32 | DataType::S8 | DataType::U8 => 0.0,
    }
}

/// Degenerate parameterisations produce mostly zeros by design.
pub fn eltwise_zero_trust_percent(prb: &eltwise::Problem) -> f32 {
    let bwd = !prb.is_fwd();
    let degenerate = match prb.alg {
        Alg::Linear => prb.alpha == 0.0,
        Alg::BoundedRelu => prb.alpha == 0.0 || bwd,
        Alg::Clip => (prb.alpha == 0.0 && prb.beta == 0.0) || bwd,
        Alg::Pow => prb.alpha == 0.0 || (bwd && prb.beta == 0.0),
        _ => false,
    };
    if degenerate || prb.dt.is_integral() { 100.0 } else { 65.0 }
}

pub fn eltwise_tolerance(prb: &eltwise::Problem) -> Tolerance {
    Tolerance {
        threshold: eltwise_threshold(prb),
        zero_trust_percent: eltwise_zero_trust_percent(prb),
        ..Tolerance::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dnncheck_common::Direction;

    #[test]
    fn lnorm_thresholds_scale_with_precision_gap() {
        assert_eq!(lnorm_fwd_threshold(DataType::F32), 5e-7);
        assert_eq!(lnorm_fwd_threshold(DataType::Bf16), 65536.0 * 5e-7);
        assert_eq!(lnorm_bwd_threshold(DataType::F16), 8192.0 * 2e-7);
    }

    #[test]
    fn bf16_statistics_are_accepted_unchecked() {
        let prb = lnorm::Problem::new(vec![2, 1000]).unwrap().with_dt(DataType::Bf16);
        assert!(lnorm_tolerance(&prb, DataKind::Mean).accept_all);
        assert!(lnorm_tolerance(&prb, DataKind::Var).accept_all);
        let data = lnorm_tolerance(&prb, DataKind::Data);
        assert_eq!(data.zero_trust_percent, 100.0);
        assert!(!data.accept_all);

        let prb = prb.with_dt(DataType::F32);
        let tol = lnorm_tolerance(&prb, DataKind::Mean);
        assert_eq!(tol, Tolerance { threshold: 0.0, zero_trust_percent: 30.0, accept_all: false });
    }

    #[test]
    fn lnorm_bwd_data_allows_sparse_output() {
        let prb = lnorm::Problem::new(vec![4, 8]).unwrap().with_dir(Direction::BwdDw);
        assert_eq!(lnorm_tolerance(&prb, DataKind::Data).zero_trust_percent, 70.0);
        assert_eq!(lnorm_tolerance(&prb, DataKind::Scale).threshold, 2e-7);
    }

    #[test]
    fn eltwise_thresholds_by_type_and_alg() {
        let prb = eltwise::Problem::new(vec![8], Alg::Relu).unwrap();
        assert_eq!(eltwise_threshold(&prb), 4e-6);
        let prb = eltwise::Problem::new(vec![8], Alg::GeluErf).unwrap();
        assert_eq!(eltwise_threshold(&prb), 2e-5);
        let prb = prb.with_dt(DataType::Bf16);
        assert_eq!(eltwise_threshold(&prb), 1.6e-2);
        let prb = prb.with_dt(DataType::S8);
        let tol = eltwise_tolerance(&prb);
        assert_eq!(tol, Tolerance { threshold: 0.0, zero_trust_percent: 100.0, accept_all: false });
    }

    #[test]
    fn degenerate_parameters_raise_zero_trust() {
        let prb = eltwise::Problem::new(vec![8], Alg::Linear).unwrap();
        assert_eq!(eltwise_zero_trust_percent(&prb), 100.0);
        let prb = prb.with_alpha_beta(2.0, 1.0);
        assert_eq!(eltwise_zero_trust_percent(&prb), 65.0);
        let prb = eltwise::Problem::new(vec![8], Alg::Clip)
            .unwrap()
            .with_alpha_beta(-1.0, 1.0)
            .with_dir(Direction::BwdD);
        assert_eq!(eltwise_zero_trust_percent(&prb), 100.0);
    }
}
