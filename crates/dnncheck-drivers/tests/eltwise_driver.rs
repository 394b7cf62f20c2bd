//! Eltwise cases run end to end on the native engine.

use dnncheck_common::eltwise::{Alg, PostOp, Problem};
use dnncheck_common::{BenchMode, DataType, Direction, HarnessConfig, ResState, SkipReason, TestResult};
use dnncheck_drivers::BenchContext;
use dnncheck_drivers::eltwise;
use proptest::prelude::*;

fn run(prb: &Problem) -> TestResult {
    eltwise::run(&BenchContext::default(), prb)
}

/// Algorithms with parameters that keep their outputs meaningful.
fn cases() -> Vec<(Alg, f32, f32)> {
    vec![
        (Alg::Relu, 0.0, 0.0),
        (Alg::Relu, 0.25, 0.0),
        (Alg::Tanh, 0.0, 0.0),
        (Alg::Elu, 0.5, 0.0),
        (Alg::Square, 0.0, 0.0),
        (Alg::Abs, 0.0, 0.0),
        (Alg::Sqrt, 0.0, 0.0),
        (Alg::Linear, 2.0, -1.0),
        (Alg::BoundedRelu, 6.0, 0.0),
        (Alg::SoftRelu, 0.0, 0.0),
        (Alg::Logistic, 0.0, 0.0),
        (Alg::Exp, 0.0, 0.0),
        (Alg::GeluTanh, 0.0, 0.0),
        (Alg::Swish, 1.0, 0.0),
        (Alg::Log, 0.0, 0.0),
        (Alg::Clip, -2.0, 3.0),
        (Alg::GeluErf, 0.0, 0.0),
        (Alg::LogSigmoid, 0.0, 0.0),
        (Alg::Mish, 0.0, 0.0),
        (Alg::HardSwish, 0.0, 0.0),
        (Alg::ReluDst, 0.0, 0.0),
        (Alg::TanhDst, 0.0, 0.0),
        (Alg::EluDst, 0.5, 0.0),
        (Alg::SqrtDst, 0.0, 0.0),
        (Alg::LogisticDst, 0.0, 0.0),
        (Alg::ExpDst, 0.0, 0.0),
    ]
}

#[test]
fn forward_f32_passes() {
    for (alg, alpha, beta) in cases().into_iter().chain([(Alg::Round, 0.0, 0.0), (Alg::Pow, 1.0, 2.0)]) {
        let prb = Problem::new(vec![8, 64], alg).unwrap().with_alpha_beta(alpha, beta);
        let res = run(&prb);
        assert_eq!(res.state, ResState::Passed, "{}: {:?}", prb.repro(), res);
        assert_eq!(res.total, 8 * 64);
        assert_eq!(res.impl_name, "ref:native");
    }
}

#[test]
fn backward_f32_passes() {
    for (alg, alpha, beta) in cases() {
        let prb = Problem::new(vec![8, 64], alg).unwrap().with_alpha_beta(alpha, beta).with_dir(Direction::BwdD);
        let res = run(&prb);
        assert_eq!(res.state, ResState::Passed, "{}: {:?}", prb.repro(), res);
    }
}

#[test]
fn bf16_passes_both_ways() {
    for alg in [Alg::Relu, Alg::Tanh, Alg::Logistic, Alg::GeluErf, Alg::Square, Alg::LogisticDst] {
        for dir in [Direction::FwdD, Direction::BwdD] {
            let prb = Problem::new(vec![4, 32], alg).unwrap().with_dt(DataType::Bf16).with_dir(dir);
            let res = run(&prb);
            assert_eq!(res.state, ResState::Passed, "{}: {:?}", prb.repro(), res);
        }
    }
}

#[test]
fn integral_forward_passes_and_backward_is_invalid() {
    for dt in [DataType::S8, DataType::U8, DataType::S32] {
        for alg in [Alg::Relu, Alg::Abs] {
            let prb = Problem::new(vec![256], alg).unwrap().with_dt(dt);
            assert_eq!(run(&prb).state, ResState::Passed, "{}", prb.repro());
        }
    }

    let prb = Problem::new(vec![256], Alg::Relu).unwrap().with_dt(DataType::S8).with_dir(Direction::BwdD);
    let res = run(&prb);
    assert_eq!(res.state, ResState::Skipped);
    assert_eq!(res.reason, Some(SkipReason::InvalidCase));
}

#[test]
fn binary_add_post_op() {
    for alg in [Alg::Relu, Alg::Square] {
        for dt in [DataType::F32, DataType::Bf16] {
            let prb = Problem::new(vec![4, 64], alg).unwrap().with_post_op(PostOp::BinaryAdd { dt });
            let res = run(&prb);
            assert_eq!(res.state, ResState::Passed, "{}: {:?}", prb.repro(), res);
        }
    }

    let prb = Problem::new(vec![4, 64], Alg::Relu)
        .unwrap()
        .with_dir(Direction::BwdD)
        .with_post_op(PostOp::BinaryAdd { dt: DataType::F32 });
    assert_eq!(run(&prb).state, ResState::Unimplemented);
}

#[test]
fn inplace_and_channels_last() {
    for dir in [Direction::FwdD, Direction::BwdD] {
        for alg in [Alg::Tanh, Alg::ExpDst] {
            let prb = Problem::new(vec![2, 3, 16], alg).unwrap().with_dir(dir).with_inplace(true);
            assert_eq!(run(&prb).state, ResState::Passed, "{}", prb.repro());

            let prb = Problem::new(vec![2, 3, 16], alg).unwrap().with_dir(dir).with_tag("axb");
            assert_eq!(run(&prb).state, ResState::Passed, "{}", prb.repro());
        }
    }
}

#[test]
fn degenerate_outputs() {
    // Every gradient of round is zero.
    let prb = Problem::new(vec![256], Alg::Round).unwrap().with_dir(Direction::BwdD);
    let res = run(&prb);
    assert_eq!(res.state, ResState::Mistrusted);
    assert_eq!(res.errors, 0);

    // A zero slope is expected to produce zeros only.
    let prb = Problem::new(vec![256], Alg::Linear).unwrap();
    assert_eq!(run(&prb).state, ResState::Passed);
}

#[test]
fn invalid_tag_fails_the_case() {
    let prb = Problem::new(vec![2, 3], Alg::Relu).unwrap().with_tag("abc");
    let res = run(&prb);
    assert_eq!(res.state, ResState::Failed);
    assert!(res.fatal.is_some());
}

#[test]
fn list_skip_impl_and_perf() {
    let prb = Problem::new(vec![64], Alg::Relu).unwrap();

    let ctx = BenchContext::new(HarnessConfig::builder().mode(BenchMode::List).build().unwrap());
    assert_eq!(eltwise::run(&ctx, &prb).state, ResState::Listed);

    let ctx = BenchContext::new(HarnessConfig::builder().skip_impl(["ref"]).build().unwrap());
    let res = eltwise::run(&ctx, &prb);
    assert_eq!(res.state, ResState::Skipped);
    assert_eq!(res.reason, Some(SkipReason::SkipImplHit));

    let ctx = BenchContext::new(HarnessConfig::builder().mode(BenchMode::Perf).fix_times(4).build().unwrap());
    let res = eltwise::run(&ctx, &prb);
    assert_eq!(res.state, ResState::Executed);
    assert_eq!(res.timer.times, 4);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn shapes_do_not_change_the_verdict(
        dims in prop::collection::vec(1usize..9, 1..4),
        idx in 0usize..26,
        fwd in any::<bool>(),
    ) {
        let (alg, alpha, beta) = cases()[idx];
        let dir = if fwd { Direction::FwdD } else { Direction::BwdD };
        let prb = Problem::new(dims, alg).unwrap().with_alpha_beta(alpha, beta).with_dir(dir);
        let res = run(&prb);
        prop_assert!(
            matches!(res.state, ResState::Passed | ResState::Mistrusted),
            "{}: {:?}", prb.repro(), res
        );
    }
}
