//! Layer normalization cases run end to end on the native engine.

use dnncheck_common::lnorm::Problem;
use dnncheck_common::{
    BenchMode, CheckAlg, DataKind, DataType, Direction, HarnessConfig, MemoryDesc, NormFlags, RefBuffer,
    ResState, SkipReason, TestResult, WorkBuffer,
};
use dnncheck_compare::Comparator;
use dnncheck_drivers::BenchContext;
use dnncheck_drivers::lnorm::{self, reference};
use dnncheck_fill::lnorm::fill_fwd;
use proptest::prelude::*;

fn flags(s: &str) -> NormFlags {
    s.parse().unwrap()
}

fn run(prb: &Problem) -> TestResult {
    lnorm::run(&BenchContext::default(), prb)
}

fn ctx_with(config: HarnessConfig) -> BenchContext {
    BenchContext::new(config)
}

#[test]
fn zero_mean_fill_reproduces_reference_exactly() {
    let prb = Problem::new(vec![2, 4]).unwrap().with_check_alg(CheckAlg::Alg0);
    let c = prb.c();
    let mut src = RefBuffer::new(&prb.dims);
    let mut mean = RefBuffer::new(prb.stat_dims());
    let mut var = RefBuffer::new(prb.stat_dims());
    let mut scale = RefBuffer::new(&[c]);
    let mut shift = RefBuffer::new(&[c]);
    fill_fwd(&prb, &mut src, &mut mean, &mut var, &mut scale, &mut shift).unwrap();

    let dst = reference::compute_ref_fwd(&prb, &src, &mean, &var, &scale, &shift).unwrap();
    let got = WorkBuffer::from_ref(&MemoryDesc::new(&prb.dims, DataType::F32), &dst).unwrap();

    let mut res = TestResult::new();
    let report = Comparator::new(DataKind::Data).with_threshold(5e-7).compare(&dst, &got, &mut res);
    assert_eq!(report.verdict, ResState::Passed);
    assert_eq!(report.max_diff, 0.0);
    assert_eq!(res.state, ResState::Passed);
}

#[test]
fn forward_f32_passes_for_every_flag_combination() {
    for f in ["", "G", "S", "C", "H", "CH", "GS", "GCH"] {
        for dir in [Direction::FwdD, Direction::FwdI] {
            let prb = Problem::new(vec![4, 16]).unwrap().with_flags(flags(f)).with_dir(dir);
            let res = run(&prb);
            assert_eq!(res.state, ResState::Passed, "{}: {:?}", prb.repro(), res);
            assert_eq!(res.errors, 0);
            assert_eq!(res.impl_name, "ref:native");
        }
    }
}

#[test]
fn forward_training_checks_statistics() {
    let prb = Problem::new(vec![4, 16]).unwrap();
    let res = run(&prb);
    assert_eq!(res.state, ResState::Passed);
    // dst plus one mean and one variance per row.
    assert_eq!(res.total, 64 + 4 + 4);

    let res = run(&prb.clone().with_flags(flags("G")));
    assert_eq!(res.total, 64);
    let res = run(&prb.with_dir(Direction::FwdI));
    assert_eq!(res.total, 64);
}

#[test]
fn forward_higher_rank_and_layouts() {
    let prb = Problem::new(vec![2, 3, 16]).unwrap().with_flags(flags("CH"));
    assert_eq!(run(&prb).state, ResState::Passed);

    let prb = Problem::new(vec![4, 16]).unwrap().with_tag("axb");
    assert_eq!(run(&prb).state, ResState::Passed);

    let prb = Problem::new(vec![2, 3, 8]).unwrap().with_stat_tag(Some("ba".to_string()));
    assert_eq!(run(&prb).state, ResState::Passed);
}

#[test]
fn forward_inplace() {
    let prb = Problem::new(vec![4, 16]).unwrap().with_flags(flags("S")).with_inplace(true);
    assert_eq!(run(&prb).state, ResState::Passed);
}

#[test]
fn backward_passes_for_every_flag_combination() {
    for f in ["", "G", "S", "C", "H", "CH", "GCH"] {
        for dir in [Direction::BwdD, Direction::BwdDw] {
            let prb = Problem::new(vec![4, 8]).unwrap().with_flags(flags(f)).with_dir(dir);
            let res = run(&prb);
            assert_eq!(res.state, ResState::Passed, "{}: {:?}", prb.repro(), res);
        }
    }
}

#[test]
fn backward_compares_weight_gradients_only_with_weights() {
    let prb = Problem::new(vec![6, 32]).unwrap().with_flags(flags("CH"));
    let res = run(&prb.clone().with_dir(Direction::BwdD));
    assert_eq!(res.state, ResState::Passed);
    assert_eq!(res.total, 6 * 32);

    let res = run(&prb.with_dir(Direction::BwdDw));
    assert_eq!(res.state, ResState::Passed);
    assert_eq!(res.total, 6 * 32 + 32 + 32);

    let prb = Problem::new(vec![6, 32]).unwrap().with_flags(flags("S")).with_dir(Direction::BwdDw);
    let res = run(&prb);
    assert_eq!(res.state, ResState::Passed);
    assert_eq!(res.total, 6 * 32 + 2 * 32);
}

#[test]
fn backward_inplace() {
    let prb = Problem::new(vec![4, 8]).unwrap().with_dir(Direction::BwdDw).with_flags(flags("S")).with_inplace(true);
    assert_eq!(run(&prb).state, ResState::Passed);
}

#[test]
fn reduced_precision() {
    let prb = Problem::new(vec![2, 1000]).unwrap().with_dt(DataType::Bf16);
    assert_eq!(run(&prb).state, ResState::Passed);

    let prb = Problem::new(vec![2, 4]).unwrap().with_dt(DataType::F16);
    assert_eq!(run(&prb).state, ResState::Passed);

    let prb = Problem::new(vec![4, 8]).unwrap().with_dt(DataType::Bf16).with_dir(Direction::BwdDw).with_flags(flags("CH"));
    assert_eq!(run(&prb).state, ResState::Passed);
}

#[test]
fn sparse_data_is_mistrusted() {
    // f16 rows of 64 only admit the zero-mean construction at low density.
    let prb = Problem::new(vec![2, 64]).unwrap().with_dt(DataType::F16);
    let res = run(&prb);
    assert_eq!(res.state, ResState::Mistrusted);
    assert_eq!(res.errors, 0);
}

#[test]
fn infeasible_fills_are_mistrusted() {
    let prb = Problem::new(vec![2, 1000]).unwrap().with_dt(DataType::Bf16).with_check_alg(CheckAlg::Alg1);
    let res = run(&prb);
    assert_eq!(res.state, ResState::Mistrusted);
    assert_eq!(res.total, 0);

    let prb = Problem::new(vec![4, 1]).unwrap().with_dir(Direction::BwdD);
    assert_eq!(run(&prb).state, ResState::Mistrusted);
}

#[test]
fn integral_types_are_invalid() {
    for dir in [Direction::FwdD, Direction::BwdD] {
        let prb = Problem::new(vec![2, 8]).unwrap().with_dt(DataType::S8).with_dir(dir);
        let res = run(&prb);
        assert_eq!(res.state, ResState::Skipped);
        assert_eq!(res.reason, Some(SkipReason::InvalidCase));
    }
}

#[test]
fn list_mode_does_no_work() {
    let ctx = ctx_with(HarnessConfig::builder().mode(BenchMode::List).build().unwrap());
    let res = lnorm::run(&ctx, &Problem::new(vec![2, 8]).unwrap());
    assert_eq!(res.state, ResState::Listed);
    assert!(res.impl_name.is_empty());
}

#[test]
fn perf_mode_only_executes() {
    let ctx = ctx_with(HarnessConfig::builder().mode(BenchMode::Perf).fix_times(3).build().unwrap());
    let res = lnorm::run(&ctx, &Problem::new(vec![4, 16]).unwrap());
    assert_eq!(res.state, ResState::Executed);
    assert_eq!(res.timer.times, 3);
    assert_eq!(res.total, 0);

    let ctx = ctx_with(HarnessConfig::builder().mode(BenchMode::Both).fix_times(2).build().unwrap());
    let res = lnorm::run(&ctx, &Problem::new(vec![4, 8]).unwrap().with_dir(Direction::BwdDw));
    assert_eq!(res.state, ResState::Passed);
    assert_eq!(res.timer.times, 2);
}

#[test]
fn skip_impl_and_memory_limit() {
    let ctx = ctx_with(HarnessConfig::builder().skip_impl(["native"]).build().unwrap());
    let res = lnorm::run(&ctx, &Problem::new(vec![2, 8]).unwrap());
    assert_eq!(res.state, ResState::Skipped);
    assert_eq!(res.reason, Some(SkipReason::SkipImplHit));
    assert_eq!(res.impl_name, "ref:native");

    let ctx = ctx_with(HarnessConfig::builder().memory_limit(64).build().unwrap());
    let res = lnorm::run(&ctx, &Problem::new(vec![8, 64]).unwrap());
    assert_eq!(res.state, ResState::Skipped);
    assert_eq!(res.reason, Some(SkipReason::NotEnoughRam));
}

fn arb_flags() -> impl Strategy<Value = NormFlags> {
    prop_oneof![Just(""), Just("G"), Just("S"), Just("C"), Just("H"), Just("CH")].prop_map(flags)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn forward_f32_shapes_pass(n in 2usize..6, half_c in 4usize..32, f in arb_flags()) {
        let prb = Problem::new(vec![n, 2 * half_c]).unwrap().with_flags(f);
        let res = run(&prb);
        prop_assert_eq!(res.state, ResState::Passed, "{}", prb.repro());
    }

    #[test]
    fn backward_f32_shapes_pass(n in 2usize..10, c in 2usize..64, f in arb_flags()) {
        let prb = Problem::new(vec![n, c]).unwrap().with_flags(f).with_dir(Direction::BwdDw);
        let res = run(&prb);
        prop_assert_ne!(res.state, ResState::Failed, "{}", prb.repro());
    }
}
