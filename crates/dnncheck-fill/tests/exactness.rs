//! Property tests for the exactness guarantees of the layer-norm fills.

use dnncheck_common::lnorm::Problem;
use dnncheck_common::{DataType, Direction, NormFlags, RefBuffer};
use dnncheck_fill::lnorm::{BwdFill, fill_bwd, fill_fwd, plan_fwd};
use proptest::prelude::*;

struct LnormBuffers {
    src: RefBuffer,
    d_dst: RefBuffer,
    mean: RefBuffer,
    var: RefBuffer,
    scale: RefBuffer,
    shift: RefBuffer,
}

impl LnormBuffers {
    fn new(prb: &Problem) -> Self {
        Self {
            src: RefBuffer::new(&prb.dims),
            d_dst: RefBuffer::new(&prb.dims),
            mean: RefBuffer::new(&[prb.n()]),
            var: RefBuffer::new(&[prb.n()]),
            scale: RefBuffer::new(&[prb.c()]),
            shift: RefBuffer::new(&[prb.c()]),
        }
    }

    fn fill_fwd(&mut self, prb: &Problem) -> dnncheck_fill::Result<()> {
        fill_fwd(prb, &mut self.src, &mut self.mean, &mut self.var, &mut self.scale, &mut self.shift)
            .map(|_| ())
    }

    fn fill_bwd(&mut self, prb: &Problem) -> dnncheck_fill::Result<BwdFill> {
        fill_bwd(
            prb,
            &mut self.src,
            &mut self.d_dst,
            &mut self.mean,
            &mut self.var,
            &mut self.scale,
            &mut self.shift,
        )
    }
}

fn arb_float_dt() -> impl Strategy<Value = DataType> {
    prop_oneof![Just(DataType::F32), Just(DataType::Bf16), Just(DataType::F16)]
}

fn arb_flags() -> impl Strategy<Value = NormFlags> {
    prop_oneof![
        Just(NormFlags::NONE),
        Just(NormFlags { scale_shift: true, ..NormFlags::NONE }),
        Just(NormFlags { scale: true, ..NormFlags::NONE }),
        Just(NormFlags { scale: true, shift: true, ..NormFlags::NONE }),
    ]
}

proptest! {
    /// Row means are exact in any summation order and variances match the
    /// generated values.
    #[test]
    fn fwd_rows_have_exact_mean(n in 1usize..6, c in 1usize..300, dt in arb_float_dt()) {
        let prb = Problem::new(vec![n, c]).unwrap().with_dt(dt);
        prop_assume!(plan_fwd(&prb).is_ok());
        let mut bufs = LnormBuffers::new(&prb);
        bufs.fill_fwd(&prb).unwrap();

        for row in 0..n {
            let s = &bufs.src.as_slice()[row * c..(row + 1) * c];
            let m = bufs.mean.get(row) as f64;
            let sum: f64 = s.iter().map(|&v| v as f64).sum();
            let rev: f64 = s.iter().rev().map(|&v| v as f64).sum();
            prop_assert_eq!(sum, m * c as f64);
            prop_assert_eq!(rev, sum);

            let var: f64 = s.iter().map(|&v| (v as f64 - m).powi(2)).sum::<f64>() / c as f64;
            let got = bufs.var.get(row) as f64;
            prop_assert!((got - var).abs() <= var.abs() * 1e-6, "row {}: {} vs {}", row, got, var);
        }
    }

    /// Every generated value survives the trip into the working type.
    #[test]
    fn fwd_values_are_representable(n in 1usize..4, c in 1usize..200, dt in arb_float_dt()) {
        let prb = Problem::new(vec![n, c]).unwrap().with_dt(dt);
        prop_assume!(plan_fwd(&prb).is_ok());
        let mut bufs = LnormBuffers::new(&prb);
        bufs.fill_fwd(&prb).unwrap();
        for &v in bufs.src.as_slice() {
            prop_assert_eq!(dt.round_to_representable(v), v);
        }
    }

    /// Same problem, same bits.
    #[test]
    fn fwd_fill_is_idempotent(n in 1usize..5, c in 1usize..128, flags in arb_flags()) {
        let prb = Problem::new(vec![n, c]).unwrap().with_flags(flags);
        let mut a = LnormBuffers::new(&prb);
        let mut b = LnormBuffers::new(&prb);
        a.fill_fwd(&prb).unwrap();
        b.fill_fwd(&prb).unwrap();
        let bits = |buf: &RefBuffer| buf.as_slice().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        prop_assert_eq!(bits(&a.src), bits(&b.src));
        prop_assert_eq!(bits(&a.mean), bits(&b.mean));
        prop_assert_eq!(bits(&a.var), bits(&b.var));
        prop_assert_eq!(bits(&a.scale), bits(&b.scale));
        prop_assert_eq!(bits(&a.shift), bits(&b.shift));
    }

    /// Both gradient accumulations land exactly on the per-row targets.
    #[test]
    fn bwd_rows_hit_targets(
        n in 2usize..12,
        c in 2usize..200,
        flags in arb_flags(),
        dt in prop_oneof![Just(DataType::F32), Just(DataType::F16)],
    ) {
        let prb = Problem::new(vec![n, c]).unwrap().with_dir(Direction::BwdDw).with_flags(flags).with_dt(dt);
        let mut bufs = LnormBuffers::new(&prb);
        let fill = bufs.fill_bwd(&prb).unwrap();

        prop_assert_eq!(fill.targets.len(), n);
        for (row, target) in fill.targets.iter().enumerate() {
            let Some(target) = target else { continue };
            let m = bufs.mean.get(row) as f64;
            let mut dd_g = 0.0f64;
            let mut dd_g_x = 0.0f64;
            for ch in 0..c {
                let idx = row * c + ch;
                let g = bufs.scale.get(ch) as f64;
                let dd = bufs.d_dst.get(idx) as f64;
                dd_g += dd * g;
                dd_g_x += dd * (bufs.src.get(idx) as f64 - m) * g;
            }
            prop_assert_eq!(dd_g, target.dd_gamma as f64);
            prop_assert_eq!(dd_g_x, target.dd_gamma_x as f64);
        }
    }

    /// bf16 rows keep their solved gradients within bf16 precision.
    #[test]
    fn bwd_bf16_solved_values_are_representable(n in 2usize..8, c in 2usize..200, flags in arb_flags()) {
        let prb = Problem::new(vec![n, c])
            .unwrap()
            .with_dir(Direction::BwdDw)
            .with_flags(flags)
            .with_dt(DataType::Bf16);
        let mut bufs = LnormBuffers::new(&prb);
        let fill = bufs.fill_bwd(&prb).unwrap();
        for (row, target) in fill.targets.iter().enumerate() {
            if target.is_none() {
                continue;
            }
            for idx in [row * c + c - 2, row * c + c - 1] {
                let dd = bufs.d_dst.get(idx);
                prop_assert_eq!(DataType::Bf16.round_to_representable(dd), dd);
            }
        }
    }
}

#[test]
fn zero_mean_rows_n2_c4() {
    let prb = Problem::new(vec![2, 4]).unwrap().with_check_alg(dnncheck_common::CheckAlg::Alg0);
    let mut bufs = LnormBuffers::new(&prb);
    bufs.fill_fwd(&prb).unwrap();

    for row in 0..2 {
        let s = &bufs.src.as_slice()[row * 4..row * 4 + 4];
        assert_eq!(bufs.mean.get(row), 0.0);
        assert_eq!(s.iter().sum::<f32>(), 0.0);
        let var = s.iter().map(|v| v * v).sum::<f32>() / 4.0;
        assert_eq!(bufs.var.get(row), var);
    }
}

#[test]
fn bf16_wide_rows_are_feasible() {
    let prb = Problem::new(vec![2, 1000]).unwrap().with_dt(DataType::Bf16);
    let mut bufs = LnormBuffers::new(&prb);
    assert!(bufs.fill_fwd(&prb).is_ok());
}
