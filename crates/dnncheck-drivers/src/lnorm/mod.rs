//! Layer normalization driver.
//!
//! [`doit`] walks one problem through skip checks, primitive creation,
//! exact data generation, execution and comparison against
//! [`reference`]. Statistics handed to the reference are the generator's,
//! so a primitive that computes wrong statistics fails on `dst` as well as
//! on `mean`/`var`.

pub mod reference;

use dnncheck_common::lnorm::Problem;
use dnncheck_common::{BenchMode, DataKind, RefBuffer, ResState, SkipReason, TestResult, WorkBuffer};
use dnncheck_compare::Comparator;
use dnncheck_compare::exceptions::lnorm_affine_check;
use dnncheck_compare::tolerance::lnorm_tolerance;
use dnncheck_fill::FillError;
use dnncheck_fill::lnorm::{fill_bwd, fill_fwd};
use dnncheck_kernels::{Arg, ExecArgs, LnormDesc, Primitive, PrimitiveDesc};
use tracing::{debug, error};

use crate::context::{BenchContext, query_md};
use crate::error::Result;
use crate::perf::measure_perf;
use crate::skip;

/// Run one case and return its verdict. Collaborator failures end up as
/// FAILED with the message in [`TestResult::fatal`].
pub fn run(ctx: &BenchContext, prb: &Problem) -> TestResult {
    let mut res = TestResult::new();
    if let Err(e) = doit(ctx, prb, &mut res) {
        error!(repro = %prb.repro(), error = %e, "CRIT");
        res.set_fatal(e.to_string());
    }
    res
}

pub fn check_known_skipped_case(prb: &Problem, res: &mut TestResult) {
    skip::check_known_skipped_case_common(&[prb.dt], prb.dir, res);
    if res.is_terminal() {
        return;
    }
    if prb.dt.is_integral() {
        res.set_skipped(SkipReason::InvalidCase);
    }
}

/// Reference-side tensors of one case.
struct RefTensors {
    src: RefBuffer,
    d_dst: RefBuffer,
    mean: RefBuffer,
    var: RefBuffer,
    scale: RefBuffer,
    shift: RefBuffer,
}

impl RefTensors {
    fn new(prb: &Problem) -> Self {
        let c = prb.c();
        Self {
            src: RefBuffer::new(&prb.dims),
            d_dst: RefBuffer::new(&prb.dims),
            mean: RefBuffer::new(prb.stat_dims()),
            var: RefBuffer::new(prb.stat_dims()),
            scale: RefBuffer::new(&[c]),
            shift: RefBuffer::new(&[c]),
        }
    }

    /// Run the generator for the problem's direction. `Ok(false)` means the
    /// construction is infeasible.
    fn fill(&mut self, prb: &Problem) -> Result<bool> {
        let filled = if prb.dir.is_fwd() {
            fill_fwd(prb, &mut self.src, &mut self.mean, &mut self.var, &mut self.scale, &mut self.shift)
                .map(drop)
        } else {
            fill_bwd(
                prb,
                &mut self.src,
                &mut self.d_dst,
                &mut self.mean,
                &mut self.var,
                &mut self.scale,
                &mut self.shift,
            )
            .map(drop)
        };
        match filled {
            Ok(()) => Ok(true),
            Err(FillError::Infeasible { reason }) => {
                debug!(repro = %prb.repro(), %reason, "fill infeasible");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// `[2, C]` buffer with scale in the first row and shift in the second.
fn concat_scale_shift(c: usize, scale: &[f32], shift: &[f32]) -> Result<RefBuffer> {
    let mut v = Vec::with_capacity(2 * c);
    v.extend_from_slice(scale);
    v.extend_from_slice(shift);
    Ok(RefBuffer::from_vec(&[2, c], v)?)
}

/// Arguments bound for `prb`, inputs and outputs alike.
fn bound_args(prb: &Problem) -> Vec<Arg> {
    let mut args = vec![Arg::Src, Arg::Mean, Arg::Variance, Arg::Scratchpad];
    if prb.dir.is_fwd() {
        if !prb.inplace {
            args.push(Arg::Dst);
        }
    } else {
        args.push(Arg::DiffDst);
        if !prb.inplace {
            args.push(Arg::DiffSrc);
        }
    }
    let weights = prb.dir.has_weights();
    if prb.use_ss() {
        args.push(Arg::ScaleShift);
        if weights {
            args.push(Arg::DiffScaleShift);
        }
    }
    if prb.use_sc() {
        args.push(Arg::Scale);
        if weights {
            args.push(Arg::DiffScale);
        }
    }
    if prb.use_sh() {
        args.push(Arg::Shift);
        if weights {
            args.push(Arg::DiffShift);
        }
    }
    args
}

pub fn doit(ctx: &BenchContext, prb: &Problem, res: &mut TestResult) -> Result<()> {
    if ctx.mode() == BenchMode::List {
        res.state = ResState::Listed;
        return Ok(());
    }

    check_known_skipped_case(prb, res);
    if res.is_terminal() {
        return Ok(());
    }

    let desc = LnormDesc::from_problem(prb)?;
    let hint = if prb.dir.is_fwd() {
        None
    } else {
        match ctx.create_primitive(&PrimitiveDesc::Lnorm(desc.forward_hint()), None, res)? {
            Some(hint) => Some(hint),
            None => return Ok(()),
        }
    };
    let Some(prim) = ctx.create_primitive(&PrimitiveDesc::Lnorm(desc), hint.as_deref(), res)? else {
        return Ok(());
    };
    let prim = prim.as_ref();

    if skip::check_impl(&ctx.config().run.skip_impl, prim.impl_name(), res) {
        return Ok(());
    }

    let arg_list = bound_args(prb);
    let mds = arg_list.iter().map(|&arg| Ok((arg, query_md(prim, arg)?))).collect::<Result<Vec<_>>>()?;
    let required = skip::required_bytes(mds.iter().map(|(_, md)| md));
    if skip::check_mem_size(ctx.config().run.memory_limit, required, res) {
        return Ok(());
    }

    let mut fp = RefTensors::new(prb);
    if !fp.fill(prb)? {
        res.state = ResState::Mistrusted;
        return Ok(());
    }
    let ss_fp = concat_scale_shift(prb.c(), fp.scale.as_slice(), fp.shift.as_slice())?;

    let fwd = prb.dir.is_fwd();
    let mut args = ExecArgs::new();
    for (arg, md) in &mds {
        let buf = match arg {
            Arg::Src => WorkBuffer::from_ref(md, &fp.src)?,
            Arg::DiffDst => WorkBuffer::from_ref(md, &fp.d_dst)?,
            // Forward statistics are outputs unless global stats are used.
            Arg::Mean if !fwd || prb.global_stats() => WorkBuffer::from_ref(md, &fp.mean)?,
            Arg::Variance if !fwd || prb.global_stats() => WorkBuffer::from_ref(md, &fp.var)?,
            Arg::ScaleShift => WorkBuffer::from_ref(md, &ss_fp)?,
            Arg::Scale => WorkBuffer::from_ref(md, &fp.scale)?,
            Arg::Shift => WorkBuffer::from_ref(md, &fp.shift)?,
            _ => WorkBuffer::new(md),
        };
        args.set(*arg, buf);
    }

    prim.execute(&mut args)?;

    if ctx.mode().checks_correctness() {
        if fwd {
            check_fwd(prb, &fp, &args, res)?;
        } else {
            check_bwd(prb, &fp, &args, res)?;
        }
    }

    if ctx.mode().measures_perf() {
        measure_perf(ctx.perf(), &mut res.timer, || Ok(prim.execute(&mut args)?))?;
    }

    res.finish_execution();
    Ok(())
}

fn check_fwd(prb: &Problem, fp: &RefTensors, args: &ExecArgs, res: &mut TestResult) -> Result<()> {
    let dst_fp = reference::compute_ref_fwd(prb, &fp.src, &fp.mean, &fp.var, &fp.scale, &fp.shift)?;
    let dst = args.get(if prb.inplace { Arg::Src } else { Arg::Dst })?;

    let tol = lnorm_tolerance(prb, DataKind::Data);
    Comparator::new(DataKind::Data)
        .with_tolerance(tol)
        .with_driver_check(lnorm_affine_check(prb, fp.shift.as_slice(), tol.threshold))
        .compare(&dst_fp, dst, res);

    if !prb.global_stats() && !prb.dir.is_inference() {
        for (kind, arg, exp) in [(DataKind::Mean, Arg::Mean, &fp.mean), (DataKind::Var, Arg::Variance, &fp.var)] {
            Comparator::new(kind).with_tolerance(lnorm_tolerance(prb, kind)).compare(exp, args.get(arg)?, res);
        }
    }
    Ok(())
}

fn check_bwd(prb: &Problem, fp: &RefTensors, args: &ExecArgs, res: &mut TestResult) -> Result<()> {
    let r = reference::compute_ref_bwd(prb, &fp.src, &fp.d_dst, &fp.mean, &fp.var, &fp.scale)?;
    let d_src = args.get(if prb.inplace { Arg::DiffDst } else { Arg::DiffSrc })?;
    Comparator::new(DataKind::Data)
        .with_tolerance(lnorm_tolerance(prb, DataKind::Data))
        .compare(&r.d_src, d_src, res);

    let (Some(d_scale), Some(d_shift)) = (&r.d_scale, &r.d_shift) else {
        return Ok(());
    };
    let mut targets = Vec::new();
    if prb.use_ss() {
        let d_ss = concat_scale_shift(prb.c(), d_scale.as_slice(), d_shift.as_slice())?;
        targets.push((DataKind::ScaleShift, Arg::DiffScaleShift, d_ss));
    }
    if prb.use_sc() {
        targets.push((DataKind::Scale, Arg::DiffScale, d_scale.clone()));
    }
    if prb.use_sh() {
        targets.push((DataKind::Shift, Arg::DiffShift, d_shift.clone()));
    }
    for (kind, arg, exp) in targets {
        Comparator::new(kind).with_tolerance(lnorm_tolerance(prb, kind)).compare(&exp, args.get(arg)?, res);
    }
    Ok(())
}
