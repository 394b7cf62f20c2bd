//! Eltwise driver, primitive path.
//!
//! Inputs come from the index-hash filler already rounded to the working
//! type, so reference and primitive see identical numbers. The graph path
//! lives in [`graph`].

pub mod graph;
pub mod reference;

use dnncheck_common::eltwise::{PostOp, Problem};
use dnncheck_common::{BenchMode, DataKind, DataType, MemoryDesc, RefBuffer, ResState, TestResult, WorkBuffer};
use dnncheck_compare::Comparator;
use dnncheck_compare::exceptions::eltwise_check;
use dnncheck_compare::tolerance::eltwise_tolerance;
use dnncheck_fill::eltwise::fill;
use dnncheck_kernels::{Arg, EltwiseDesc, ExecArgs, Primitive, PrimitiveDesc};
use tracing::error;

use crate::context::{BenchContext, query_md};
use crate::error::Result;
use crate::perf::measure_perf;
use crate::skip;

pub fn run(ctx: &BenchContext, prb: &Problem) -> TestResult {
    let mut res = TestResult::new();
    if let Err(e) = doit(ctx, prb, &mut res) {
        error!(repro = %prb.repro(), error = %e, "CRIT");
        res.set_fatal(e.to_string());
    }
    res
}

/// Data types a problem touches, post-op sources included.
pub(crate) fn problem_dts(prb: &Problem) -> Vec<DataType> {
    let mut dts = vec![prb.dt];
    dts.extend(prb.post_ops.iter().map(|po| match po {
        PostOp::BinaryAdd { dt } => *dt,
    }));
    dts
}

pub fn check_known_skipped_case(prb: &Problem, res: &mut TestResult) {
    skip::check_known_skipped_case_common(&problem_dts(prb), prb.dir, res);
}

pub(crate) fn src1_dt(prb: &Problem) -> Option<DataType> {
    prb.post_ops.iter().find_map(|po| match po {
        PostOp::BinaryAdd { dt } => Some(*dt),
    })
}

fn filled(prb: &Problem, kind: DataKind, dt: DataType) -> Result<RefBuffer> {
    let mut buf = RefBuffer::new(&prb.dims);
    fill(prb, kind, dt, &mut buf)?;
    Ok(buf)
}

fn bound_args(prb: &Problem) -> Vec<Arg> {
    let mut args = vec![Arg::Scratchpad];
    if prb.is_fwd() {
        args.push(Arg::Src);
        if !prb.inplace {
            args.push(Arg::Dst);
        }
        if prb.binary_index().is_some() {
            args.push(Arg::Src1);
        }
    } else {
        args.push(if prb.use_dst() { Arg::Dst } else { Arg::Src });
        args.push(Arg::DiffDst);
        if !prb.inplace {
            args.push(Arg::DiffSrc);
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

    let desc = EltwiseDesc::from_problem(prb)?;
    let Some(prim) = ctx.create_primitive(&PrimitiveDesc::Eltwise(desc), None, res)? else {
        return Ok(());
    };
    let prim = prim.as_ref();

    if skip::check_impl(&ctx.config().run.skip_impl, prim.impl_name(), res) {
        return Ok(());
    }

    let mds = bound_args(prb)
        .into_iter()
        .map(|arg| Ok((arg, query_md(prim, arg)?)))
        .collect::<Result<Vec<(Arg, MemoryDesc)>>>()?;
    if skip::check_mem_size(
        ctx.config().run.memory_limit,
        skip::required_bytes(mds.iter().map(|(_, md)| md)),
        res,
    ) {
        return Ok(());
    }

    let src_fp = filled(prb, DataKind::Src, prb.dt)?;
    let src1_fp = src1_dt(prb).map(|dt| filled(prb, DataKind::Src1, dt)).transpose()?;
    let d_dst_fp = if prb.is_fwd() { None } else { Some(filled(prb, DataKind::DiffDst, prb.dt)?) };

    // Destination-based backward consumes the forward result in working
    // precision.
    let arg_fp = if !prb.is_fwd() && prb.use_dst() {
        let dst = reference::compute_ref_fwd(prb, &src_fp, src1_fp.as_ref())?;
        WorkBuffer::from_ref(&dst.desc().with_dt(prb.dt), &dst)?.to_ref()
    } else {
        src_fp.clone()
    };

    let mut args = ExecArgs::new();
    for (arg, md) in &mds {
        let buf = match arg {
            Arg::Src | Arg::Dst if !prb.is_fwd() => WorkBuffer::from_ref(md, &arg_fp)?,
            Arg::Src => WorkBuffer::from_ref(md, &src_fp)?,
            Arg::Src1 => match &src1_fp {
                Some(s1) => WorkBuffer::from_ref(md, s1)?,
                None => WorkBuffer::new(md),
            },
            Arg::DiffDst => match &d_dst_fp {
                Some(dd) => WorkBuffer::from_ref(md, dd)?,
                None => WorkBuffer::new(md),
            },
            _ => WorkBuffer::new(md),
        };
        args.set(*arg, buf);
    }

    prim.execute(&mut args)?;

    if ctx.mode().checks_correctness() {
        let (exp, got) = match &d_dst_fp {
            None => (
                reference::compute_ref_fwd(prb, &src_fp, src1_fp.as_ref())?,
                args.get(if prb.inplace { Arg::Src } else { Arg::Dst })?,
            ),
            Some(d_dst_fp) => (
                reference::compute_ref_bwd(prb, &arg_fp, d_dst_fp)?,
                args.get(if prb.inplace { Arg::DiffDst } else { Arg::DiffSrc })?,
            ),
        };
        Comparator::new(DataKind::Data)
            .with_tolerance(eltwise_tolerance(prb))
            .with_driver_check(eltwise_check(prb, arg_fp.as_slice()))
            .compare(&exp, got, res);
    }

    if ctx.mode().measures_perf() {
        measure_perf(ctx.perf(), &mut res.timer, || Ok(prim.execute(&mut args)?))?;
    }

    res.finish_execution();
    Ok(())
}
