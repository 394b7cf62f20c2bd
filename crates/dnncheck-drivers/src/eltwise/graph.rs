//! Eltwise driver, graph path.
//!
//! The problem becomes a single-op graph. It must yield exactly one
//! partition, which is compiled for the problem's logical tensors and fed
//! through the same reference and comparator as the primitive path.
//! Forward only.

use dnncheck_common::eltwise::{Alg, Problem};
use dnncheck_common::{BenchMode, DataKind, MemoryDesc, RefBuffer, ResState, SkipReason, TestResult, WorkBuffer};
use dnncheck_compare::Comparator;
use dnncheck_compare::exceptions::eltwise_check;
use dnncheck_compare::tolerance::eltwise_tolerance;
use dnncheck_fill::eltwise::fill;
use dnncheck_kernels::graph::{Graph, LogicalTensor, Op, OpKind};
use tracing::{debug, error};

use super::{check_known_skipped_case, reference};
use crate::context::BenchContext;
use crate::error::Result;
use crate::perf::measure_perf;
use crate::skip;

/// Implementation name recorded for every graph-path case.
pub const IMPL_NAME: &str = "graph";

const SRC_ID: usize = 0;
const DST_ID: usize = 1;

/// Graph op for `prb`, or `None` when the algorithm or its parameters have
/// no graph counterpart.
fn to_op(prb: &Problem, src: LogicalTensor, dst: LogicalTensor) -> Option<Op> {
    let kind = match prb.alg {
        Alg::Abs => OpKind::Abs,
        Alg::Elu => OpKind::Elu,
        Alg::Exp => OpKind::Exp,
        Alg::GeluErf => OpKind::Gelu,
        Alg::Clip => OpKind::HardTanh,
        Alg::Log => OpKind::Log,
        Alg::Logistic => OpKind::Sigmoid,
        Alg::SoftRelu => OpKind::SoftPlus,
        // Leaky ReLU has no graph op.
        Alg::Relu if prb.alpha == 0.0 => OpKind::ReLU,
        Alg::Round => OpKind::Round,
        Alg::Sqrt => OpKind::Sqrt,
        Alg::Square => OpKind::Square,
        Alg::Tanh => OpKind::Tanh,
        Alg::HardSwish => OpKind::HardSwish,
        _ => return None,
    };
    let op = Op::new(0, kind, vec![src], vec![dst], prb.alg.as_str());
    Some(match kind {
        OpKind::Elu => op.with_attr("alpha", prb.alpha),
        OpKind::HardTanh => op.with_attr("min", prb.alpha).with_attr("max", prb.beta),
        _ => op,
    })
}

pub fn run(ctx: &BenchContext, prb: &Problem) -> TestResult {
    let mut res = TestResult::new();
    if let Err(e) = doit(ctx, prb, &mut res) {
        error!(repro = %prb.repro(), error = %e, "CRIT");
        res.set_fatal(e.to_string());
    }
    res
}

pub fn doit(ctx: &BenchContext, prb: &Problem, res: &mut TestResult) -> Result<()> {
    res.impl_name = IMPL_NAME.to_string();

    if ctx.mode() == BenchMode::List {
        res.state = ResState::Listed;
        return Ok(());
    }

    check_known_skipped_case(prb, res);
    if res.is_terminal() {
        return Ok(());
    }
    if !prb.is_fwd() {
        res.set_skipped(SkipReason::CaseNotSupported);
        return Ok(());
    }
    if !prb.post_ops.is_empty() {
        debug!(repro = %prb.repro(), "post-ops have no graph counterpart");
        res.state = ResState::Unimplemented;
        return Ok(());
    }

    let src_lt = LogicalTensor::new(SRC_ID, prb.dt, &prb.dims);
    let dst_lt = LogicalTensor::new(DST_ID, prb.dt, &prb.dims);
    let Some(op) = to_op(prb, src_lt.clone(), dst_lt.clone()) else {
        debug!(alg = %prb.alg, alpha = prb.alpha, "no graph op");
        res.state = ResState::Unimplemented;
        return Ok(());
    };

    let mut graph = Graph::new();
    graph.add_op(op)?;
    let partitions = graph.get_partitions();
    if partitions.len() != 1 {
        let msg = format!("expected 1 partition, got {}", partitions.len());
        error!(repro = %prb.repro(), "{msg}");
        res.set_fatal(msg);
        return Ok(());
    }
    let partition = &partitions[0];
    if !partition.is_supported() {
        debug!(partition = partition.id(), "partition is not supported");
        res.state = ResState::Unimplemented;
        return Ok(());
    }

    let ins = [src_lt];
    let outs = [dst_lt];
    let compiled = match partition.compile(&ins, &outs) {
        Ok(c) => c,
        Err(e) if e.is_unimplemented() => {
            res.state = ResState::Unimplemented;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if skip::maybe_skip_impl(&ctx.config().run.skip_impl, IMPL_NAME) {
        res.set_skipped(SkipReason::SkipImplHit);
        return Ok(());
    }

    let md = MemoryDesc::from_tag(&prb.dims, prb.dt, &prb.tag)?;
    let mds = if prb.inplace { vec![&md] } else { vec![&md, &md] };
    if skip::check_mem_size(ctx.config().run.memory_limit, skip::required_bytes(mds), res) {
        return Ok(());
    }

    let mut src_fp = RefBuffer::new(&prb.dims);
    fill(prb, DataKind::Src, prb.dt, &mut src_fp)?;
    let src = WorkBuffer::from_ref(&md, &src_fp)?;

    // Compiled partitions take distinct input and output tensors, so every
    // execution reads the filled source.
    let mut dst = WorkBuffer::new(&md);
    compiled.execute(&[&src], &mut [&mut dst])?;

    if ctx.mode().checks_correctness() {
        let dst_fp = reference::compute_ref_fwd(prb, &src_fp, None)?;
        Comparator::new(DataKind::Data)
            .with_tolerance(eltwise_tolerance(prb))
            .with_driver_check(eltwise_check(prb, src_fp.as_slice()))
            .compare(&dst_fp, &dst, res);
    }

    if ctx.mode().measures_perf() {
        measure_perf(ctx.perf(), &mut res.timer, || Ok(compiled.execute(&[&src], &mut [&mut dst])?))?;
    }

    res.finish_execution();
    Ok(())
}
