//! Runs expanded batches case by case and prints a line per case.

use std::io::Write;

use anyhow::Result;
use dnncheck_common::{TestResult, eltwise, lnorm};
use dnncheck_drivers::BenchContext;
use dnncheck_drivers::eltwise::graph;
use tracing::info;

use crate::report::{CaseRecord, Report};

/// Run `problems` in order through `run`, streaming one line per case to
/// `out`.
pub fn run_batch<P, W: Write>(
    ctx: &BenchContext,
    driver: &'static str,
    problems: &[P],
    run: impl Fn(&BenchContext, &P) -> TestResult,
    repro: impl Fn(&P) -> String,
    report: &mut Report,
    out: &mut W,
) -> Result<()> {
    info!(driver, cases = problems.len(), mode = %ctx.mode(), "starting batch");
    for prb in problems {
        let res = run(ctx, prb);
        let record = CaseRecord::new(report.cases.len(), driver, repro(prb), res);
        writeln!(out, "{}", record.line())?;
        report.push(record);
    }
    Ok(())
}

pub fn run_lnorm<W: Write>(
    ctx: &BenchContext,
    problems: &[lnorm::Problem],
    report: &mut Report,
    out: &mut W,
) -> Result<()> {
    run_batch(ctx, "lnorm", problems, dnncheck_drivers::lnorm::run, lnorm::Problem::repro, report, out)
}

pub fn run_eltwise<W: Write>(
    ctx: &BenchContext,
    problems: &[eltwise::Problem],
    use_graph: bool,
    report: &mut Report,
    out: &mut W,
) -> Result<()> {
    if use_graph {
        run_batch(ctx, "eltwise", problems, graph::run, |p| format!("--graph {}", p.repro()), report, out)
    } else {
        run_batch(ctx, "eltwise", problems, dnncheck_drivers::eltwise::run, eltwise::Problem::repro, report, out)
    }
}
