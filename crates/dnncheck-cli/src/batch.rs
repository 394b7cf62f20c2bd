//! Expansion of list-valued options into concrete problems.

use anyhow::{Context, Result};
use dnncheck_common::eltwise::{self, Alg, PostOp};
use dnncheck_common::{CheckAlg, DataType, Direction, NormFlags, lnorm, parse_dims};

use crate::args::{EltwiseArgs, LnormArgs};

/// `values`, or `default` alone when none were given.
fn or_default<T: Clone>(values: &[T], default: T) -> Vec<T> {
    if values.is_empty() { vec![default] } else { values.to_vec() }
}

fn shapes(dims: &[String]) -> Result<Vec<Vec<usize>>> {
    dims.iter().map(|d| parse_dims(d).with_context(|| format!("invalid problem shape {d:?}"))).collect()
}

/// Every layer-norm case described by `args`, shapes varying fastest.
pub fn lnorm_problems(args: &LnormArgs) -> Result<Vec<lnorm::Problem>> {
    let shapes = shapes(&args.dims)?;
    let mut out = Vec::new();
    for dir in or_default(&args.dir, Direction::FwdD) {
        for dt in or_default(&args.dt, DataType::F32) {
            for flags in or_default(&args.flags, NormFlags::NONE) {
                for tag in or_default(&args.tag, "abx".to_string()) {
                    for check_alg in or_default(&args.check_alg, CheckAlg::Auto) {
                        for dims in &shapes {
                            let mut prb = lnorm::Problem::new(dims.clone())?
                                .with_dir(dir)
                                .with_dt(dt)
                                .with_flags(flags)
                                .with_tag(tag.clone())
                                .with_stat_tag(args.stat_tag.clone())
                                .with_check_alg(check_alg)
                                .with_inplace(args.inplace);
                            if let Some(eps) = args.eps {
                                prb = prb.with_eps(eps);
                            }
                            out.push(prb);
                        }
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Every eltwise case described by `args`, shapes varying fastest.
pub fn eltwise_problems(args: &EltwiseArgs) -> Result<Vec<eltwise::Problem>> {
    let shapes = shapes(&args.dims)?;
    let post_ops: Vec<Option<PostOp>> = if args.binary_add.is_empty() {
        vec![None]
    } else {
        args.binary_add.iter().map(|&dt| Some(PostOp::BinaryAdd { dt })).collect()
    };

    let mut out = Vec::new();
    for dir in or_default(&args.dir, Direction::FwdD) {
        for dt in or_default(&args.dt, DataType::F32) {
            for tag in or_default(&args.tag, "abx".to_string()) {
                for alg in or_default(&args.alg, Alg::Relu) {
                    for alpha in or_default(&args.alpha, 0.0) {
                        for beta in or_default(&args.beta, 0.0) {
                            for po in &post_ops {
                                for dims in &shapes {
                                    let mut prb = eltwise::Problem::new(dims.clone(), alg)?
                                        .with_dir(dir)
                                        .with_dt(dt)
                                        .with_tag(tag.clone())
                                        .with_alpha_beta(alpha, beta)
                                        .with_inplace(args.inplace);
                                    if let Some(po) = po {
                                        prb = prb.with_post_op(*po);
                                    }
                                    out.push(prb);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(out)
}
