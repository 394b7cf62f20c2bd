//! Engines that misbehave on purpose. The harness has to notice.

use std::sync::Arc;

use dnncheck_common::eltwise::{self, Alg};
use dnncheck_common::{DataType, Direction, HarnessConfig, MemoryDesc, ResState, lnorm};
use dnncheck_drivers::{BenchContext, eltwise as elt_driver, lnorm as lnorm_driver};
use dnncheck_kernels::{Arg, Engine, EngineError, ExecArgs, NativeEngine, Primitive, PrimitiveDesc, Result};

/// Engine that implements nothing.
struct EmptyEngine;

impl Engine for EmptyEngine {
    fn name(&self) -> &'static str {
        "empty"
    }

    fn create(&self, desc: &PrimitiveDesc, _hint: Option<&dyn Primitive>) -> Result<Box<dyn Primitive>> {
        Err(EngineError::Unimplemented { what: desc.kind_name().to_string() })
    }
}

#[derive(Clone, Copy)]
enum Fault {
    /// Execution reports an error.
    Fail,
    /// First value of the given argument is overwritten after execution.
    Corrupt(Arg, f32),
    /// Every value of the given argument is overwritten after execution.
    Fill(Arg, f32),
}

struct FaultyEngine {
    fault: Fault,
}

struct FaultyPrimitive {
    inner: Box<dyn Primitive>,
    fault: Fault,
}

impl Engine for FaultyEngine {
    fn name(&self) -> &'static str {
        "faulty"
    }

    fn create(&self, desc: &PrimitiveDesc, hint: Option<&dyn Primitive>) -> Result<Box<dyn Primitive>> {
        let inner = NativeEngine::new().create(desc, hint)?;
        Ok(Box::new(FaultyPrimitive { inner, fault: self.fault }))
    }
}

impl Primitive for FaultyPrimitive {
    fn impl_name(&self) -> &str {
        "jit:perturbed"
    }

    fn desc(&self) -> &PrimitiveDesc {
        self.inner.desc()
    }

    fn query_md(&self, arg: Arg) -> Option<MemoryDesc> {
        self.inner.query_md(arg)
    }

    fn execute(&self, args: &mut ExecArgs) -> Result<()> {
        match self.fault {
            Fault::Fail => Err(EngineError::Execution("device lost".to_string())),
            Fault::Corrupt(arg, value) => {
                self.inner.execute(args)?;
                args.get_mut(arg)?.set_logical(0, value);
                Ok(())
            }
            Fault::Fill(arg, value) => {
                self.inner.execute(args)?;
                let buf = args.get_mut(arg)?;
                for idx in 0..buf.desc().nelems() {
                    buf.set_logical(idx, value);
                }
                Ok(())
            }
        }
    }
}

fn ctx(engine: impl Engine + 'static) -> BenchContext {
    BenchContext::with_engine(HarnessConfig::default(), Arc::new(engine))
}

#[test]
fn unimplemented_engine() {
    let ctx = ctx(EmptyEngine);
    let res = lnorm_driver::run(&ctx, &lnorm::Problem::new(vec![2, 8]).unwrap());
    assert_eq!(res.state, ResState::Unimplemented);

    let prb = lnorm::Problem::new(vec![2, 8]).unwrap().with_dir(Direction::BwdDw);
    assert_eq!(lnorm_driver::run(&ctx, &prb).state, ResState::Unimplemented);

    let res = elt_driver::run(&ctx, &eltwise::Problem::new(vec![8], Alg::Relu).unwrap());
    assert_eq!(res.state, ResState::Unimplemented);
    assert!(res.impl_name.is_empty());
}

#[test]
fn execution_error_is_fatal() {
    let ctx = ctx(FaultyEngine { fault: Fault::Fail });
    let res = lnorm_driver::run(&ctx, &lnorm::Problem::new(vec![4, 16]).unwrap());
    assert_eq!(res.state, ResState::Failed);
    assert!(res.fatal.as_deref().is_some_and(|m| m.contains("device lost")));
    assert_eq!(res.impl_name, "jit:perturbed");

    let res = elt_driver::run(&ctx, &eltwise::Problem::new(vec![8], Alg::Tanh).unwrap());
    assert_eq!(res.state, ResState::Failed);
    assert!(res.fatal.is_some());
}

#[test]
fn corrupted_destination_fails() {
    let ctx = ctx(FaultyEngine { fault: Fault::Corrupt(Arg::Dst, 1.0e3) });
    let res = lnorm_driver::run(&ctx, &lnorm::Problem::new(vec![4, 16]).unwrap());
    assert_eq!(res.state, ResState::Failed);
    assert_eq!(res.errors, 1);
    assert!(res.fatal.is_none());

    let res = elt_driver::run(&ctx, &eltwise::Problem::new(vec![64], Alg::Logistic).unwrap());
    assert_eq!(res.state, ResState::Failed);
    assert_eq!(res.errors, 1);
}

#[test]
fn wrong_statistics_fail() {
    let ctx = ctx(FaultyEngine { fault: Fault::Corrupt(Arg::Mean, 1234.5) });
    let res = lnorm_driver::run(&ctx, &lnorm::Problem::new(vec![4, 16]).unwrap());
    assert_eq!(res.state, ResState::Failed);
    assert!(res.errors >= 1);
}

#[test]
fn corrupted_gradient_fails() {
    let ctx = ctx(FaultyEngine { fault: Fault::Corrupt(Arg::DiffSrc, -7.0e2) });
    let prb = lnorm::Problem::new(vec![4, 8]).unwrap().with_dir(Direction::BwdD);
    assert_eq!(lnorm_driver::run(&ctx, &prb).state, ResState::Failed);

    let prb = eltwise::Problem::new(vec![64], Alg::Square).unwrap().with_dir(Direction::BwdD);
    assert_eq!(elt_driver::run(&ctx, &prb).state, ResState::Failed);
}

#[test]
fn integral_destination_is_checked() {
    let ctx = ctx(FaultyEngine { fault: Fault::Fill(Arg::Dst, 100.0) });
    for dt in [DataType::S8, DataType::U8, DataType::S32] {
        let prb = eltwise::Problem::new(vec![64], Alg::Relu).unwrap().with_dt(dt);
        let res = elt_driver::run(&ctx, &prb);
        assert_eq!(res.state, ResState::Failed, "{}", prb.repro());
        assert!(res.errors > 0);
    }
}

#[test]
fn clip_gradient_is_checked() {
    let ctx = ctx(FaultyEngine { fault: Fault::Fill(Arg::DiffSrc, 123.0) });
    let prb = eltwise::Problem::new(vec![64], Alg::Clip)
        .unwrap()
        .with_alpha_beta(-2.0, 3.0)
        .with_dir(Direction::BwdD);
    let res = elt_driver::run(&ctx, &prb);
    assert_eq!(res.state, ResState::Failed);
    assert!(res.errors > 0);
}

#[test]
fn reduced_precision_statistics_are_accepted() {
    let ctx = ctx(FaultyEngine { fault: Fault::Corrupt(Arg::Mean, 1234.5) });
    let prb = lnorm::Problem::new(vec![2, 1000]).unwrap().with_dt(DataType::Bf16);
    let res = lnorm_driver::run(&ctx, &prb);
    assert_eq!(res.state, ResState::Passed);
    assert_eq!(res.errors, 0);
}
