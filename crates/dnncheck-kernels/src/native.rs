//! Native CPU engine.

use dnncheck_common::eltwise::PostOp;
use dnncheck_common::{DataType, MemoryDesc};
use tracing::debug;

use crate::args::{Arg, ExecArgs};
use crate::cpu::eltwise as elt;
use crate::cpu::layer_norm::{LayerNormConfig, layer_norm_backward, layer_norm_forward};
use crate::engine::{EltwiseDesc, Engine, LnormDesc, Primitive, PrimitiveDesc, PropKind};
use crate::error::{Result, invalid_args, unimplemented};

const LNORM_IMPL: &str = "ref:native";
const ELTWISE_IMPL: &str = "ref:native";

/// Engine backed by the kernels in [`crate::cpu`].
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEngine;

impl NativeEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Engine for NativeEngine {
    fn name(&self) -> &'static str {
        "native"
    }

    fn create(&self, desc: &PrimitiveDesc, hint: Option<&dyn Primitive>) -> Result<Box<dyn Primitive>> {
        let prim: Box<dyn Primitive> = match desc {
            PrimitiveDesc::Lnorm(d) => Box::new(LnormPrimitive::new(d, hint)?),
            PrimitiveDesc::Eltwise(d) => Box::new(EltwisePrimitive::new(d)?),
        };
        debug!(engine = self.name(), kind = desc.kind_name(), impl_name = prim.impl_name(), "created primitive");
        Ok(prim)
    }
}

fn f32_md(dims: &[usize]) -> MemoryDesc {
    MemoryDesc::new(dims, DataType::F32)
}

fn scratchpad_md() -> MemoryDesc {
    f32_md(&[0])
}

// ── Layer normalization ────────────────────────────────────────────

struct LnormPrimitive {
    desc: PrimitiveDesc,
    d: LnormDesc,
}

impl LnormPrimitive {
    fn new(d: &LnormDesc, hint: Option<&dyn Primitive>) -> Result<Self> {
        if !matches!(d.data.dt(), DataType::F32 | DataType::Bf16 | DataType::F16) {
            return Err(unimplemented(format!("layer normalization for {}", d.data.dt())));
        }
        if d.stat.dt() != DataType::F32 {
            return Err(unimplemented(format!("{} statistics", d.stat.dt())));
        }
        if !d.prop.is_fwd() {
            match hint.map(|h| h.desc()) {
                Some(PrimitiveDesc::Lnorm(h)) if h.prop == PropKind::ForwardTraining => {}
                Some(_) => return Err(invalid_args("backward hint is not a forward-training layer normalization")),
                None => return Err(invalid_args("backward layer normalization requires a forward hint")),
            }
        }
        Ok(Self { desc: PrimitiveDesc::Lnorm(d.clone()), d: d.clone() })
    }

    fn config(&self) -> LayerNormConfig {
        let f = self.d.flags;
        LayerNormConfig::new(self.d.c(), self.d.eps)
            .with_affine(f.scale_shift || f.scale, f.scale_shift || f.shift)
    }

    /// `(gamma, beta)` as bound; empty when the flag is off.
    fn affine(&self, args: &ExecArgs) -> Result<(Vec<f32>, Vec<f32>)> {
        let f = self.d.flags;
        let c = self.d.c();
        if f.scale_shift {
            let mut ss = args.get(Arg::ScaleShift)?.to_f32_logical();
            if ss.len() != 2 * c {
                return Err(invalid_args(format!("scale-shift holds {} values, expected {}", ss.len(), 2 * c)));
            }
            let beta = ss.split_off(c);
            return Ok((ss, beta));
        }
        let gamma = if f.scale { args.get(Arg::Scale)?.to_f32_logical() } else { Vec::new() };
        let beta = if f.shift { args.get(Arg::Shift)?.to_f32_logical() } else { Vec::new() };
        Ok((gamma, beta))
    }

    fn forward(&self, args: &mut ExecArgs) -> Result<()> {
        let src = args.get(Arg::Src)?.to_f32_logical();
        let (gamma, beta) = self.affine(args)?;
        let global = self.d.flags.global_stats;
        let stats = if global {
            Some((args.get(Arg::Mean)?.to_f32_logical(), args.get(Arg::Variance)?.to_f32_logical()))
        } else {
            None
        };
        let out = layer_norm_forward(
            &src,
            &gamma,
            &beta,
            stats.as_ref().map(|(m, v)| (m.as_slice(), v.as_slice())),
            &self.config(),
        )?;

        let dst = if self.d.inplace { Arg::Src } else { Arg::Dst };
        args.get_mut(dst)?.write_logical(&out.output)?;
        if self.d.prop == PropKind::ForwardTraining && !global {
            args.get_mut(Arg::Mean)?.write_logical(&out.mean)?;
            args.get_mut(Arg::Variance)?.write_logical(&out.var)?;
        }
        Ok(())
    }

    fn backward(&self, args: &mut ExecArgs) -> Result<()> {
        let src = args.get(Arg::Src)?.to_f32_logical();
        let diff_dst = args.get(Arg::DiffDst)?.to_f32_logical();
        let mean = args.get(Arg::Mean)?.to_f32_logical();
        let var = args.get(Arg::Variance)?.to_f32_logical();
        let (gamma, _) = self.affine(args)?;
        let out = layer_norm_backward(
            &diff_dst,
            &src,
            &gamma,
            &mean,
            &var,
            &self.config(),
            self.d.flags.global_stats,
        )?;

        let diff_src = if self.d.inplace { Arg::DiffDst } else { Arg::DiffSrc };
        args.get_mut(diff_src)?.write_logical(&out.grad_input)?;

        if self.d.prop == PropKind::Backward {
            let f = self.d.flags;
            if f.scale_shift {
                let mut dss = out.grad_gamma;
                dss.extend_from_slice(&out.grad_beta);
                args.get_mut(Arg::DiffScaleShift)?.write_logical(&dss)?;
            } else {
                if f.scale {
                    args.get_mut(Arg::DiffScale)?.write_logical(&out.grad_gamma)?;
                }
                if f.shift {
                    args.get_mut(Arg::DiffShift)?.write_logical(&out.grad_beta)?;
                }
            }
        }
        Ok(())
    }
}

impl Primitive for LnormPrimitive {
    fn impl_name(&self) -> &str {
        LNORM_IMPL
    }

    fn desc(&self) -> &PrimitiveDesc {
        &self.desc
    }

    fn query_md(&self, arg: Arg) -> Option<MemoryDesc> {
        let d = &self.d;
        let c = d.c();
        let fwd = d.prop.is_fwd();
        match arg {
            Arg::Src => Some(d.data.clone()),
            Arg::Dst if fwd => Some(d.data.clone()),
            Arg::DiffDst | Arg::DiffSrc if !fwd => Some(d.data.clone()),
            Arg::Mean | Arg::Variance => Some(d.stat.clone()),
            Arg::ScaleShift if d.flags.scale_shift => Some(f32_md(&[2, c])),
            Arg::Scale if d.flags.scale => Some(f32_md(&[c])),
            Arg::Shift if d.flags.shift => Some(f32_md(&[c])),
            Arg::DiffScaleShift if !fwd && d.flags.scale_shift => Some(f32_md(&[2, c])),
            Arg::DiffScale if !fwd && d.flags.scale => Some(f32_md(&[c])),
            Arg::DiffShift if !fwd && d.flags.shift => Some(f32_md(&[c])),
            Arg::Scratchpad => Some(scratchpad_md()),
            _ => None,
        }
    }

    fn execute(&self, args: &mut ExecArgs) -> Result<()> {
        if self.d.prop.is_fwd() { self.forward(args) } else { self.backward(args) }
    }
}

// ── Eltwise ────────────────────────────────────────────────────────

struct EltwisePrimitive {
    desc: PrimitiveDesc,
    d: EltwiseDesc,
}

impl EltwisePrimitive {
    fn new(d: &EltwiseDesc) -> Result<Self> {
        if !d.prop.is_fwd() {
            if d.data.dt().is_integral() {
                return Err(unimplemented(format!("eltwise backward for {}", d.data.dt())));
            }
            if !d.post_ops.is_empty() {
                return Err(unimplemented("post-ops on eltwise backward"));
            }
        }
        Ok(Self { desc: PrimitiveDesc::Eltwise(d.clone()), d: d.clone() })
    }

    fn forward(&self, args: &mut ExecArgs) -> Result<()> {
        let d = &self.d;
        let src = args.get(Arg::Src)?.to_f32_logical();
        let mut dst = vec![0.0f32; src.len()];
        elt::forward_slice(d.alg, d.alpha, d.beta, &src, &mut dst);

        for po in &d.post_ops {
            match po {
                PostOp::BinaryAdd { .. } => {
                    let src1 = args.get(Arg::Src1)?.to_f32_logical();
                    if src1.len() != dst.len() {
                        return Err(invalid_args("binary post-op source size mismatch"));
                    }
                    for (o, s1) in dst.iter_mut().zip(src1) {
                        *o = (*o as f64 + s1 as f64) as f32;
                    }
                }
            }
        }

        let out = if d.inplace { Arg::Src } else { Arg::Dst };
        args.get_mut(out)?.write_logical(&dst)?;
        Ok(())
    }

    fn backward(&self, args: &mut ExecArgs) -> Result<()> {
        let d = &self.d;
        let operand = if d.alg.use_dst() { Arg::Dst } else { Arg::Src };
        let arg = args.get(operand)?.to_f32_logical();
        let diff_dst = args.get(Arg::DiffDst)?.to_f32_logical();
        if arg.len() != diff_dst.len() {
            return Err(invalid_args("diff_dst size mismatch"));
        }
        let mut diff_src = vec![0.0f32; arg.len()];
        elt::backward_slice(d.alg, d.alpha, d.beta, &diff_dst, &arg, &mut diff_src);

        let out = if d.inplace { Arg::DiffDst } else { Arg::DiffSrc };
        args.get_mut(out)?.write_logical(&diff_src)?;
        Ok(())
    }
}

impl Primitive for EltwisePrimitive {
    fn impl_name(&self) -> &str {
        ELTWISE_IMPL
    }

    fn desc(&self) -> &PrimitiveDesc {
        &self.desc
    }

    fn query_md(&self, arg: Arg) -> Option<MemoryDesc> {
        let d = &self.d;
        let fwd = d.prop.is_fwd();
        match arg {
            Arg::Src if fwd || !d.alg.use_dst() => Some(d.data.clone()),
            Arg::Dst if fwd || d.alg.use_dst() => Some(d.data.clone()),
            Arg::DiffDst | Arg::DiffSrc if !fwd => Some(d.data.clone()),
            Arg::Src1 => d.post_ops.iter().find_map(|po| match po {
                PostOp::BinaryAdd { dt } => Some(d.data.with_dt(*dt)),
            }),
            Arg::Scratchpad => Some(scratchpad_md()),
            _ => None,
        }
    }

    fn execute(&self, args: &mut ExecArgs) -> Result<()> {
        if self.d.prop.is_fwd() { self.forward(args) } else { self.backward(args) }
    }
}
