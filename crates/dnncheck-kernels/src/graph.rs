//! Minimal graph API: ops over logical tensors are grouped into
//! partitions, and supported partitions compile into executable objects.
//!
//! Ops that share a logical tensor id land in the same partition. Every op
//! kind here is unary and runs on the native eltwise kernels.

use std::collections::BTreeMap;
use std::fmt;

use dnncheck_common::eltwise::Alg;
use dnncheck_common::{DataType, WorkBuffer};
use tracing::debug;

use crate::cpu::eltwise as elt;
use crate::error::{EngineError, Result, invalid_args, unimplemented};

// ── Logical tensors and ops ─────────────────────────────────────────

/// Shape and type of a value flowing between ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalTensor {
    pub id: usize,
    pub dt: DataType,
    pub dims: Vec<usize>,
}

impl LogicalTensor {
    pub fn new(id: usize, dt: DataType, dims: &[usize]) -> Self {
        Self { id, dt, dims: dims.to_vec() }
    }

    pub fn nelems(&self) -> usize {
        self.dims.iter().product()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Abs,
    Elu,
    Exp,
    Gelu,
    HardTanh,
    Log,
    Sigmoid,
    SoftPlus,
    ReLU,
    Round,
    Sqrt,
    Square,
    Tanh,
    HardSwish,
}

impl OpKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            OpKind::Abs => "Abs",
            OpKind::Elu => "Elu",
            OpKind::Exp => "Exp",
            OpKind::Gelu => "GELU",
            OpKind::HardTanh => "HardTanh",
            OpKind::Log => "Log",
            OpKind::Sigmoid => "Sigmoid",
            OpKind::SoftPlus => "SoftPlus",
            OpKind::ReLU => "ReLU",
            OpKind::Round => "Round",
            OpKind::Sqrt => "Sqrt",
            OpKind::Square => "Square",
            OpKind::Tanh => "Tanh",
            OpKind::HardSwish => "HardSwish",
        }
    }

    /// Attributes the op must carry.
    fn required_attrs(self) -> &'static [&'static str] {
        match self {
            OpKind::Elu => &["alpha"],
            OpKind::HardTanh => &["min", "max"],
            _ => &[],
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    pub id: usize,
    pub kind: OpKind,
    pub name: String,
    pub inputs: Vec<LogicalTensor>,
    pub outputs: Vec<LogicalTensor>,
    attrs: BTreeMap<String, f32>,
}

impl Op {
    pub fn new(
        id: usize,
        kind: OpKind,
        inputs: Vec<LogicalTensor>,
        outputs: Vec<LogicalTensor>,
        name: impl Into<String>,
    ) -> Self {
        Self { id, kind, name: name.into(), inputs, outputs, attrs: BTreeMap::new() }
    }

    pub fn with_attr(mut self, name: &str, value: f32) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn set_attr(&mut self, name: &str, value: f32) {
        self.attrs.insert(name.to_string(), value);
    }

    pub fn attr(&self, name: &str) -> Option<f32> {
        self.attrs.get(name).copied()
    }

    /// Kernel algorithm with its `(alpha, beta)` for this op.
    fn lower(&self) -> Result<(Alg, f32, f32)> {
        let attr = |name: &str| {
            self.attr(name).ok_or_else(|| invalid_args(format!("{} op {} lacks attribute {name}", self.kind, self.id)))
        };
        Ok(match self.kind {
            OpKind::Abs => (Alg::Abs, 0.0, 0.0),
            OpKind::Elu => (Alg::Elu, attr("alpha")?, 0.0),
            OpKind::Exp => (Alg::Exp, 0.0, 0.0),
            OpKind::Gelu => (Alg::GeluErf, 0.0, 0.0),
            OpKind::HardTanh => (Alg::Clip, attr("min")?, attr("max")?),
            OpKind::Log => (Alg::Log, 0.0, 0.0),
            OpKind::Sigmoid => (Alg::Logistic, 0.0, 0.0),
            OpKind::SoftPlus => (Alg::SoftRelu, 0.0, 0.0),
            OpKind::ReLU => (Alg::Relu, 0.0, 0.0),
            OpKind::Round => (Alg::Round, 0.0, 0.0),
            OpKind::Sqrt => (Alg::Sqrt, 0.0, 0.0),
            OpKind::Square => (Alg::Square, 0.0, 0.0),
            OpKind::Tanh => (Alg::Tanh, 0.0, 0.0),
            OpKind::HardSwish => (Alg::HardSwish, 0.0, 0.0),
        })
    }
}

// ── Graph ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone)]
pub struct Graph {
    ops: Vec<Op>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `op` after checking its arity, shapes, attributes and id.
    pub fn add_op(&mut self, op: Op) -> Result<()> {
        if self.ops.iter().any(|o| o.id == op.id) {
            return Err(invalid_args(format!("duplicate op id {}", op.id)));
        }
        if op.inputs.len() != 1 || op.outputs.len() != 1 {
            return Err(invalid_args(format!(
                "{} op {} takes one input and one output, got {} and {}",
                op.kind,
                op.id,
                op.inputs.len(),
                op.outputs.len()
            )));
        }
        if op.inputs[0].dims != op.outputs[0].dims {
            return Err(invalid_args(format!("{} op {} changes shape", op.kind, op.id)));
        }
        if let Some(missing) = op.kind.required_attrs().iter().find(|a| op.attr(a).is_none()) {
            return Err(invalid_args(format!("{} op {} lacks attribute {missing}", op.kind, op.id)));
        }
        self.ops.push(op);
        Ok(())
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Group ops connected through shared tensor ids, in insertion order.
    pub fn get_partitions(&self) -> Vec<Partition> {
        let mut group: Vec<usize> = (0..self.ops.len()).collect();
        for i in 0..self.ops.len() {
            for j in 0..i {
                let linked = self.ops[j].outputs.iter().any(|o| self.ops[i].inputs.iter().any(|t| t.id == o.id));
                if linked {
                    let (from, to) = (group[i], group[j]);
                    for g in group.iter_mut().filter(|g| **g == from) {
                        *g = to;
                    }
                }
            }
        }

        let mut roots: Vec<usize> = group.clone();
        roots.sort_unstable();
        roots.dedup();
        let partitions: Vec<Partition> = roots
            .into_iter()
            .enumerate()
            .map(|(pid, root)| {
                let ops: Vec<Op> =
                    self.ops.iter().zip(&group).filter(|(_, g)| **g == root).map(|(op, _)| op.clone()).collect();
                Partition::new(pid, ops)
            })
            .collect();
        debug!(ops = self.ops.len(), partitions = partitions.len(), "partitioned graph");
        partitions
    }
}

// ── Partitions ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Partition {
    id: usize,
    ops: Vec<Op>,
    inputs: Vec<LogicalTensor>,
    outputs: Vec<LogicalTensor>,
}

impl Partition {
    fn new(id: usize, ops: Vec<Op>) -> Self {
        let produced = |t: &LogicalTensor| ops.iter().any(|o| o.outputs.iter().any(|x| x.id == t.id));
        let consumed = |t: &LogicalTensor| ops.iter().any(|o| o.inputs.iter().any(|x| x.id == t.id));
        let inputs = ops.iter().flat_map(|o| o.inputs.iter()).filter(|t| !produced(t)).cloned().collect();
        let outputs = ops.iter().flat_map(|o| o.outputs.iter()).filter(|t| !consumed(t)).cloned().collect();
        Self { id, ops, inputs, outputs }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Floating-point tensors only.
    pub fn is_supported(&self) -> bool {
        self.ops
            .iter()
            .flat_map(|o| o.inputs.iter().chain(&o.outputs))
            .all(|t| matches!(t.dt, DataType::F32 | DataType::Bf16 | DataType::F16))
    }

    pub fn get_in_ports(&self) -> &[LogicalTensor] {
        &self.inputs
    }

    pub fn get_out_ports(&self) -> &[LogicalTensor] {
        &self.outputs
    }

    /// Compile for the given port tensors, which must match this
    /// partition's ports in order.
    pub fn compile(&self, inputs: &[LogicalTensor], outputs: &[LogicalTensor]) -> Result<CompiledPartition> {
        if !self.is_supported() {
            return Err(unimplemented(format!("partition {} with integral tensors", self.id)));
        }
        if inputs != self.inputs.as_slice() || outputs != self.outputs.as_slice() {
            return Err(invalid_args(format!("ports do not match partition {}", self.id)));
        }
        let steps = self
            .ops
            .iter()
            .map(|op| {
                let (alg, alpha, beta) = op.lower()?;
                Ok(Step { alg, alpha, beta, input: op.inputs[0].id, output: op.outputs[0].id })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(CompiledPartition { inputs: inputs.to_vec(), outputs: outputs.to_vec(), steps })
    }
}

#[derive(Debug, Clone)]
struct Step {
    alg: Alg,
    alpha: f32,
    beta: f32,
    input: usize,
    output: usize,
}

/// Executable form of a [`Partition`].
#[derive(Debug, Clone)]
pub struct CompiledPartition {
    inputs: Vec<LogicalTensor>,
    outputs: Vec<LogicalTensor>,
    steps: Vec<Step>,
}

impl CompiledPartition {
    /// Run over buffers bound to the input and output ports in order.
    /// Intermediate values are rounded to their logical tensor's type.
    pub fn execute(&self, inputs: &[&WorkBuffer], outputs: &mut [&mut WorkBuffer]) -> Result<()> {
        if inputs.len() != self.inputs.len() || outputs.len() != self.outputs.len() {
            return Err(invalid_args(format!(
                "expected {} inputs and {} outputs, got {} and {}",
                self.inputs.len(),
                self.outputs.len(),
                inputs.len(),
                outputs.len()
            )));
        }

        let mut values: BTreeMap<usize, Vec<f32>> = BTreeMap::new();
        for (port, buf) in self.inputs.iter().zip(inputs) {
            if buf.nelems() != port.nelems() {
                return Err(invalid_args(format!("input {} holds {} values, expected {}", port.id, buf.nelems(), port.nelems())));
            }
            values.insert(port.id, buf.to_f32_logical());
        }

        for step in &self.steps {
            let src = values
                .get(&step.input)
                .ok_or_else(|| EngineError::Execution(format!("tensor {} has no value", step.input)))?;
            let mut dst = vec![0.0f32; src.len()];
            elt::forward_slice(step.alg, step.alpha, step.beta, src, &mut dst);
            values.insert(step.output, dst);
        }

        for (port, buf) in self.outputs.iter().zip(outputs.iter_mut()) {
            let value = values
                .get(&port.id)
                .ok_or_else(|| EngineError::Execution(format!("output {} was not produced", port.id)))?;
            buf.write_logical(value)?;
        }
        Ok(())
    }
}
