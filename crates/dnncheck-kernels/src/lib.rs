//! Primitive provider for dnncheck.
//!
//! The drivers talk to a compute library only through the [`Engine`] and
//! [`Primitive`] traits. [`NativeEngine`] implements them with the CPU
//! kernels in [`cpu`]; [`graph`] offers the op/partition path on top of the
//! same kernels.

pub mod args;
pub mod cpu;
pub mod engine;
pub mod error;
pub mod graph;
pub mod native;

pub use args::{Arg, ExecArgs};
pub use engine::{EltwiseDesc, Engine, LnormDesc, Primitive, PrimitiveDesc, PropKind};
pub use error::{EngineError, Result};
pub use native::NativeEngine;
