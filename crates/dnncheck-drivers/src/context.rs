//! Per-run context shared by every test case.

use std::fmt;
use std::sync::Arc;

use dnncheck_common::{BenchMode, HarnessConfig, MemoryDesc, PerfConfig, ResState, TestResult};
use dnncheck_kernels::{Arg, Engine, NativeEngine, Primitive, PrimitiveDesc};
use tracing::debug;

use crate::error::{Result, crit};

/// Configuration plus the engine primitives are created on.
#[derive(Clone)]
pub struct BenchContext {
    config: HarnessConfig,
    engine: Arc<dyn Engine>,
}

impl BenchContext {
    /// Context backed by the native CPU engine.
    pub fn new(config: HarnessConfig) -> Self {
        Self::with_engine(config, Arc::new(NativeEngine::new()))
    }

    pub fn with_engine(config: HarnessConfig, engine: Arc<dyn Engine>) -> Self {
        Self { config, engine }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub fn mode(&self) -> BenchMode {
        self.config.run.mode
    }

    pub fn perf(&self) -> &PerfConfig {
        &self.config.perf
    }

    /// Create a primitive, mapping an unimplemented configuration to the
    /// UNIMPLEMENTED state. `Ok(None)` means the case is over.
    pub fn create_primitive(
        &self,
        desc: &PrimitiveDesc,
        hint: Option<&dyn Primitive>,
        res: &mut TestResult,
    ) -> Result<Option<Box<dyn Primitive>>> {
        match self.engine.create(desc, hint) {
            Ok(prim) => Ok(Some(prim)),
            Err(e) if e.is_unimplemented() => {
                debug!(engine = self.engine.name(), kind = desc.kind_name(), error = %e, "unimplemented");
                res.state = ResState::Unimplemented;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Memory descriptor `prim` expects for `arg`.
pub(crate) fn query_md(prim: &dyn Primitive, arg: Arg) -> Result<MemoryDesc> {
    prim.query_md(arg)
        .ok_or_else(|| crit("query_md", format!("{} has no memory descriptor for {arg}", prim.impl_name())))
}

impl Default for BenchContext {
    fn default() -> Self {
        Self::new(HarnessConfig::default())
    }
}

impl fmt::Debug for BenchContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BenchContext")
            .field("config", &self.config)
            .field("engine", &self.engine.name())
            .finish()
    }
}
