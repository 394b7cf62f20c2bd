//! dnncheck command-line driver.
//!
//! The binary is a thin shell over this library so the argument surface,
//! batch expansion and reporting can be tested without spawning processes.

pub mod args;
pub mod batch;
pub mod logging;
pub mod report;
pub mod runner;

use anyhow::{Context, Result};
use dnncheck_common::HarnessConfig;

pub use args::{Cli, Commands, ConfigAction, EltwiseArgs, LnormArgs};
pub use report::{CaseRecord, Report, Summary};

// Exit codes
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_USAGE: i32 = 2;

/// Size the global rayon pool when the configuration asks for a fixed
/// thread count. Only the first call in a process has an effect.
pub fn init_thread_pool(config: &HarnessConfig) -> Result<()> {
    if let Some(n) = config.run.num_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .with_context(|| format!("failed to build a {n}-thread pool"))?;
    }
    Ok(())
}

/// Exit code for a finished run.
pub fn exit_code(summary: &Summary) -> i32 {
    if summary.has_failures() { EXIT_FAILED } else { EXIT_SUCCESS }
}
