//! Execution timing.

use std::time::{Duration, Instant};

use dnncheck_common::{PerfConfig, PerfTimer};
use tracing::debug;

use crate::error::Result;

/// Run `exec` `warmup` times untimed, then time it until `fix_times` runs
/// are recorded or the per-problem budget is spent. At least one run is
/// always timed.
pub fn measure_perf<F>(cfg: &PerfConfig, timer: &mut PerfTimer, mut exec: F) -> Result<()>
where
    F: FnMut() -> Result<()>,
{
    for _ in 0..cfg.warmup {
        exec()?;
    }

    let budget = Duration::from_secs_f64(cfg.max_ms_per_prb.max(0.0) / 1e3);
    let start = Instant::now();
    let mut runs = 0usize;
    loop {
        let t = Instant::now();
        exec()?;
        timer.record(t.elapsed());
        runs += 1;

        let done = match cfg.fix_times {
            Some(n) => runs >= n,
            None => start.elapsed() >= budget,
        };
        if done {
            break;
        }
    }

    debug!(runs, avg_ms = timer.avg_ms(), min_ms = timer.min_ms, max_ms = timer.max_ms, "perf");
    Ok(())
}
