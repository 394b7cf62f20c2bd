//! Test-result state shared by the generator, the comparator and the
//! drivers. One [`TestResult`] is the single source of truth for a case's
//! verdict; every stage receives it by `&mut` and writes only its own
//! outcomes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one test case.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResState {
    /// Nothing decided yet.
    #[default]
    Untested,
    /// Executed without a correctness check (performance-only runs).
    Executed,
    Listed,
    Skipped,
    Mistrusted,
    Unimplemented,
    Failed,
    Passed,
}

impl ResState {
    /// States after which no further work is done for the case.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ResState::Listed
                | ResState::Skipped
                | ResState::Mistrusted
                | ResState::Unimplemented
                | ResState::Failed
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ResState::Untested => "UNTESTED",
            ResState::Executed => "EXECUTED",
            ResState::Listed => "LISTED",
            ResState::Skipped => "SKIPPED",
            ResState::Mistrusted => "MISTRUSTED",
            ResState::Unimplemented => "UNIMPLEMENTED",
            ResState::Failed => "FAILED",
            ResState::Passed => "PASSED",
        }
    }
}

impl fmt::Display for ResState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable reason attached to a SKIPPED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    CaseNotSupported,
    InvalidCase,
    NotEnoughRam,
    SkipImplHit,
}

impl SkipReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            SkipReason::CaseNotSupported => "CASE_NOT_SUPPORTED",
            SkipReason::InvalidCase => "INVALID_CASE",
            SkipReason::NotEnoughRam => "NOT_ENOUGH_RAM",
            SkipReason::SkipImplHit => "SKIP_IMPL_HIT",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulated execution timings in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfTimer {
    pub times: usize,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl PerfTimer {
    pub fn record(&mut self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1e3;
        if self.times == 0 {
            self.min_ms = ms;
            self.max_ms = ms;
        } else {
            self.min_ms = self.min_ms.min(ms);
            self.max_ms = self.max_ms.max(ms);
        }
        self.times += 1;
        self.total_ms += ms;
    }

    pub fn avg_ms(&self) -> f64 {
        if self.times == 0 { 0.0 } else { self.total_ms / self.times as f64 }
    }
}

/// Verdict and diagnostics of one test case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub state: ResState,
    pub reason: Option<SkipReason>,
    pub impl_name: String,
    /// Mismatching elements across all comparisons.
    pub errors: usize,
    /// Compared elements across all comparisons.
    pub total: usize,
    pub timer: PerfTimer,
    /// Message of a fatal collaborator failure, if one happened.
    pub fatal: Option<String>,
}

impl TestResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_skipped(&mut self, reason: SkipReason) {
        self.state = ResState::Skipped;
        self.reason = Some(reason);
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Fold one comparison outcome into the verdict.
    ///
    /// FAILED dominates everything, MISTRUSTED dominates a pass, and a pass
    /// only promotes a case that has not been decided yet.
    pub fn record_compare(&mut self, total: usize, errors: usize, mistrusted: bool) {
        self.total += total;
        self.errors += errors;
        if errors > 0 {
            self.state = ResState::Failed;
        } else if mistrusted {
            if self.state != ResState::Failed {
                self.state = ResState::Mistrusted;
            }
        } else if matches!(self.state, ResState::Untested | ResState::Executed) {
            self.state = ResState::Passed;
        }
    }

    /// Record a collaborator failure that aborts the case.
    pub fn set_fatal(&mut self, message: impl Into<String>) {
        self.state = ResState::Failed;
        self.fatal = Some(message.into());
    }

    /// Mark an executed case that never went through a comparison.
    pub fn finish_execution(&mut self) {
        if self.state == ResState::Untested {
            self.state = ResState::Executed;
        }
    }
}
