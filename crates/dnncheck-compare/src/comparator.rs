//! Element-wise comparison of a reference buffer against a computed one.

use dnncheck_common::{DataKind, DataType, RefBuffer, ResState, TestResult, WorkBuffer};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::tolerance::{DEFAULT_ZERO_TRUST_PERCENT, Tolerance};

/// References at or below this magnitude are checked by absolute difference.
const NEAR_ZERO: f32 = 1e-5;

/// Mismatches kept in a report, lowest indices first.
const MAX_REPORTED: usize = 32;

/// Mismatches echoed to the log.
const MAX_LOGGED: usize = 10;

/// What an exception predicate gets to see about a failing element.
#[derive(Debug, Clone, Copy)]
pub struct CheckArgs {
    /// Logical (row-major) index of the element.
    pub idx: usize,
    /// Reference value before rounding to the working type.
    pub exp_f32: f32,
    /// Reference value rounded to the working type.
    pub exp: f32,
    pub got: f32,
    /// `|got - exp|`
    pub diff: f32,
    pub rel_diff: f32,
    pub trh: f32,
    pub dt: DataType,
}

/// Driver-specific predicate that may re-admit a failing element.
pub type DriverCheck<'a> = Box<dyn Fn(&CheckArgs) -> bool + Send + Sync + 'a>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mismatch {
    pub idx: usize,
    pub exp: f32,
    pub got: f32,
    pub diff: f32,
    pub rel_diff: f32,
    pub threshold: f32,
}

/// Outcome of one comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompareReport {
    pub kind: DataKind,
    pub total: usize,
    pub errors: usize,
    /// Reference values that are exactly zero.
    pub zeros: usize,
    pub max_diff: f32,
    pub max_rdiff: f32,
    /// First mismatches by index.
    pub mismatches: Vec<Mismatch>,
    pub verdict: ResState,
}

impl CompareReport {
    pub fn passed(&self) -> bool {
        self.verdict == ResState::Passed
    }

    fn failed(kind: DataKind, total: usize) -> Self {
        Self {
            kind,
            total,
            errors: total,
            zeros: 0,
            max_diff: f32::INFINITY,
            max_rdiff: f32::INFINITY,
            mismatches: Vec::new(),
            verdict: ResState::Failed,
        }
    }
}

#[derive(Default)]
struct Acc {
    errors: usize,
    zeros: usize,
    max_diff: f32,
    max_rdiff: f32,
    mismatches: Vec<Mismatch>,
}

impl Acc {
    fn merge(mut self, mut other: Acc) -> Acc {
        self.errors += other.errors;
        self.zeros += other.zeros;
        self.max_diff = self.max_diff.max(other.max_diff);
        self.max_rdiff = self.max_rdiff.max(other.max_rdiff);
        self.mismatches.append(&mut other.mismatches);
        self.mismatches.sort_unstable_by_key(|m| m.idx);
        self.mismatches.truncate(MAX_REPORTED);
        self
    }
}

/// Configured comparison for one tensor kind.
pub struct Comparator<'a> {
    kind: DataKind,
    threshold: f32,
    zero_trust_percent: f32,
    accept_all: bool,
    driver_check: Option<DriverCheck<'a>>,
}

impl<'a> Comparator<'a> {
    /// Exact comparison with the default zero-trust allowance.
    pub fn new(kind: DataKind) -> Self {
        Self {
            kind,
            threshold: 0.0,
            zero_trust_percent: DEFAULT_ZERO_TRUST_PERCENT,
            accept_all: false,
            driver_check: None,
        }
    }

    pub fn with_tolerance(mut self, tol: Tolerance) -> Self {
        self.accept_all = tol.accept_all;
        self.with_threshold(tol.threshold).with_zero_trust_percent(tol.zero_trust_percent)
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// At 100 or more the comparison is never mistrusted; values are
    /// still checked against the threshold.
    pub fn with_zero_trust_percent(mut self, percent: f32) -> Self {
        self.zero_trust_percent = percent;
        self
    }

    /// Record differences without counting any element as an error.
    pub fn accepting_all(mut self) -> Self {
        self.accept_all = true;
        self
    }

    pub fn with_driver_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&CheckArgs) -> bool + Send + Sync + 'a,
    {
        self.driver_check = Some(Box::new(check));
        self
    }

    pub fn kind(&self) -> DataKind {
        self.kind
    }

    /// Compare `exp` against the working buffer `got` and fold the outcome
    /// into `res`.
    pub fn compare(&self, exp: &RefBuffer, got: &WorkBuffer, res: &mut TestResult) -> CompareReport {
        if exp.dims() != got.desc().dims() {
            let msg = format!(
                "{}: reference dims {:?} differ from computed dims {:?}",
                self.kind,
                exp.dims(),
                got.desc().dims()
            );
            tracing::error!("{msg}");
            res.set_fatal(msg);
            return CompareReport::failed(self.kind, exp.nelems());
        }
        self.compare_values(exp.as_slice(), &got.to_f32_logical(), got.dt(), res)
    }

    /// Compare logical-order values already widened to `f32`.
    pub fn compare_values(
        &self,
        exp: &[f32],
        got: &[f32],
        dt: DataType,
        res: &mut TestResult,
    ) -> CompareReport {
        let total = exp.len();
        if got.len() != total {
            let msg = format!("{}: expected {total} values, got {}", self.kind, got.len());
            tracing::error!("{msg}");
            res.set_fatal(msg);
            return CompareReport::failed(self.kind, total);
        }

        let acc = (0..total)
            .into_par_iter()
            .fold(Acc::default, |mut acc, idx| {
                self.check_one(idx, exp[idx], got[idx], dt, &mut acc);
                acc
            })
            .reduce(Acc::default, Acc::merge);

        let mistrusted = self.zero_trust_percent < 100.0
            && acc.zeros as f32 * 100.0 > self.zero_trust_percent * total as f32;

        for m in acc.mismatches.iter().take(MAX_LOGGED) {
            warn!(
                kind = %self.kind,
                idx = m.idx,
                exp = m.exp,
                got = m.got,
                diff = m.diff,
                rdiff = m.rel_diff,
                trh = m.threshold,
                "mismatch"
            );
        }

        res.record_compare(total, acc.errors, mistrusted);
        let verdict = if acc.errors > 0 {
            ResState::Failed
        } else if mistrusted {
            ResState::Mistrusted
        } else {
            ResState::Passed
        };

        debug!(
            kind = %self.kind,
            total,
            errors = acc.errors,
            zeros = acc.zeros,
            max_diff = acc.max_diff,
            max_rdiff = acc.max_rdiff,
            verdict = %verdict,
            "compare"
        );

        CompareReport {
            kind: self.kind,
            total,
            errors: acc.errors,
            zeros: acc.zeros,
            max_diff: acc.max_diff,
            max_rdiff: acc.max_rdiff,
            mismatches: acc.mismatches,
            verdict,
        }
    }

    fn check_one(&self, idx: usize, exp_f32: f32, got: f32, dt: DataType, acc: &mut Acc) {
        let exp = dt.round_to_representable(exp_f32);
        if exp == 0.0 {
            acc.zeros += 1;
        }
        if exp == got || (exp.is_nan() && got.is_nan()) {
            return;
        }

        let diff = (got - exp).abs();
        let rel_diff = diff / if exp.abs() > f32::MIN_POSITIVE { exp.abs() } else { 1.0 };
        acc.max_diff = acc.max_diff.max(diff);
        acc.max_rdiff = acc.max_rdiff.max(rel_diff);

        if self.accept_all {
            return;
        }

        let trh = self.threshold;
        let ok = if exp.abs() > NEAR_ZERO { rel_diff <= trh } else { diff <= trh };
        if ok {
            return;
        }

        let args = CheckArgs { idx, exp_f32, exp, got, diff, rel_diff, trh, dt };
        if self.driver_check.as_ref().is_some_and(|check| check(&args)) {
            return;
        }

        acc.errors += 1;
        if acc.mismatches.len() < MAX_REPORTED {
            acc.mismatches.push(Mismatch { idx, exp, got, diff, rel_diff, threshold: trh });
        }
    }
}
