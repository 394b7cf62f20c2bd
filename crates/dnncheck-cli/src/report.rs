//! Per-case lines, run summary and the JSON report.

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use anyhow::{Context, Result};
use console::style;
use dnncheck_common::{PerfTimer, ResState, SkipReason, TestResult};
use serde::Serialize;

/// One finished case as it appears in the JSON report.
#[derive(Debug, Clone, Serialize)]
pub struct CaseRecord {
    pub index: usize,
    pub driver: &'static str,
    pub state: ResState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    pub impl_name: String,
    pub repro: String,
    pub errors: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perf: Option<PerfTimer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
}

impl CaseRecord {
    pub fn new(index: usize, driver: &'static str, repro: String, res: TestResult) -> Self {
        let perf = (res.timer.times > 0).then_some(res.timer);
        Self {
            index,
            driver,
            state: res.state,
            reason: res.reason,
            impl_name: res.impl_name,
            repro,
            errors: res.errors,
            total: res.total,
            perf,
            fatal: res.fatal,
        }
    }

    /// `<index>:<STATE> [(<reason>)] __REPRO: <repro>`
    pub fn line(&self) -> String {
        let mut s = format!("{}:{}", self.index, self.state);
        if let Some(reason) = self.reason {
            s.push_str(&format!(" ({reason})"));
        }
        s.push_str(&format!(" __REPRO: {} {}", self.driver, self.repro));
        if let Some(t) = &self.perf {
            s.push_str(&format!(
                " __PERF: min={:.4}ms avg={:.4}ms max={:.4}ms runs={}",
                t.min_ms,
                t.avg_ms(),
                t.max_ms,
                t.times
            ));
        }
        s
    }
}

/// Case counts by final state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub tests: usize,
    pub passed: usize,
    pub executed: usize,
    pub skipped: usize,
    pub mistrusted: usize,
    pub unimplemented: usize,
    pub failed: usize,
    pub listed: usize,
}

impl Summary {
    pub fn add(&mut self, state: ResState) {
        self.tests += 1;
        match state {
            ResState::Passed => self.passed += 1,
            ResState::Executed => self.executed += 1,
            ResState::Skipped => self.skipped += 1,
            ResState::Mistrusted => self.mistrusted += 1,
            ResState::Unimplemented => self.unimplemented += 1,
            ResState::Failed => self.failed += 1,
            ResState::Listed => self.listed += 1,
            // A case that never left UNTESTED did nothing countable.
            ResState::Untested => {}
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tests:{} passed:{} executed:{} skipped:{} mistrusted:{} unimplemented:{} failed:{} listed:{}",
            self.tests,
            self.passed,
            self.executed,
            self.skipped,
            self.mistrusted,
            self.unimplemented,
            self.failed,
            self.listed
        )
    }
}

/// All cases of one invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub summary: Summary,
    pub cases: Vec<CaseRecord>,
}

impl Report {
    pub fn push(&mut self, record: CaseRecord) {
        self.summary.add(record.state);
        self.cases.push(record);
    }

    pub fn failures(&self) -> impl Iterator<Item = &CaseRecord> {
        self.cases.iter().filter(|c| c.state == ResState::Failed)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("failed to create report {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("failed to write report {}", path.display()))?;
        Ok(())
    }

    /// Styled summary for the terminal.
    pub fn print_summary(&self) {
        let s = &self.summary;
        println!();
        println!("{}", style("Summary").bold());
        println!("  tests:         {}", s.tests);
        println!("  passed:        {}", style(s.passed).green());
        if s.executed > 0 {
            println!("  executed:      {}", s.executed);
        }
        if s.listed > 0 {
            println!("  listed:        {}", s.listed);
        }
        println!("  skipped:       {}", style(s.skipped).dim());
        println!("  mistrusted:    {}", style(s.mistrusted).yellow());
        println!("  unimplemented: {}", style(s.unimplemented).dim());
        if s.failed > 0 {
            println!("  failed:        {}", style(s.failed).red().bold());
            for case in self.failures() {
                println!("    {}", style(case.line()).red());
            }
        } else {
            println!("  failed:        0");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(state: ResState) -> TestResult {
        TestResult { state, ..TestResult::default() }
    }

    #[test]
    fn case_line_format() {
        let rec = CaseRecord::new(3, "lnorm", "--dir=FWD_D 2x8".to_string(), result(ResState::Passed));
        assert_eq!(rec.line(), "3:PASSED __REPRO: lnorm --dir=FWD_D 2x8");

        let mut res = result(ResState::Skipped);
        res.reason = Some(SkipReason::SkipImplHit);
        let rec = CaseRecord::new(0, "eltwise", "--alg=relu 4".to_string(), res);
        assert_eq!(rec.line(), "0:SKIPPED (SKIP_IMPL_HIT) __REPRO: eltwise --alg=relu 4");
    }

    #[test]
    fn summary_counts_states() {
        let mut report = Report::default();
        for (i, state) in [ResState::Passed, ResState::Failed, ResState::Passed, ResState::Mistrusted]
            .into_iter()
            .enumerate()
        {
            report.push(CaseRecord::new(i, "lnorm", String::new(), result(state)));
        }
        assert_eq!(report.summary.tests, 4);
        assert_eq!(report.summary.passed, 2);
        assert!(report.summary.has_failures());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(
            report.summary.to_string(),
            "tests:4 passed:2 executed:0 skipped:0 mistrusted:1 unimplemented:0 failed:1 listed:0"
        );
    }

    #[test]
    fn json_report_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let mut report = Report::default();
        report.push(CaseRecord::new(0, "lnorm", "2x8".to_string(), result(ResState::Passed)));
        report.write_json(&path).unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["summary"]["passed"], 1);
        assert_eq!(value["cases"][0]["state"], "PASSED");
        assert!(value["cases"][0].get("reason").is_none());
    }
}
