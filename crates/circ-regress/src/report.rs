//! Result reporting.
//!
//! Two outputs:
//! - the streamed console record, one line per test as it completes
//! - `SuiteReport`, a machine-readable summary written with `--report`

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::banned::BannedHit;
use crate::case::RunResult;
use crate::imports::ImportFix;

// ── console record ────────────────────────────────────────────────────────

/// Writes the line-oriented result record, flushing after every entry.
pub struct Reporter<W: Write> {
    out: W,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn import_fix(&mut self, fix: &ImportFix) -> std::io::Result<()> {
        writeln!(self.out, "{fix}")?;
        self.out.flush()
    }

    pub fn banned(&mut self, hit: &BannedHit) -> std::io::Result<()> {
        writeln!(
            self.out,
            "ERROR: found banned element ({}) in {}",
            hit.component,
            hit.file.display()
        )?;
        self.out.flush()
    }

    /// `PASS: <id>` or `FAIL: <id> (<reason>)`, then any diff indented.
    pub fn result(&mut self, id: &str, result: &RunResult) -> std::io::Result<()> {
        if result.passed {
            writeln!(self.out, "PASS: {id}")?;
        } else {
            writeln!(self.out, "FAIL: {id} ({})", result.reason)?;
        }
        if let Some(diff) = &result.diff {
            writeln!(self.out, "{}", indent(diff, "  "))?;
        }
        self.out.flush()
    }

    pub fn summary(&mut self, passed: usize, total: usize) -> std::io::Result<()> {
        writeln!(self.out, "Passed {passed}/{total} tests")?;
        self.out.flush()
    }
}

/// Prefix every non-blank line of `text` with `prefix`.
fn indent(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| {
            if line.trim().is_empty() {
                line.to_string()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── suite_report.json schema ──────────────────────────────────────────────

/// Outcome of one test in a finished suite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseRecord {
    pub id: String,
    #[serde(flatten)]
    pub result: RunResult,
}

/// Aggregate results of a suite run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SuiteReport {
    pub run_at: DateTime<Utc>,
    pub pipelined: bool,
    pub outcomes: Vec<CaseRecord>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

impl SuiteReport {
    pub fn new(outcomes: Vec<CaseRecord>, pipelined: bool) -> Self {
        let total = outcomes.len();
        let passed = outcomes.iter().filter(|o| o.result.passed).count();
        Self {
            run_at: Utc::now(),
            pipelined,
            outcomes,
            total,
            passed,
            failed: total - passed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imports::FixKind;
    use std::path::PathBuf;

    fn render<F>(f: F) -> String
    where
        F: FnOnce(&mut Reporter<Vec<u8>>) -> std::io::Result<()>,
    {
        let mut reporter = Reporter::new(Vec::new());
        f(&mut reporter).expect("write");
        String::from_utf8(reporter.into_inner()).expect("utf8")
    }

    #[test]
    fn test_pass_line() {
        let out = render(|r| r.result("tests/unit-alu/alu-add.circ", &RunResult::pass()));
        assert_eq!(out, "PASS: tests/unit-alu/alu-add.circ\n");
    }

    #[test]
    fn test_fail_line_with_indented_diff() {
        let result = RunResult::fail("Did not match expected output", Some("row 3: a\nrow 4: b".to_string()));
        let out = render(|r| r.result("t.circ", &result));
        assert_eq!(
            out,
            "FAIL: t.circ (Did not match expected output)\n  row 3: a\n  row 4: b\n"
        );
    }

    #[test]
    fn test_summary_and_banned_lines() {
        let out = render(|r| {
            r.banned(&BannedHit {
                component: "RAM".to_string(),
                file: PathBuf::from("cpu/cpu.circ"),
            })?;
            r.summary(3, 4)
        });
        assert_eq!(
            out,
            format!(
                "ERROR: found banned element (RAM) in {}\nPassed 3/4 tests\n",
                PathBuf::from("cpu/cpu.circ").display()
            )
        );
    }

    #[test]
    fn test_import_fix_line() {
        let fix = ImportFix {
            kind: FixKind::Known,
            file: PathBuf::from("t.circ"),
            old: "../cpu/alu.circ".to_string(),
            new: "../../cpu/alu.circ".to_string(),
        };
        let out = render(|r| r.import_fix(&fix));
        assert_eq!(
            out,
            "Fixing bad import ../cpu/alu.circ in t.circ (should be ../../cpu/alu.circ)\n"
        );
    }

    #[test]
    fn test_suite_report_counts() {
        let report = SuiteReport::new(
            vec![
                CaseRecord {
                    id: "a".to_string(),
                    result: RunResult::pass(),
                },
                CaseRecord {
                    id: "b".to_string(),
                    result: RunResult::errored("boom"),
                },
            ],
            false,
        );
        assert_eq!(report.total, 2);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);

        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["outcomes"][1]["reason"], "Errored while running test");
        assert_eq!(json["outcomes"][0]["passed"], true);
    }
}
