//! A single circuit test: repair, verify, simulate, compare.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::compare::{self, TableComparator};
use crate::config::Project;
use crate::error::CaseError;
use crate::imports::ImportRepairer;
use crate::integrity::HashVerifier;
use crate::pattern::PathPattern;
use crate::report::Reporter;
use crate::runner::ProcessRunner;

/// Reason recorded for a table mismatch.
pub const MISMATCH_REASON: &str = "Did not match expected output";

/// Reason recorded when a test errors instead of producing a verdict.
pub const ERRORED_REASON: &str = "Errored while running test";

/// Outcome of one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub passed: bool,
    pub reason: String,
    pub diff: Option<String>,
}

impl RunResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: "Matched expected output".to_string(),
            diff: None,
        }
    }

    pub fn fail(reason: impl Into<String>, diff: Option<String>) -> Self {
        Self {
            passed: false,
            reason: reason.into(),
            diff,
        }
    }

    /// Failed verdict for a test that raised an error; `trace` is shown
    /// beneath the result line.
    pub fn errored(trace: impl Into<String>) -> Self {
        Self::fail(ERRORED_REASON, Some(trace.into()))
    }
}

/// Shared collaborators a test case runs against.
pub struct CaseContext<'a> {
    pub project: &'a Project,
    pub repairer: &'a ImportRepairer<'a>,
    pub runner: &'a ProcessRunner,
    pub comparator: &'a dyn TableComparator,
    pub cancel: &'a CancelToken,
}

/// One discovered circuit file under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    path: PathBuf,
    id: String,
    name: String,
}

impl TestCase {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = path.display().to_string();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, id, name }
    }

    /// Path as discovered; shown in result lines.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// File stem; names the output and reference tables.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Unit tests have no pipelined reference.
    pub fn can_pipeline(&self) -> bool {
        let path = self.path.to_string_lossy().replace('\\', "/");
        !PathPattern::new("unit-*/*.circ").matches(&path)
    }

    pub fn actual_table_path(&self) -> PathBuf {
        compare::actual_table_path(&self.path)
    }

    pub fn expected_table_path(&self, pipelined: bool) -> PathBuf {
        compare::expected_table_path(&self.path, pipelined)
    }

    /// Files checked against the starter digests, in check order.
    pub fn integrity_targets(&self, project: &Project, pipelined: bool) -> Vec<PathBuf> {
        let mut targets = vec![self.path.clone(), self.expected_table_path(pipelined)];
        targets.extend(project.shared_harness_paths());
        targets
    }

    /// Run the test.
    ///
    /// `Ok` carries a PASS or FAIL verdict. `Err(CaseError::Cancelled)` must
    /// stop the whole suite; any other `Err` is this test's ERROR.
    pub async fn run<W: Write>(
        &self,
        ctx: &CaseContext<'_>,
        pipelined: bool,
        reporter: &mut Reporter<W>,
    ) -> Result<RunResult, CaseError> {
        match ctx.repairer.repair(&self.path) {
            Ok(outcome) => {
                for fix in &outcome.fixes {
                    reporter.import_fix(fix)?;
                }
            }
            Err(e) => warn!(test = %self.id, error = %e, "Import repair failed"),
        }

        let pipelined = pipelined && self.can_pipeline();
        let verifier = HashVerifier::new(ctx.project.root(), &ctx.project.integrity);
        for target in self.integrity_targets(ctx.project, pipelined) {
            let verification = verifier.verify(&target);
            if !verification.ok {
                info!(test = %self.id, reason = %verification.message, "Integrity check failed");
                return Ok(RunResult::fail(verification.message, None));
            }
        }

        let output_path = self.actual_table_path();
        if let Some(out_dir) = output_path.parent() {
            std::fs::create_dir_all(out_dir)?;
        }
        let sink = std::fs::File::create(&output_path)?;

        debug!(test = %self.id, output = %output_path.display(), "Running simulator");
        ctx.runner.run(&self.path, sink, ctx.cancel).await?;

        let comparison = ctx
            .comparator
            .compare(&self.path, pipelined)
            .map_err(|e| CaseError::Comparison(format!("{e:#}")))?;

        if comparison.matched {
            Ok(RunResult::pass())
        } else {
            Ok(RunResult::fail(MISMATCH_REASON, comparison.diff))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;

    #[test]
    fn test_name_and_id_from_path() {
        let case = TestCase::new("tests/unit-alu/alu-add.circ");
        assert_eq!(case.name(), "alu-add");
        assert_eq!(case.id(), PathBuf::from("tests/unit-alu/alu-add.circ").display().to_string());
    }

    #[test]
    fn test_unit_tests_cannot_pipeline() {
        assert!(!TestCase::new("tests/unit-alu/alu-add.circ").can_pipeline());
        assert!(!TestCase::new("/abs/proj/tests/unit-regfile/x0.circ").can_pipeline());
        assert!(TestCase::new("tests/integration-addi/addi-basic.circ").can_pipeline());
    }

    #[test]
    fn test_integrity_targets_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = Project::new(dir.path(), HarnessConfig::default()).expect("project");
        let case = TestCase::new(project.root().join("tests/integration-addi/addi-basic.circ"));

        let targets = case.integrity_targets(&project, true);
        assert_eq!(targets.len(), 4);
        assert_eq!(targets[0], case.path());
        assert!(targets[1].ends_with("out/addi-basic.piperef"));
        assert!(targets[2].ends_with("harnesses/cpu-harness.circ"));
        assert!(targets[3].ends_with("harnesses/run.circ"));
    }

    #[test]
    fn test_errored_result_carries_trace() {
        let result = RunResult::errored("spawn failed");
        assert!(!result.passed);
        assert_eq!(result.reason, ERRORED_REASON);
        assert_eq!(result.diff.as_deref(), Some("spawn failed"));
    }
}
