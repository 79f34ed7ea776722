//! Suite orchestration: discovery, protected-file pre-pass, dispatch, and
//! aggregation.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{error, info, warn};

use crate::banned::BannedHit;
use crate::cancel::CancelToken;
use crate::case::{CaseContext, RunResult, TestCase};
use crate::compare::{RowDiff, TableComparator};
use crate::config::Project;
use crate::error::{CaseError, ConfigError, SuiteError};
use crate::imports::ImportRepairer;
use crate::patch::{CommandPatcher, EncodingPatcher, NoopPatcher};
use crate::report::{CaseRecord, Reporter};
use crate::runner::ProcessRunner;

/// Circuit file extension, without the dot.
pub const CIRCUIT_EXTENSION: &str = "circ";

/// Results of a suite that ran to completion.
#[derive(Debug, Clone, Default)]
pub struct SuiteSummary {
    pub outcomes: Vec<CaseRecord>,
    pub duration_ms: u64,
}

impl SuiteSummary {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn passed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.passed).count()
    }

    pub fn failed_count(&self) -> usize {
        self.total() - self.passed_count()
    }
}

/// Collect the circuits to test, sorted and de-duplicated.
///
/// A root naming a circuit file is taken as is; a directory is walked
/// recursively. Missing roots are skipped with a warning.
pub fn discover(roots: &[PathBuf]) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for root in roots {
        if root.is_file() {
            if is_circuit(root) {
                found.push(root.clone());
            } else {
                warn!(path = %root.display(), "Not a circuit file, skipping");
            }
        } else if root.is_dir() {
            collect_circuits(root, &mut found)?;
        } else {
            warn!(path = %root.display(), "Test path does not exist, skipping");
        }
    }
    found.sort();
    found.dedup();
    Ok(found)
}

fn is_circuit(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == CIRCUIT_EXTENSION)
}

fn collect_circuits(dir: &Path, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_circuits(&path, found)?;
        } else if is_circuit(&path) {
            found.push(path);
        }
    }
    Ok(())
}

/// Test suite driver.
pub struct TestSuite {
    project: Project,
    runner: ProcessRunner,
    comparator: Box<dyn TableComparator>,
    patcher: Box<dyn EncodingPatcher>,
}

impl TestSuite {
    /// Suite with the stock comparator and the project's configured patcher.
    pub fn new(project: Project) -> Result<Self, ConfigError> {
        let runner = ProcessRunner::for_project(&project).ok_or(ConfigError::EmptySimulatorCommand)?;
        let patcher: Box<dyn EncodingPatcher> = match &project.patch_command {
            Some(command) => Box::new(CommandPatcher::new(command.clone(), project.root().to_path_buf())),
            None => Box::new(NoopPatcher),
        };
        Ok(Self {
            project,
            runner,
            comparator: Box::new(RowDiff::default()),
            patcher,
        })
    }

    pub fn with_comparator(mut self, comparator: Box<dyn TableComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn with_patcher(mut self, patcher: Box<dyn EncodingPatcher>) -> Self {
        self.patcher = patcher;
        self
    }

    pub fn with_runner(mut self, runner: ProcessRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// Every circuit under the protected subtrees, sorted.
    pub fn protected_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for dir in &self.project.protected_dirs {
            let dir = self.project.root().join(dir);
            if dir.is_dir() {
                collect_circuits(&dir, &mut files)?;
            }
        }
        files.sort();
        Ok(files)
    }

    /// Repair protected circuits, then scan them for banned components.
    ///
    /// Every hit is reported before failing with
    /// [`SuiteError::PolicyViolation`].
    pub fn prepare<W: Write>(&self, reporter: &mut Reporter<W>) -> Result<(), SuiteError> {
        let repairer = ImportRepairer::new(self.project.root(), &self.project.import_policy);
        let protected = self.protected_files()?;

        for path in &protected {
            match repairer.repair(path) {
                Ok(outcome) => {
                    for fix in &outcome.fixes {
                        reporter.import_fix(fix)?;
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Import repair failed"),
            }
        }

        let mut violations: Vec<BannedHit> = Vec::new();
        for path in &protected {
            for hit in self.project.banned.scan(path)? {
                reporter.banned(&hit)?;
                violations.push(hit);
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            error!(count = violations.len(), "Banned components found, aborting");
            Err(SuiteError::PolicyViolation { violations })
        }
    }

    /// Discover, prepare, and run every test under `roots` in sorted order.
    ///
    /// Each result is streamed through `reporter` as it completes, followed
    /// by the `passed/total` summary. Policy violations and cancellation
    /// abort without a summary.
    pub async fn run<W: Write>(
        &self,
        roots: &[PathBuf],
        pipelined: bool,
        cancel: &CancelToken,
        reporter: &mut Reporter<W>,
    ) -> Result<SuiteSummary, SuiteError> {
        let start = Instant::now();
        let circuits = discover(roots)?;
        info!(count = circuits.len(), pipelined, "Discovered tests");

        self.prepare(reporter)?;

        let repairer = ImportRepairer::new(self.project.root(), &self.project.import_policy);
        let ctx = CaseContext {
            project: &self.project,
            repairer: &repairer,
            runner: &self.runner,
            comparator: self.comparator.as_ref(),
            cancel,
        };

        let mut outcomes = Vec::with_capacity(circuits.len());
        for path in circuits {
            if cancel.is_cancelled() {
                return Err(SuiteError::Cancelled);
            }

            let test = TestCase::new(path);
            let result = match self.run_one(&test, &ctx, pipelined, reporter).await {
                Ok(result) => result,
                Err(CaseError::Cancelled) => {
                    info!(test = %test.id(), "Suite cancelled");
                    return Err(SuiteError::Cancelled);
                }
                Err(e) => {
                    error!(test = %test.id(), error = %e, "Test errored");
                    RunResult::errored(e.to_string())
                }
            };

            reporter.result(test.id(), &result)?;
            outcomes.push(CaseRecord {
                id: test.id().to_string(),
                result,
            });
        }

        let summary = SuiteSummary {
            outcomes,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        reporter.summary(summary.passed_count(), summary.total())?;
        info!(
            passed = summary.passed_count(),
            total = summary.total(),
            duration_ms = summary.duration_ms,
            "Suite finished"
        );
        Ok(summary)
    }

    async fn run_one<W: Write>(
        &self,
        test: &TestCase,
        ctx: &CaseContext<'_>,
        pipelined: bool,
        reporter: &mut Reporter<W>,
    ) -> Result<RunResult, CaseError> {
        let marker = &self.project.patch_marker;
        let shown = self
            .project
            .relative(test.path())
            .unwrap_or_else(|| test.path().to_string_lossy().into_owned());
        if !marker.is_empty() && shown.contains(marker.as_str()) {
            tokio::select! {
                applied = self.patcher.apply() => {
                    applied.map_err(|e| CaseError::Patch(format!("{e:#}")))?;
                }
                _ = ctx.cancel.cancelled() => return Err(CaseError::Cancelled),
            }
        }
        test.run(ctx, pipelined, reporter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, "<project/>").expect("write");
    }

    #[test]
    fn test_discover_sorts_and_filters() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        touch(&root.join("tests/unit-b/b.circ"));
        touch(&root.join("tests/unit-a/a2.circ"));
        touch(&root.join("tests/unit-a/a1.circ"));
        touch(&root.join("tests/unit-a/out/a1.ref"));

        let found = discover(&[root.join("tests")]).expect("discover");
        assert_eq!(
            found,
            vec![
                root.join("tests/unit-a/a1.circ"),
                root.join("tests/unit-a/a2.circ"),
                root.join("tests/unit-b/b.circ"),
            ]
        );
    }

    #[test]
    fn test_discover_accepts_files_and_dedups() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("tests/unit-a/a1.circ");
        touch(&file);
        let found = discover(&[file.clone(), dir.path().join("tests"), dir.path().join("missing")])
            .expect("discover");
        assert_eq!(found, vec![file]);
    }

    #[test]
    fn test_discover_ignores_non_circuit_file_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "x").expect("write");
        assert!(discover(&[file]).expect("discover").is_empty());
    }

    #[test]
    fn test_summary_counts() {
        let summary = SuiteSummary {
            outcomes: vec![
                CaseRecord {
                    id: "a".to_string(),
                    result: RunResult::pass(),
                },
                CaseRecord {
                    id: "b".to_string(),
                    result: RunResult::fail("Did not match expected output", None),
                },
            ],
            duration_ms: 10,
        };
        assert_eq!(summary.total(), 2);
        assert_eq!(summary.passed_count(), 1);
        assert_eq!(summary.failed_count(), 1);
    }

    #[test]
    fn test_protected_files_cover_both_subtrees() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(&dir.path().join("cpu/alu.circ"));
        touch(&dir.path().join("harnesses/run.circ"));
        touch(&dir.path().join("tests/unit-alu/alu-add.circ"));

        let project = Project::new(dir.path(), HarnessConfig::default()).expect("project");
        let suite = TestSuite::new(project).expect("suite");
        let files = suite.protected_files().expect("files");
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("cpu/alu.circ"));
        assert!(files[1].ends_with("harnesses/run.circ"));
    }

    #[test]
    fn test_prepare_reports_every_banned_hit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cpu = dir.path().join("cpu");
        std::fs::create_dir_all(&cpu).expect("mkdir");
        std::fs::write(cpu.join("alu.circ"), "<comp lib=\"1\" name=\"Transistor\"/>\n").expect("write");
        std::fs::write(cpu.join("regfile.circ"), "<comp lib=\"4\" name=\"RAM\"/>\n").expect("write");
        std::fs::write(cpu.join("mem.circ"), "<comp lib=\"4\" name=\"RAM\"/>\n").expect("write");

        let project = Project::new(dir.path(), HarnessConfig::default()).expect("project");
        let suite = TestSuite::new(project).expect("suite");
        let mut reporter = Reporter::new(Vec::new());
        let err = suite.prepare(&mut reporter).expect_err("violation");
        match err {
            SuiteError::PolicyViolation { violations } => assert_eq!(violations.len(), 2),
            other => panic!("expected policy violation, got {other:?}"),
        }
        let out = String::from_utf8(reporter.into_inner()).expect("utf8");
        assert_eq!(out.matches("ERROR: found banned element").count(), 2);
    }
}
