//! circ-regress - regression tests for simulator-driven circuit projects
//!
//! ## Commands
//!
//! - `run`: repair imports, verify starter files, simulate, and diff tables
//! - `repair`: only rewrite stale import references
//! - `hash`: print starter digests in integrity-table form

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, warn, Level};

use circ_regress::{
    discover, normalized_digest, CancelToken, HarnessConfig, ImportRepairer, Project, Reporter,
    SuiteError, SuiteReport, TestSuite,
};

/// Exit code when protected circuits violate the banned-component policy.
const EXIT_POLICY_VIOLATION: u8 = 1;

/// Exit code after an interrupt (128 + SIGINT).
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "circ-regress")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Regression tests for simulator-driven circuit projects", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Project root holding cpu/, harnesses/ and tests/
    #[arg(long, global = true, default_value = ".", env = "CIRC_REGRESS_ROOT")]
    project_root: PathBuf,

    /// Harness config (default: <project-root>/tools/harness.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run test circuits and report PASS/FAIL per test
    Run {
        /// Test circuits, or directories containing test circuits
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Compare against pipelined reference output where available
        #[arg(short, long)]
        pipelined: bool,

        /// Also write a JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Rewrite stale import references without running tests
    Repair {
        /// Circuits, or directories containing circuits
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print normalized digests for starter files as an integrity table,
    /// using the configured digest algorithm
    Hash {
        /// Files, or directories to hash recursively
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    circ_regress::init_tracing(cli.json, level);

    let project = load_project(&cli.project_root, cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            paths,
            pipelined,
            report,
        } => cmd_run(project, &paths, pipelined, report.as_deref()).await,
        Commands::Repair { paths } => cmd_repair(&project, &paths),
        Commands::Hash { paths } => cmd_hash(&project, &paths),
    }
}

fn load_project(root: &Path, config: Option<&Path>) -> Result<Project> {
    let config = match config {
        Some(path) => HarnessConfig::load(path)?,
        None => HarnessConfig::discover(root)?,
    };
    let project = Project::new(root, config).context("Failed to load project")?;
    debug!(
        root = %project.root().display(),
        tracked = project.integrity.len(),
        rules = project.import_policy.rules().len(),
        "Project loaded"
    );
    Ok(project)
}

async fn cmd_run(
    project: Project,
    paths: &[PathBuf],
    pipelined: bool,
    report: Option<&Path>,
) -> Result<ExitCode> {
    let suite = TestSuite::new(project)?;

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping suite");
            trigger.cancel();
        }
    });

    let mut reporter = Reporter::new(std::io::stdout());
    match suite.run(paths, pipelined, &cancel, &mut reporter).await {
        Ok(summary) => {
            if let Some(path) = report {
                let report = SuiteReport::new(summary.outcomes, pipelined);
                let json = serde_json::to_string_pretty(&report)?;
                std::fs::write(path, json)
                    .with_context(|| format!("Failed to write report {}", path.display()))?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(SuiteError::Cancelled) => {
            eprintln!("Interrupted");
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
        Err(SuiteError::PolicyViolation { violations }) => {
            eprintln!(
                "Refusing to run tests: {} banned component(s) in protected circuits",
                violations.len()
            );
            Ok(ExitCode::from(EXIT_POLICY_VIOLATION))
        }
        Err(e) => Err(e).context("Test suite failed"),
    }
}

fn cmd_repair(project: &Project, paths: &[PathBuf]) -> Result<ExitCode> {
    let repairer = ImportRepairer::new(project.root(), &project.import_policy);
    let mut reporter = Reporter::new(std::io::stdout());
    let mut modified = 0usize;

    for path in discover(paths)? {
        let outcome = repairer
            .repair(&path)
            .with_context(|| format!("Failed to repair {}", path.display()))?;
        for fix in &outcome.fixes {
            reporter.import_fix(fix)?;
        }
        if outcome.modified() {
            modified += 1;
        }
    }

    println!("Repaired {modified} file(s)");
    Ok(ExitCode::SUCCESS)
}

fn cmd_hash(project: &Project, paths: &[PathBuf]) -> Result<ExitCode> {
    let mut files = Vec::new();
    for path in paths {
        collect_files(path, &mut files)
            .with_context(|| format!("Failed to read {}", path.display()))?;
    }

    let algorithm = project.integrity.algorithm();
    let mut table = BTreeMap::new();
    for file in files {
        let Some(rel) = project.relative(&file) else {
            warn!(path = %file.display(), "Outside project root, skipping");
            continue;
        };
        let bytes = std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
        table.insert(rel, normalized_digest(algorithm, &bytes));
    }

    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(ExitCode::SUCCESS)
}

fn collect_files(path: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    if path.is_file() {
        files.push(path.to_path_buf());
        return Ok(());
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();
    for entry in entries {
        collect_files(&entry, files)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_accepts_multiple_paths_and_pipelined() {
        let cli = Cli::try_parse_from([
            "circ-regress",
            "run",
            "tests/unit-alu",
            "tests/integration-addi/addi-basic.circ",
            "--pipelined",
        ])
        .expect("parse");
        match cli.command {
            Commands::Run {
                paths,
                pipelined,
                report,
            } => {
                assert_eq!(paths.len(), 2);
                assert!(pipelined);
                assert!(report.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_requires_a_path() {
        assert!(Cli::try_parse_from(["circ-regress", "run"]).is_err());
    }

    #[test]
    fn hash_collects_files_recursively_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("out")).expect("mkdir");
        std::fs::write(dir.path().join("b.circ"), "b").expect("write");
        std::fs::write(dir.path().join("out/a.ref"), "a").expect("write");

        let mut files = Vec::new();
        collect_files(dir.path(), &mut files).expect("collect");
        assert_eq!(files, vec![dir.path().join("b.circ"), dir.path().join("out/a.ref")]);
    }
}
