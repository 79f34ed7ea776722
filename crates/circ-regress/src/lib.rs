//! circ-regress - regression harness for simulator-driven circuit projects
//!
//! Runs each test circuit through an external simulator and diffs the
//! produced truth table against a golden reference. Before simulating it:
//! - repairs stale cross-circuit import paths
//! - verifies protected starter files against recorded digests
//! - rejects projects whose protected circuits use banned components

pub mod banned;
pub mod cancel;
pub mod case;
pub mod compare;
pub mod config;
pub mod error;
pub mod imports;
pub mod integrity;
pub mod patch;
pub mod paths;
pub mod pattern;
pub mod report;
pub mod runner;
pub mod suite;
pub mod telemetry;

// Re-export key types
pub use banned::{BannedComponentSet, BannedHit};
pub use cancel::CancelToken;
pub use case::{CaseContext, RunResult, TestCase};
pub use compare::{Comparison, RowDiff, TableComparator};
pub use config::{HarnessConfig, ImportPolicyTable, Project, TerminationPolicy};
pub use error::{CaseError, ConfigError, RunnerError, SuiteError};
pub use imports::{FixKind, ImportFix, ImportRepairer, RepairOutcome};
pub use integrity::{normalized_digest, DigestAlgorithm, HashVerifier, IntegrityTable, Verification};
pub use patch::{CommandPatcher, EncodingPatcher, NoopPatcher};
pub use report::{CaseRecord, Reporter, SuiteReport};
pub use runner::{ProcessRunner, SimulatorInvocation};
pub use suite::{discover, SuiteSummary, TestSuite};
pub use telemetry::init_tracing;
