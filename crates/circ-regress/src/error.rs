//! Error types for the harness.
//!
//! Only [`SuiteError::PolicyViolation`] and the `Cancelled` variants stop a
//! whole run. Everything else is scoped to a single test case.

use std::path::PathBuf;
use std::time::Duration;

use crate::banned::BannedHit;

/// Errors raised while loading or validating harness configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("simulator command is empty")]
    EmptySimulatorCommand,

    #[error("invalid banned component pattern for {name:?}: {source}")]
    BannedPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to resolve project root {path}: {source}")]
    ProjectRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors produced by the process runner.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to spawn simulator {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to resolve circuit path {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for simulator: {0}")]
    Wait(#[source] std::io::Error),

    #[error("simulator timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error("simulator run cancelled")]
    Cancelled,
}

/// Errors that end a single test case without a verdict.
#[derive(Debug, thiserror::Error)]
pub enum CaseError {
    /// Cancellation reached the case; the driver must escalate it.
    #[error("test case cancelled")]
    Cancelled,

    #[error(transparent)]
    Runner(RunnerError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table comparison failed: {0}")]
    Comparison(String),

    #[error("encoding patch failed: {0}")]
    Patch(String),
}

impl From<RunnerError> for CaseError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::Cancelled => CaseError::Cancelled,
            other => CaseError::Runner(other),
        }
    }
}

/// Errors that abort a whole suite run.
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    #[error("found {} banned component(s) in protected circuits", .violations.len())]
    PolicyViolation { violations: Vec<BannedHit> },

    #[error("suite cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
