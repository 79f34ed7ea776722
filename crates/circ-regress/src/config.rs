//! Harness configuration and the read-only project tables built from it.
//!
//! Configuration is plain JSON. Every section has a default, so a file only
//! needs to carry what differs. The defaults describe the standard
//! single-cycle CPU project layout, including the digests of its starter
//! files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::banned::BannedComponentSet;
use crate::error::ConfigError;
use crate::integrity::{DigestAlgorithm, IntegrityTable};
use crate::paths;
use crate::pattern::PathPattern;

/// Config file looked up under the project root when none is given.
pub const DEFAULT_CONFIG_PATH: &str = "tools/harness.json";

/// Simulator invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Program and leading arguments. Relative paths in arguments are
    /// resolved by the simulator against the project root (its working dir).
    pub command: Vec<String>,

    /// Flag that switches the simulator into headless table output.
    pub headless_flag: String,

    /// Table format passed after the headless flag.
    pub table_format: String,

    /// Wall-clock limit per simulation; `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "java".to_string(),
                "-jar".to_string(),
                "tools/logisim-evolution.jar".to_string(),
            ],
            headless_flag: "-tty".to_string(),
            table_format: "table,binary,csv".to_string(),
            timeout_secs: None,
        }
    }
}

/// How a live child is brought down.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TerminationPolicy {
    /// Delay between liveness polls after the graceful request.
    pub poll_interval_ms: u64,

    /// Polls before escalating to a forced kill.
    pub max_polls: u32,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            max_polls: 10,
        }
    }
}

impl TerminationPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// One import policy rule: circuits matching `pattern` may import `allowed`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportRule {
    pub pattern: String,
    pub allowed: Vec<String>,
}

impl ImportRule {
    fn new(pattern: &str, allowed: &[&str]) -> Self {
        Self {
            pattern: pattern.to_string(),
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Banned component policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BannedConfig {
    pub components: Vec<String>,

    /// File names skipped by the scan.
    pub exempt_files: Vec<String>,
}

impl Default for BannedConfig {
    fn default() -> Self {
        let components = [
            "Pull Resistor",
            "Transistor",
            "Transmission Gate",
            "Power",
            "POR",
            "Ground",
            "Divider",
            "Random",
            "PLA",
            "RAM",
            "Random Generator",
        ];
        Self {
            components: components.iter().map(|s| s.to_string()).collect(),
            exempt_files: vec!["mem.circ".to_string()],
        }
    }
}

/// Complete harness configuration as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HarnessConfig {
    pub simulator: SimulatorConfig,
    pub termination: TerminationPolicy,

    /// Ordered import rules; the first matching pattern wins.
    pub import_policy: Vec<ImportRule>,

    /// Hash function the integrity table was recorded with.
    pub digest_algorithm: DigestAlgorithm,

    /// Project-relative path to expected starter digest.
    pub integrity: BTreeMap<String, String>,

    pub banned: BannedConfig,

    /// Subtrees repaired and scanned before any test runs.
    pub protected_dirs: Vec<String>,

    /// Harness circuits every test case verifies.
    pub shared_harness_files: Vec<String>,

    /// Path substring marking tests that need the encoding patch.
    pub patch_marker: String,

    /// External command applying the encoding patch; none means no-op.
    pub patch_command: Option<Vec<String>>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            simulator: SimulatorConfig::default(),
            termination: TerminationPolicy::default(),
            import_policy: default_import_policy(),
            digest_algorithm: DigestAlgorithm::Md5,
            integrity: starter_digests(),
            banned: BannedConfig::default(),
            protected_dirs: vec!["cpu".to_string(), "harnesses".to_string()],
            shared_harness_files: vec![
                "harnesses/cpu-harness.circ".to_string(),
                "harnesses/run.circ".to_string(),
            ],
            patch_marker: "imm".to_string(),
            patch_command: None,
        }
    }
}

fn default_import_policy() -> Vec<ImportRule> {
    vec![
        ImportRule::new(
            "cpu/cpu.circ",
            &[
                "cpu/alu.circ",
                "cpu/branch-comp.circ",
                "cpu/control-logic.circ",
                "cpu/imm-gen.circ",
                "cpu/regfile.circ",
            ],
        ),
        ImportRule::new("harnesses/alu-harness.circ", &["cpu/alu.circ"]),
        ImportRule::new("harnesses/imm-gen-harness.circ", &["cpu/imm-gen.circ"]),
        ImportRule::new("harnesses/branch-comp-harness.circ", &["cpu/branch-comp.circ"]),
        ImportRule::new("harnesses/cpu-harness.circ", &["cpu/cpu.circ", "cpu/mem.circ"]),
        ImportRule::new("harnesses/regfile-harness.circ", &["cpu/regfile.circ"]),
        ImportRule::new("harnesses/run.circ", &["harnesses/cpu-harness.circ"]),
        ImportRule::new("tests/unit-alu/*.circ", &["cpu/alu.circ"]),
        ImportRule::new("tests/unit-regfile/*.circ", &["cpu/regfile.circ"]),
        ImportRule::new("tests/unit-partial-load/*.circ", &["cpu/partial-load.circ"]),
        ImportRule::new("tests/integration-*/*.circ", &["harnesses/cpu-harness.circ"]),
    ]
}

/// MD5 digests (CRLF collapsed to LF) of the files handed out with the
/// starter project.
const STARTER_DIGESTS: &[(&str, &str)] = &[
    ("harnesses/cpu-harness.circ", "bb6df75d84088001121cb64ad39fdb8a"),
    ("harnesses/run.circ", "b452b26bc63a6e62b3ecead272682817"),
    ("tests/integration-addi/addi-basic.circ", "7036b58703bd9df01642a9d6210866f8"),
    ("tests/integration-addi/addi-negative.circ", "8fb256e6f8640f060d301ea4c4567085"),
    ("tests/integration-addi/addi-positive.circ", "036e6988bb5d2074b85cdc2faff0a7f4"),
    ("tests/integration-addi/out/addi-basic.piperef", "5adef575722b93ed04c82a37618ef2eb"),
    ("tests/integration-addi/out/addi-basic.ref", "4e1cfb0543418d95d3c75b49224c394d"),
    ("tests/integration-addi/out/addi-negative.piperef", "880daf267a095c2ab6012186be29aea6"),
    ("tests/integration-addi/out/addi-negative.ref", "8c4f4354e017d347a246b549c0a7c019"),
    ("tests/integration-addi/out/addi-positive.piperef", "554b05ad4952e65e3ac8844f36c0394e"),
    ("tests/integration-addi/out/addi-positive.ref", "079f17180d45eb7104220427f6360412"),
    ("tests/unit-alu/alu-add.circ", "a1853302b1853af8594042e9d22cfdfc"),
    ("tests/unit-alu/alu-all.circ", "0d319e6da7fc7a2c26d38e6d70e3848d"),
    ("tests/unit-alu/alu-logic.circ", "88fe241350eb7a7f93ff960feae4115b"),
    ("tests/unit-alu/alu-mult.circ", "5776b0a49a90b45c100714e2207e175e"),
    ("tests/unit-alu/alu-shift.circ", "4b735dc00f95e324f51777a3a72e736a"),
    ("tests/unit-alu/alu-slt-sub-bsel.circ", "7f8124ce02fcf6726df81a09c9181ad7"),
    ("tests/unit-alu/out/alu-add.ref", "cd03531fa04dbdefbc82bb9c4d3c9ed4"),
    ("tests/unit-alu/out/alu-all.ref", "97b8eaac983e2774b9b47bff46d41748"),
    ("tests/unit-alu/out/alu-logic.ref", "e655cd4b64a1d6bf6de02882d3708203"),
    ("tests/unit-alu/out/alu-mult.ref", "ef42ed4cf4c85efc3f1e7a414e2012b1"),
    ("tests/unit-alu/out/alu-shift.ref", "09a61bb272d6563dcfa35d76840765ec"),
    ("tests/unit-alu/out/alu-slt-sub-bsel.ref", "a27b828a9e4d093aaff92b7183cd9fb0"),
    ("tests/unit-regfile/out/regfile-more-regs.ref", "130731ddabf0a2c0d93e086cb57acc72"),
    ("tests/unit-regfile/out/regfile-read-only.ref", "64b6676bbb583d6a20564061cf680501"),
    ("tests/unit-regfile/out/regfile-read-write.ref", "127daa136c232f0ea623323d85b45972"),
    ("tests/unit-regfile/out/regfile-x0.ref", "e3025d4271c70ed8a32518fb95de63a8"),
    ("tests/unit-regfile/regfile-more-regs.circ", "d0397ca2a7e0bd63ddac8cdc926b45ad"),
    ("tests/unit-regfile/regfile-read-only.circ", "db07813ddbc5dab5253bb644b4e23467"),
    ("tests/unit-regfile/regfile-read-write.circ", "621b2d5881fee69f6650f75d04b6e31f"),
    ("tests/unit-regfile/regfile-x0.circ", "025919e544ad2f446eaddd25deecb100"),
];

fn starter_digests() -> BTreeMap<String, String> {
    STARTER_DIGESTS
        .iter()
        .map(|(path, digest)| (path.to_string(), digest.to_string()))
        .collect()
}

impl HarnessConfig {
    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `<root>/tools/harness.json` if present, else the defaults.
    pub fn discover(root: &Path) -> Result<Self, ConfigError> {
        let candidate = root.join(DEFAULT_CONFIG_PATH);
        if candidate.is_file() {
            debug!(path = %candidate.display(), "Loading harness config");
            Self::load(&candidate)
        } else {
            debug!("No harness config found, using defaults");
            Ok(Self::default())
        }
    }
}

/// Ordered import policy table.
#[derive(Debug, Clone)]
pub struct ImportPolicyTable {
    rules: Vec<(PathPattern, Vec<PathPattern>)>,
}

impl ImportPolicyTable {
    pub fn new(rules: &[ImportRule]) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|rule| {
                    (
                        PathPattern::new(rule.pattern.as_str()),
                        rule.allowed.iter().map(|a| PathPattern::new(a.as_str())).collect(),
                    )
                })
                .collect(),
        }
    }

    pub fn rules(&self) -> &[(PathPattern, Vec<PathPattern>)] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Everything a run needs to know about the project, loaded once.
#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    pub simulator: SimulatorConfig,
    pub termination: TerminationPolicy,
    pub import_policy: ImportPolicyTable,
    pub integrity: IntegrityTable,
    pub banned: BannedComponentSet,
    pub protected_dirs: Vec<String>,
    pub shared_harness_files: Vec<String>,
    pub patch_marker: String,
    pub patch_command: Option<Vec<String>>,
}

impl Project {
    /// Build the project view for `root` from `config`.
    pub fn new(root: &Path, config: HarnessConfig) -> Result<Self, ConfigError> {
        if config.simulator.command.is_empty() {
            return Err(ConfigError::EmptySimulatorCommand);
        }
        let root = paths::normalize(root).map_err(|source| ConfigError::ProjectRoot {
            path: root.to_path_buf(),
            source,
        })?;
        let banned = BannedComponentSet::new(&config.banned.components, &config.banned.exempt_files)?;

        Ok(Self {
            root,
            import_policy: ImportPolicyTable::new(&config.import_policy),
            integrity: IntegrityTable::new(config.digest_algorithm, config.integrity),
            banned,
            simulator: config.simulator,
            termination: config.termination,
            protected_dirs: config.protected_dirs,
            shared_harness_files: config.shared_harness_files,
            patch_marker: config.patch_marker,
            patch_command: config.patch_command,
        })
    }

    /// Absolute, collapsed project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Project-relative `/`-separated form of `path`.
    pub fn relative(&self, path: &Path) -> Option<String> {
        paths::project_relative(&self.root, path)
    }

    /// Absolute paths of the shared harness circuits.
    pub fn shared_harness_paths(&self) -> Vec<PathBuf> {
        self.shared_harness_files
            .iter()
            .map(|rel| self.root.join(rel))
            .collect()
    }
}
