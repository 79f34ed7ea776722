//! Import reference repair.
//!
//! Circuits reference other circuits through `desc="file#<relative path>.circ"`
//! attributes. When files move those relative strings go stale. The repairer
//! rewrites them in place so they point at the canonical location recorded in
//! the [`ImportPolicyTable`], or failing that, at the cleaned-up resolved
//! location.

use std::collections::HashSet;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::ImportPolicyTable;
use crate::paths;
use crate::pattern::{all_matches, first_match};

const IMPORT_PATTERN: &str = r#"desc="file#([^"]+?\.circ)""#;

/// How confident the repairer is about a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FixKind {
    /// The reference resolved to a target the policy allows.
    Known,
    /// No allowed target matched; the reference was only normalised.
    Probable,
}

/// One rewritten import reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportFix {
    pub kind: FixKind,
    pub file: PathBuf,
    pub old: String,
    pub new: String,
}

impl fmt::Display for ImportFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.kind {
            FixKind::Known => "bad",
            FixKind::Probable => "probably bad",
        };
        write!(
            f,
            "Fixing {label} import {} in {} (should be {})",
            self.old,
            self.file.display(),
            self.new
        )
    }
}

/// What a repair pass did to one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairOutcome {
    pub fixes: Vec<ImportFix>,
}

impl RepairOutcome {
    /// Whether the file on disk was rewritten.
    pub fn modified(&self) -> bool {
        !self.fixes.is_empty()
    }
}

/// Rewrites stale import references according to the policy table.
pub struct ImportRepairer<'a> {
    root: &'a Path,
    policy: &'a ImportPolicyTable,
    import_re: Regex,
}

impl<'a> ImportRepairer<'a> {
    pub fn new(root: &'a Path, policy: &'a ImportPolicyTable) -> Self {
        Self {
            root,
            policy,
            import_re: Regex::new(IMPORT_PATTERN).expect("import pattern is a valid regex"),
        }
    }

    /// Every import reference declared in `content`, in order of appearance.
    pub fn references<'c>(&self, content: &'c str) -> Vec<&'c str> {
        self.import_re
            .captures_iter(content)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// Repair `path` in place. Files no policy rule covers are left alone.
    pub fn repair(&self, path: &Path) -> std::io::Result<RepairOutcome> {
        let file = paths::normalize(path)?;
        let Some(rel) = paths::project_relative(self.root, &file) else {
            return Ok(RepairOutcome::default());
        };
        let Some((pattern, allowed)) = first_match(self.policy.rules(), &rel) else {
            return Ok(RepairOutcome::default());
        };

        let extra: Vec<String> = all_matches(self.policy.rules(), &rel)
            .skip(1)
            .map(|(p, _)| p.to_string())
            .collect();
        if !extra.is_empty() {
            warn!(file = %rel, used = %pattern, ignored = ?extra, "Multiple import rules match");
        }

        let Some(dir) = file.parent() else {
            return Ok(RepairOutcome::default());
        };

        let original = std::fs::read_to_string(&file)?;
        let mut content = original.clone();
        let mut seen = HashSet::new();
        let mut fixes = Vec::new();

        for reference in self.references(&original) {
            if !seen.insert(reference) {
                continue;
            }
            let resolved = paths::collapse(&dir.join(reference));
            let resolved_str = resolved.to_string_lossy().replace('\\', "/");

            let (kind, target) = match allowed.iter().find(|target| target.matches(&resolved_str)) {
                Some(target) => (FixKind::Known, paths::collapse(&self.root.join(target.as_str()))),
                None => (FixKind::Probable, resolved),
            };
            let Some(expected) = pathdiff::diff_paths(&target, dir) else {
                debug!(file = %rel, reference, "No relative path to import target");
                continue;
            };
            let expected = paths::to_posix(&expected);

            if reference != expected {
                content = content.replace(
                    &format!("file#{reference}\""),
                    &format!("file#{expected}\""),
                );
                fixes.push(ImportFix {
                    kind,
                    file: file.clone(),
                    old: reference.to_string(),
                    new: expected,
                });
            }
        }

        if fixes.is_empty() {
            debug!(file = %rel, "Imports already consistent");
            return Ok(RepairOutcome::default());
        }

        write_atomic(&file, content.as_bytes())?;
        debug!(file = %rel, fixes = fixes.len(), "Rewrote import references");
        Ok(RepairOutcome { fixes })
    }
}

/// Replace `path` with `data` via a temp file in the same directory, keeping
/// the permissions of the file being replaced.
fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let permissions = std::fs::metadata(path)?.permissions();
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportRule;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        policy: ImportPolicyTable,
    }

    fn fixture(rules: &[(&str, &[&str])]) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = paths::normalize(dir.path()).expect("root");
        let rules: Vec<ImportRule> = rules
            .iter()
            .map(|(pattern, allowed)| ImportRule {
                pattern: pattern.to_string(),
                allowed: allowed.iter().map(|s| s.to_string()).collect(),
            })
            .collect();
        Fixture {
            _dir: dir,
            root,
            policy: ImportPolicyTable::new(&rules),
        }
    }

    fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(&path, content).expect("write");
        path
    }

    fn circuit(import: &str) -> String {
        format!("<project>\n  <lib desc=\"file#{import}\" name=\"7\"/>\n</project>\n")
    }

    #[test]
    fn test_extracts_references_in_order() {
        let f = fixture(&[]);
        let repairer = ImportRepairer::new(&f.root, &f.policy);
        let content = r##"<lib desc="file#../cpu/alu.circ"/><lib desc="#Wiring"/><lib desc="file#x.circ"/>"##;
        assert_eq!(repairer.references(content), vec!["../cpu/alu.circ", "x.circ"]);
    }

    #[test]
    fn test_known_import_rewritten_to_canonical_path() {
        let f = fixture(&[("tests/unit-alu/*.circ", &["cpu/alu.circ"])]);
        let test = write(&f.root, "tests/unit-alu/alu-add.circ", &circuit("../cpu/alu.circ"));

        let outcome = ImportRepairer::new(&f.root, &f.policy).repair(&test).expect("repair");
        assert!(outcome.modified());
        assert_eq!(outcome.fixes.len(), 1);
        assert_eq!(outcome.fixes[0].kind, FixKind::Known);
        assert_eq!(outcome.fixes[0].new, "../../cpu/alu.circ");

        let on_disk = std::fs::read_to_string(&test).expect("read");
        assert_eq!(on_disk, circuit("../../cpu/alu.circ"));
        assert!(outcome.fixes[0].to_string().starts_with("Fixing bad import ../cpu/alu.circ in "));
    }

    #[test]
    fn test_repair_is_idempotent() {
        let f = fixture(&[("tests/unit-alu/*.circ", &["cpu/alu.circ"])]);
        let test = write(&f.root, "tests/unit-alu/alu-add.circ", &circuit("../cpu/alu.circ"));
        let repairer = ImportRepairer::new(&f.root, &f.policy);

        assert!(repairer.repair(&test).expect("first").modified());
        let after_first = std::fs::read(&test).expect("read");
        let second = repairer.repair(&test).expect("second");
        assert!(!second.modified());
        assert_eq!(std::fs::read(&test).expect("read"), after_first);
    }

    #[test]
    fn test_policy_target_wins_over_resolved_location() {
        // The stale reference resolves to a real file in another checkout
        // layout, but the policy's canonical location still takes precedence.
        let f = fixture(&[("harnesses/run.circ", &["harnesses/cpu-harness.circ"])]);
        write(&f.root, "old/harnesses/cpu-harness.circ", "<project/>");
        let run = write(&f.root, "harnesses/run.circ", &circuit("../old/harnesses/cpu-harness.circ"));

        let outcome = ImportRepairer::new(&f.root, &f.policy).repair(&run).expect("repair");
        assert_eq!(outcome.fixes[0].kind, FixKind::Known);
        assert_eq!(outcome.fixes[0].new, "cpu-harness.circ");
    }

    #[test]
    fn test_unknown_import_is_normalised() {
        let f = fixture(&[("cpu/cpu.circ", &["cpu/alu.circ"])]);
        let cpu = write(&f.root, "cpu/cpu.circ", &circuit("./../cpu/helpers/mux.circ"));

        let outcome = ImportRepairer::new(&f.root, &f.policy).repair(&cpu).expect("repair");
        assert_eq!(outcome.fixes.len(), 1);
        assert_eq!(outcome.fixes[0].kind, FixKind::Probable);
        assert_eq!(outcome.fixes[0].new, "helpers/mux.circ");
        assert!(outcome.fixes[0].to_string().starts_with("Fixing probably bad import"));
    }

    #[test]
    fn test_uncovered_file_untouched() {
        let f = fixture(&[("cpu/cpu.circ", &["cpu/alu.circ"])]);
        let other = write(&f.root, "scratch/thing.circ", &circuit("../../nowhere/alu.circ"));
        let outcome = ImportRepairer::new(&f.root, &f.policy).repair(&other).expect("repair");
        assert!(!outcome.modified());
        assert_eq!(std::fs::read_to_string(&other).expect("read"), circuit("../../nowhere/alu.circ"));
    }

    #[test]
    fn test_repeated_reference_fixed_once() {
        let f = fixture(&[("cpu/cpu.circ", &["cpu/alu.circ"])]);
        let content = format!("{}{}", circuit("../cpu/alu.circ"), circuit("../cpu/alu.circ"));
        let cpu = write(&f.root, "cpu/cpu.circ", &content);

        let outcome = ImportRepairer::new(&f.root, &f.policy).repair(&cpu).expect("repair");
        assert_eq!(outcome.fixes.len(), 1);
        let on_disk = std::fs::read_to_string(&cpu).expect("read");
        assert_eq!(on_disk.matches("file#alu.circ\"").count(), 2);
    }

    #[test]
    fn test_rewrite_scoped_to_import_attribute() {
        let f = fixture(&[("cpu/cpu.circ", &["cpu/alu.circ"])]);
        let content = format!("<!-- see ../cpu/alu.circ -->\n{}", circuit("../cpu/alu.circ"));
        let cpu = write(&f.root, "cpu/cpu.circ", &content);

        ImportRepairer::new(&f.root, &f.policy).repair(&cpu).expect("repair");
        let on_disk = std::fs::read_to_string(&cpu).expect("read");
        assert!(on_disk.contains("<!-- see ../cpu/alu.circ -->"));
        assert!(on_disk.contains("desc=\"file#alu.circ\""));
    }

    #[cfg(unix)]
    #[test]
    fn test_repair_keeps_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let f = fixture(&[("cpu/cpu.circ", &["cpu/alu.circ"])]);
        let cpu = write(&f.root, "cpu/cpu.circ", &circuit("../cpu/alu.circ"));
        std::fs::set_permissions(&cpu, std::fs::Permissions::from_mode(0o644)).expect("chmod");

        let outcome = ImportRepairer::new(&f.root, &f.policy).repair(&cpu).expect("repair");
        assert!(outcome.modified());
        let mode = std::fs::metadata(&cpu).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}
