//! Truth-table comparison.
//!
//! The harness only depends on the [`TableComparator`] trait. [`RowDiff`] is
//! the stock implementation: a row-by-row comparison of the simulator output
//! against the golden table.

use std::path::{Path, PathBuf};

/// Result of comparing actual and expected tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub matched: bool,
    pub diff: Option<String>,
}

/// Compares a test's captured table against its reference.
///
/// Implementations locate both tables from the circuit path using the
/// standard `out/` layout.
pub trait TableComparator: Send + Sync {
    fn compare(&self, circuit: &Path, pipelined: bool) -> anyhow::Result<Comparison>;
}

/// `<parent>/out/<stem>.out`
pub fn actual_table_path(circuit: &Path) -> PathBuf {
    table_path(circuit, "out")
}

/// `<parent>/out/<stem>.ref`, or `.piperef` when `pipelined`.
pub fn expected_table_path(circuit: &Path, pipelined: bool) -> PathBuf {
    table_path(circuit, if pipelined { "piperef" } else { "ref" })
}

fn table_path(circuit: &Path, extension: &str) -> PathBuf {
    let stem = circuit
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    circuit
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("out")
        .join(format!("{stem}.{extension}"))
}

/// Row-by-row comparison. Trailing whitespace and line-ending style are
/// ignored; trailing blank lines are dropped.
#[derive(Debug, Clone)]
pub struct RowDiff {
    /// Mismatching rows listed before the rest are summarised.
    pub max_reported: usize,
}

impl Default for RowDiff {
    fn default() -> Self {
        Self { max_reported: 20 }
    }
}

impl RowDiff {
    /// Compare two table texts.
    pub fn diff_tables(&self, actual: &str, expected: &str) -> Comparison {
        let actual = rows(actual);
        let expected = rows(expected);

        let mut lines = Vec::new();
        let mut mismatches = 0usize;
        for i in 0..actual.len().max(expected.len()) {
            let line = match (expected.get(i), actual.get(i)) {
                (Some(e), Some(a)) if e == a => continue,
                (Some(e), Some(a)) => format!("row {}: expected `{e}`, got `{a}`", i + 1),
                (Some(e), None) => format!("row {}: expected `{e}`, got nothing", i + 1),
                (None, Some(a)) => format!("row {}: unexpected `{a}`", i + 1),
                (None, None) => continue,
            };
            mismatches += 1;
            if lines.len() < self.max_reported {
                lines.push(line);
            }
        }

        if mismatches == 0 {
            return Comparison {
                matched: true,
                diff: None,
            };
        }
        if mismatches > lines.len() {
            lines.push(format!("... and {} more mismatched rows", mismatches - lines.len()));
        }
        Comparison {
            matched: false,
            diff: Some(lines.join("\n")),
        }
    }
}

fn rows(text: &str) -> Vec<&str> {
    let mut rows: Vec<&str> = text.lines().map(str::trim_end).collect();
    while rows.last().is_some_and(|r| r.is_empty()) {
        rows.pop();
    }
    rows
}

impl TableComparator for RowDiff {
    fn compare(&self, circuit: &Path, pipelined: bool) -> anyhow::Result<Comparison> {
        use anyhow::Context;

        let actual_path = actual_table_path(circuit);
        let expected_path = expected_table_path(circuit, pipelined);
        let actual = std::fs::read_to_string(&actual_path)
            .with_context(|| format!("reading actual table {}", actual_path.display()))?;
        let expected = std::fs::read_to_string(&expected_path)
            .with_context(|| format!("reading expected table {}", expected_path.display()))?;
        Ok(self.diff_tables(&actual, &expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_paths_follow_out_layout() {
        let circuit = Path::new("/proj/tests/unit-alu/alu-add.circ");
        assert_eq!(actual_table_path(circuit), PathBuf::from("/proj/tests/unit-alu/out/alu-add.out"));
        assert_eq!(
            expected_table_path(circuit, false),
            PathBuf::from("/proj/tests/unit-alu/out/alu-add.ref")
        );
        assert_eq!(
            expected_table_path(circuit, true),
            PathBuf::from("/proj/tests/unit-alu/out/alu-add.piperef")
        );
    }

    #[test]
    fn test_identical_tables_match() {
        let cmp = RowDiff::default().diff_tables("a,b\r\n0,1\r\n\r\n", "a,b\n0,1\n");
        assert!(cmp.matched);
        assert!(cmp.diff.is_none());
    }

    #[test]
    fn test_single_row_mismatch_reported() {
        let cmp = RowDiff::default().diff_tables("a,b\n0,1\n1,1\n", "a,b\n0,1\n1,0\n");
        assert!(!cmp.matched);
        assert_eq!(cmp.diff.as_deref(), Some("row 3: expected `1,0`, got `1,1`"));
    }

    #[test]
    fn test_length_mismatch_reported() {
        let cmp = RowDiff::default().diff_tables("a\n", "a\nb\n");
        assert_eq!(cmp.diff.as_deref(), Some("row 2: expected `b`, got nothing"));

        let cmp = RowDiff::default().diff_tables("a\nb\n", "a\n");
        assert_eq!(cmp.diff.as_deref(), Some("row 2: unexpected `b`"));
    }

    #[test]
    fn test_long_diffs_are_truncated() {
        let expected: String = (0..30).map(|i| format!("{i}\n")).collect();
        let actual: String = (0..30).map(|i| format!("x{i}\n")).collect();
        let cmp = RowDiff { max_reported: 5 }.diff_tables(&actual, &expected);
        let diff = cmp.diff.expect("diff");
        assert_eq!(diff.lines().count(), 6);
        assert!(diff.ends_with("... and 25 more mismatched rows"));
    }

    #[test]
    fn test_missing_reference_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let circuit = dir.path().join("t.circ");
        std::fs::create_dir_all(dir.path().join("out")).expect("mkdir");
        std::fs::write(dir.path().join("out/t.out"), "a\n").expect("write");
        let err = RowDiff::default().compare(&circuit, false).expect_err("no ref");
        assert!(format!("{err:#}").contains("t.ref"));
    }
}
