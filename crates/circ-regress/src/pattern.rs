//! Path patterns with first-match lookup.
//!
//! A relative pattern is matched against the trailing segments of a path, so
//! `cpu/alu.circ` matches `/home/me/proj/cpu/alu.circ` and
//! `tests/unit-alu/*.circ` matches any file directly inside a `unit-alu`
//! directory under a `tests` directory. A pattern starting with `/` must match
//! the whole path. Within a segment `*` matches any run of characters and `?`
//! matches exactly one; neither crosses a `/`.

use std::fmt;

/// A compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    anchored: bool,
    segments: Vec<String>,
}

impl PathPattern {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let anchored = raw.starts_with('/');
        let segments = raw
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self {
            raw,
            anchored,
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the `/`-separated `path` matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if self.segments.is_empty() || parts.len() < self.segments.len() {
            return false;
        }
        if self.anchored && parts.len() != self.segments.len() {
            return false;
        }
        let tail = &parts[parts.len() - self.segments.len()..];
        self.segments
            .iter()
            .zip(tail)
            .all(|(pattern, part)| segment_matches(pattern.as_bytes(), part.as_bytes()))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Glob match of one path segment. Iterative with single-star backtracking.
fn segment_matches(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

/// Return the first entry whose pattern matches `path`, in declaration order.
pub fn first_match<'a, T>(entries: &'a [(PathPattern, T)], path: &str) -> Option<&'a (PathPattern, T)> {
    entries.iter().find(|(pattern, _)| pattern.matches(path))
}

/// Every entry whose pattern matches `path`, in declaration order.
pub fn all_matches<'a, T>(
    entries: &'a [(PathPattern, T)],
    path: &'a str,
) -> impl Iterator<Item = &'a (PathPattern, T)> + 'a {
    entries.iter().filter(move |(pattern, _)| pattern.matches(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern_matches_path_suffix() {
        let p = PathPattern::new("cpu/alu.circ");
        assert!(p.matches("/home/me/proj/cpu/alu.circ"));
        assert!(p.matches("cpu/alu.circ"));
        assert!(!p.matches("/home/me/proj/cpu/regfile.circ"));
        assert!(!p.matches("alu.circ"));
    }

    #[test]
    fn star_stays_within_segment() {
        let p = PathPattern::new("tests/unit-alu/*.circ");
        assert!(p.matches("tests/unit-alu/alu-add.circ"));
        assert!(!p.matches("tests/unit-alu/deep/alu-add.circ"));
        assert!(!p.matches("tests/unit-alu/alu-add.ref"));
    }

    #[test]
    fn star_in_directory_segment() {
        let p = PathPattern::new("tests/integration-*/*.circ");
        assert!(p.matches("tests/integration-addi/addi-basic.circ"));
        assert!(!p.matches("tests/unit-alu/alu-add.circ"));
    }

    #[test]
    fn question_mark_matches_single_character() {
        let p = PathPattern::new("r?n.circ");
        assert!(p.matches("harnesses/run.circ"));
        assert!(!p.matches("harnesses/ruun.circ"));
    }

    #[test]
    fn anchored_pattern_requires_full_match() {
        let p = PathPattern::new("/cpu/alu.circ");
        assert!(p.matches("cpu/alu.circ"));
        assert!(!p.matches("nested/cpu/alu.circ"));
    }

    #[test]
    fn star_backtracks() {
        assert!(segment_matches(b"a*b*c", b"aXbYbZc"));
        assert!(segment_matches(b"*", b""));
        assert!(!segment_matches(b"a*c", b"abcd"));
    }

    #[test]
    fn first_match_respects_declaration_order() {
        let entries = vec![
            (PathPattern::new("tests/unit-*/*.circ"), "generic"),
            (PathPattern::new("tests/unit-alu/*.circ"), "alu"),
        ];
        let hit = first_match(&entries, "tests/unit-alu/alu-add.circ").map(|(_, v)| *v);
        assert_eq!(hit, Some("generic"));
        assert_eq!(all_matches(&entries, "tests/unit-alu/alu-add.circ").count(), 2);
        assert!(first_match(&entries, "cpu/alu.circ").is_none());
    }
}
