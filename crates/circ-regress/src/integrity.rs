//! Starter-file integrity checks.
//!
//! Digests are taken over the file bytes with every CRLF collapsed to LF, so
//! a checkout with Windows line endings verifies the same as a Unix one.
//! MD5 is the default because the shipped starter table was recorded with
//! it; SHA-256 is available for tables authored with `circ-regress hash`.

use std::collections::BTreeMap;
use std::path::Path;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::paths;

/// Hash function an integrity table was recorded with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    fn hex<D: Digest>(bytes: &[u8]) -> String {
        let mut hasher = D::new();
        for chunk in lf_chunks(bytes) {
            hasher.update(chunk);
        }
        hex::encode(hasher.finalize())
    }
}

/// Expected digests of protected starter files, keyed by project-relative path.
#[derive(Debug, Clone, Default)]
pub struct IntegrityTable {
    algorithm: DigestAlgorithm,
    expected: BTreeMap<String, String>,
}

impl IntegrityTable {
    pub fn new(algorithm: DigestAlgorithm, expected: BTreeMap<String, String>) -> Self {
        let expected = expected
            .into_iter()
            .map(|(path, digest)| (path, digest.to_ascii_lowercase()))
            .collect();
        Self { algorithm, expected }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn expected(&self, rel_path: &str) -> Option<&str> {
        self.expected.get(rel_path).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.expected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }
}

/// Outcome of verifying one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub ok: bool,
    pub message: String,
}

impl Verification {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}

/// Line-ending independent digest of `bytes`, as lowercase hex.
pub fn normalized_digest(algorithm: DigestAlgorithm, bytes: &[u8]) -> String {
    match algorithm {
        DigestAlgorithm::Md5 => DigestAlgorithm::hex::<Md5>(bytes),
        DigestAlgorithm::Sha256 => DigestAlgorithm::hex::<Sha256>(bytes),
    }
}

/// Split `bytes` around each CRLF so that the pieces concatenate to the
/// LF-only form.
fn lf_chunks(bytes: &[u8]) -> Vec<&[u8]> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
            chunks.push(&bytes[start..i]);
            start = i + 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    chunks.push(&bytes[start..]);
    chunks
}

/// Checks files against an [`IntegrityTable`].
pub struct HashVerifier<'a> {
    root: &'a Path,
    table: &'a IntegrityTable,
}

impl<'a> HashVerifier<'a> {
    pub fn new(root: &'a Path, table: &'a IntegrityTable) -> Self {
        Self { root, table }
    }

    /// Verify `path`. Files without a recorded digest always pass.
    pub fn verify(&self, path: &Path) -> Verification {
        let Some(rel) = paths::project_relative(self.root, path) else {
            return Verification::pass("no hash on file");
        };
        let Some(expected) = self.table.expected(&rel) else {
            return Verification::pass("no hash on file");
        };

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %rel, error = %e, "Tracked starter file unreadable");
                return Verification::fail(format!("{rel} is missing or unreadable"));
            }
        };

        if normalized_digest(self.table.algorithm(), &bytes) == expected {
            Verification::pass(format!("{rel} matches starter file"))
        } else {
            Verification::fail(format!("{rel} was changed from starter"))
        }
    }
}
