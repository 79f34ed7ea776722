//! Banned component policy for protected circuits.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::error::ConfigError;

/// A banned component found in a circuit file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BannedHit {
    pub component: String,
    pub file: PathBuf,
}

/// Fixed set of component names that may not appear in protected circuits.
#[derive(Debug, Clone)]
pub struct BannedComponentSet {
    components: Vec<(String, Regex)>,
    exempt_files: Vec<String>,
}

impl BannedComponentSet {
    /// Compile the scan patterns. A component is declared as
    /// `<comp ... name="<component>"` on a single line.
    pub fn new(components: &[String], exempt_files: &[String]) -> Result<Self, ConfigError> {
        let components = components
            .iter()
            .map(|name| {
                let pattern = format!(r#"<comp.*\bname="{}""#, regex::escape(name));
                Regex::new(&pattern)
                    .map(|re| (name.clone(), re))
                    .map_err(|source| ConfigError::BannedPattern {
                        name: name.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            components,
            exempt_files: exempt_files.to_vec(),
        })
    }

    pub fn is_exempt(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.exempt_files.iter().any(|e| e == name))
    }

    /// Banned components declared in `content`, in set order.
    pub fn find_in(&self, content: &str) -> Vec<&str> {
        self.components
            .iter()
            .filter(|(_, re)| re.is_match(content))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Scan one circuit file. Exempt files never produce hits.
    pub fn scan(&self, path: &Path) -> std::io::Result<Vec<BannedHit>> {
        if self.is_exempt(path) {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(self
            .find_in(&content)
            .into_iter()
            .map(|component| BannedHit {
                component: component.to_string(),
                file: path.to_path_buf(),
            })
            .collect())
    }
}
