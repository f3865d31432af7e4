//! Dependency file parsing.
//!
//! A dependency file is plain text: one package token per line, `#` comment
//! lines and blank lines ignored. Inline trailing comments are NOT stripped;
//! `git # vcs` is passed to the installer verbatim as a single token.

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BuildError;

/// Sentinel that disables a dependency set instead of naming a file.
pub const NONE_SENTINEL: &str = "none";

/// What happens to a dependency set over the image's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepIntent {
    /// Installed in base mode and kept in the delivered image.
    Runtime,
    /// Installed in base mode only.
    BaseOnly,
    /// Installed in base mode and purged at the end of incremental mode.
    InstallThenPurge,
}

/// A reference to a dependency file as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyRef {
    /// The literal `none`: the set is disabled.
    Disabled,
    File(PathBuf),
}

impl DependencyRef {
    pub fn parse(raw: &str) -> Self {
        if raw.trim() == NONE_SENTINEL {
            DependencyRef::Disabled
        } else {
            DependencyRef::File(PathBuf::from(raw))
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, DependencyRef::Disabled)
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyRef::Disabled => f.write_str(NONE_SENTINEL),
            DependencyRef::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// A named, ordered list of packages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySet {
    pub name: String,
    pub intent: DepIntent,
    pub source: DependencyRef,
    /// Insertion order is preserved; duplicates are not removed.
    pub packages: Vec<String>,
}

impl DependencySet {
    pub fn disabled(name: &str, intent: DepIntent) -> Self {
        Self {
            name: name.to_string(),
            intent,
            source: DependencyRef::Disabled,
            packages: Vec::new(),
        }
    }

    /// Resolve a reference into a set, reading the file if there is one.
    pub fn load(name: &str, intent: DepIntent, source: DependencyRef) -> Result<Self> {
        let packages = match &source {
            DependencyRef::Disabled => Vec::new(),
            DependencyRef::File(path) => parse_dependency_file(path)?,
        };
        Ok(Self {
            name: name.to_string(),
            intent,
            source,
            packages,
        })
    }

    pub fn is_enabled(&self) -> bool {
        !self.source.is_disabled()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Parse a dependency file into package tokens, in file order.
pub fn parse_dependency_file(path: &Path) -> Result<Vec<String>> {
    if !path.is_file() {
        return Err(BuildError::ConfigNotFound(path.to_path_buf()).into());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read dependency file {}", path.display()))?;
    Ok(parse_dependency_list(&content))
}

/// Parse dependency file content.
pub fn parse_dependency_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
