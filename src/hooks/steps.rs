//! Declared steps with completion markers.
//!
//! Each unit of hook work is a [`DeclaredStep`] carrying a [`Marker`]. The
//! engine consults the marker before running the step and skips it when the
//! work is already there, so a rerun over a partially built image resumes
//! instead of repeating clones and installs.
//!
//! Record markers are persisted in a JSON ledger inside the target root.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::HookSpec;

/// Ledger location relative to the target root.
pub const LEDGER_DIR: &str = "var/lib/pibake";
const LEDGER_FILE: &str = "steps.json";

/// How completion of a step is detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// Complete when this path (relative to the target root) exists.
    Path(PathBuf),
    /// Complete when the step id is recorded in the ledger.
    Record,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredStep {
    pub id: String,
    pub marker: Marker,
}

impl DeclaredStep {
    pub fn record(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            marker: Marker::Record,
        }
    }

    pub fn path(id: impl Into<String>, marker: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            marker: Marker::Path(marker.into()),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    completed: BTreeSet<String>,
}

/// Completed-step records for one target root.
#[derive(Debug)]
pub struct StepLedger {
    root: PathBuf,
    completed: BTreeSet<String>,
}

impl StepLedger {
    /// Load the ledger under `root`, starting empty if there is none.
    pub fn load(root: &Path) -> Result<Self> {
        let path = ledger_path(root);
        let completed = if path.is_file() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read step ledger {}", path.display()))?;
            let file: LedgerFile = serde_json::from_str(&content)
                .with_context(|| format!("Corrupted step ledger {}", path.display()))?;
            file.completed
        } else {
            BTreeSet::new()
        };
        Ok(Self {
            root: root.to_path_buf(),
            completed,
        })
    }

    pub fn is_complete(&self, step: &DeclaredStep) -> bool {
        match &step.marker {
            Marker::Path(rel) => self.root.join(strip_root(rel)).exists(),
            Marker::Record => self.completed.contains(&step.id),
        }
    }

    /// Record completion and persist immediately, so a crash right after a
    /// step still leaves the record behind.
    pub fn mark_complete(&mut self, step: &DeclaredStep) -> Result<()> {
        if step.marker == Marker::Record && self.completed.insert(step.id.clone()) {
            self.save()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    fn save(&self) -> Result<()> {
        let path = ledger_path(&self.root);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = LedgerFile {
            completed: self.completed.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write step ledger {}", path.display()))
    }

    /// Drop all build state from the target root.
    pub fn remove(root: &Path) -> Result<()> {
        let dir = root.join(LEDGER_DIR);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
        }
        Ok(())
    }
}

fn ledger_path(root: &Path) -> PathBuf {
    root.join(LEDGER_DIR).join(LEDGER_FILE)
}

/// Target paths are written absolute (`/opt/app`); join them under the root.
pub fn strip_root(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}

/// Stable short fingerprint of a hook's definition. Editing the hook record
/// or the script body changes every step id derived from it.
pub fn fingerprint(hook: &HookSpec) -> String {
    let mut hasher = Sha256::new();
    hasher.update(hook.script.to_string_lossy().as_bytes());
    // An unreadable script fails later, when it is copied in.
    if let Ok(body) = fs::read(&hook.script) {
        hasher.update([0u8]);
        hasher.update(&body);
    }
    if let Some(p) = &hook.params {
        for field in [&p.source_ref, &p.revision, &p.install_dest, &p.dep_list] {
            hasher.update([0u8]);
            hasher.update(field.as_bytes());
        }
        if let Some(post) = &p.post_install {
            hasher.update([0u8]);
            hasher.update(post.as_bytes());
        }
    }
    let digest = format!("{:x}", hasher.finalize());
    digest[..12].to_string()
}
