//! Hook-list parsing.
//!
//! Format: one record per line, `#` comments and blank lines ignored.
//!
//! ```text
//! # simple: script only
//! hooks/enable-i2c.sh
//! # parameterized: script|source|revision|install dest|deps[|post-install]
//! hooks/build-app.sh|https://example.com/org/app.git|v1.2|/opt|cmake,libssl-dev
//! hooks/local.sh|file://../src/tool||/opt|
//! ```
//!
//! Anything with 2, 3 or 4 fields is malformed. Fields past the sixth belong
//! to the post-install commands, which may themselves contain `|`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::{HookParams, HookSource, HookSpec, LOCAL_SOURCE_PREFIX};
use crate::error::BuildError;

/// Where a record came from, for error messages and relative paths.
struct Origin<'a> {
    file: &'a Path,
    line: usize,
    base_dir: &'a Path,
}

/// Parse a hook-list file and append its hooks, in file order, to `hooks`.
pub fn parse_hook_list(path: &Path, hooks: &mut Vec<HookSpec>) -> Result<usize> {
    if !path.is_file() {
        return Err(BuildError::ConfigNotFound(path.to_path_buf()).into());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read hook list {}", path.display()))?;

    let path = absolutize(path, &std::env::current_dir()?);
    let base_dir = path.parent().unwrap_or(Path::new("/")).to_path_buf();

    let mut added = 0;
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let origin = Origin {
            file: &path,
            line: idx + 1,
            base_dir: &base_dir,
        };
        hooks.push(parse_record(line, &origin)?);
        added += 1;
    }

    tracing::debug!("Parsed {} hook(s) from {}", added, path.display());
    Ok(added)
}

/// Parse a single hook reference given inline (e.g. `--hook`), resolving
/// relative paths against `base_dir`.
pub fn parse_hook_reference(reference: &str, base_dir: &Path) -> Result<HookSpec> {
    let origin = Origin {
        file: Path::new("<command line>"),
        line: 1,
        base_dir,
    };
    parse_record(reference.trim(), &origin)
}

fn parse_record(line: &str, origin: &Origin<'_>) -> Result<HookSpec> {
    let fields: Vec<&str> = line.split('|').collect();

    let params = match fields.len() {
        1 => None,
        n if n >= 5 => {
            let post_install = if n > 5 {
                let joined = fields[5..].join("|");
                let joined = joined.trim();
                (!joined.is_empty()).then(|| joined.to_string())
            } else {
                None
            };
            let source_ref = fields[1].trim().to_string();
            Some(HookParams {
                source: resolve_source(&source_ref, origin.base_dir),
                source_ref,
                revision: fields[2].trim().to_string(),
                install_dest: fields[3].trim().to_string(),
                dep_list: fields[4].trim().to_string(),
                post_install,
            })
        }
        n => {
            return Err(BuildError::MalformedHookLine {
                path: origin.file.to_path_buf(),
                line: origin.line,
                fields: n,
            }
            .into())
        }
    };

    let script = absolutize(Path::new(fields[0].trim()), origin.base_dir);
    if !script.is_file() {
        return Err(BuildError::HookScriptNotFound {
            list: origin.file.to_path_buf(),
            line: origin.line,
            script,
        }
        .into());
    }

    Ok(HookSpec { script, params })
}

/// Local sources given relative to the list are anchored at the list's dir.
fn resolve_source(raw: &str, base_dir: &Path) -> HookSource {
    match HookSource::parse(raw) {
        HookSource::Local(path) if path.is_relative() => {
            HookSource::Local(base_dir.join(path))
        }
        other => other,
    }
}

fn absolutize(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Render a hook back into list syntax (used by `pibake show hooks`).
pub fn format_record(hook: &HookSpec) -> String {
    match &hook.params {
        None => hook.script.display().to_string(),
        Some(p) => {
            let source = match &p.source {
                HookSource::Local(path) => format!("{}{}", LOCAL_SOURCE_PREFIX, path.display()),
                _ => p.source_ref.clone(),
            };
            let mut record = format!(
                "{}|{}|{}|{}|{}",
                hook.script.display(),
                source,
                p.revision,
                p.install_dest,
                p.dep_list
            );
            if let Some(post) = &p.post_install {
                record.push('|');
                record.push_str(post);
            }
            record
        }
    }
}
