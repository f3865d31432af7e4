//! Hooks: scripts run inside the target chroot to set up one application.
//!
//! - `parse` - hook-list files and inline hook references
//! - `steps` - declared steps with completion markers (resumability)
//! - `engine` - environment, copy-in, execution, cleanup

pub mod engine;
pub mod parse;
pub mod steps;

pub use engine::{run_hook, HookOutcome, HookRun};
pub use parse::{parse_hook_list, parse_hook_reference};

use std::path::{Path, PathBuf};

/// Scheme prefix designating a host-side source tree.
pub const LOCAL_SOURCE_PREFIX: &str = "file://";

/// Where a parameterized hook's source comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookSource {
    /// Empty source field.
    None,
    /// Anything not prefixed with `file://` is treated as a repository URL.
    Remote(String),
    /// A `file://` reference. Decided by prefix only; never probed.
    Local(PathBuf),
}

impl HookSource {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            HookSource::None
        } else if let Some(path) = raw.strip_prefix(LOCAL_SOURCE_PREFIX) {
            HookSource::Local(PathBuf::from(path))
        } else {
            HookSource::Remote(raw.to_string())
        }
    }

    /// Final path segment with any `.git` suffix removed.
    pub fn name(&self) -> Option<String> {
        let segment = match self {
            HookSource::None => return None,
            HookSource::Remote(url) => url
                .trim_end_matches('/')
                .rsplit(['/', ':'])
                .next()
                .unwrap_or(url)
                .to_string(),
            HookSource::Local(path) => path.file_name()?.to_string_lossy().into_owned(),
        };
        let name = segment.strip_suffix(".git").unwrap_or(&segment);
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

/// Extra fields of a parameterized hook record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookParams {
    /// The source field exactly as written.
    pub source_ref: String,
    pub source: HookSource,
    /// Tag or branch; ignored for local sources.
    pub revision: String,
    /// Install destination inside the target root.
    pub install_dest: String,
    /// Comma-separated package names, as written.
    pub dep_list: String,
    pub post_install: Option<String>,
}

impl HookParams {
    /// Packages named by the dependency field.
    pub fn dependencies(&self) -> Vec<String> {
        self.dep_list
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// One unit of post-base customization. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookSpec {
    /// Absolute path to the script on the host.
    pub script: PathBuf,
    /// `None` for a simple (script-only) hook.
    pub params: Option<HookParams>,
}

impl HookSpec {
    pub fn simple(script: PathBuf) -> Self {
        Self {
            script,
            params: None,
        }
    }

    pub fn is_parameterized(&self) -> bool {
        self.params.is_some()
    }

    /// Name used for `HOOK_NAME`, ledger keys and log lines.
    pub fn name(&self) -> String {
        self.params
            .as_ref()
            .and_then(|p| p.source.name())
            .unwrap_or_else(|| script_stem(&self.script))
    }
}

fn script_stem(script: &Path) -> String {
    script
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hook".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_name_strips_git() {
        let source = HookSource::parse("https://example.com/org/Thing.git");
        assert_eq!(source, HookSource::Remote("https://example.com/org/Thing.git".into()));
        assert_eq!(source.name().as_deref(), Some("Thing"));
    }

    #[test]
    fn test_remote_name_without_suffix_and_trailing_slash() {
        let source = HookSource::parse("https://example.com/org/tool/");
        assert_eq!(source.name().as_deref(), Some("tool"));
    }

    #[test]
    fn test_scp_style_url() {
        let source = HookSource::parse("git@example.com:repo.git");
        assert_eq!(source.name().as_deref(), Some("repo"));
    }

    #[test]
    fn test_local_source_by_prefix_only() {
        // The path does not exist; classification must not depend on that.
        let source = HookSource::parse("file:///nonexistent/src");
        assert_eq!(source, HookSource::Local(PathBuf::from("/nonexistent/src")));
        assert_eq!(source.name().as_deref(), Some("src"));
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(HookSource::parse("  "), HookSource::None);
        assert_eq!(HookSource::None.name(), None);
    }

    #[test]
    fn test_dependency_field_split() {
        let params = HookParams {
            source_ref: String::new(),
            source: HookSource::None,
            revision: String::new(),
            install_dest: String::new(),
            dep_list: "libssl-dev, cmake,,".to_string(),
            post_install: None,
        };
        assert_eq!(params.dependencies(), vec!["libssl-dev", "cmake"]);
    }

    #[test]
    fn test_simple_hook_name_from_script() {
        let hook = HookSpec::simple(PathBuf::from("/hooks/10-enable-i2c.sh"));
        assert_eq!(hook.name(), "10-enable-i2c");
        assert!(!hook.is_parameterized());
    }
}
