//! Build command - turns CLI options into a session and runs the pipeline.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::deps::{DepIntent, DependencyRef, DependencySet};
use crate::hooks::{parse_hook_list, parse_hook_reference};
use crate::pipeline::{self, BuildReport, Prompt};
use crate::process::CommandRunner;
use crate::session::{BuildMode, BuildSession, Secret};

/// Everything `pibake build` accepts.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// `None` falls back to the configured default mode.
    pub mode: Option<String>,
    pub image: PathBuf,
    pub work_dir: PathBuf,
    pub output_name: Option<String>,
    pub password: Option<String>,
    pub extend_mb: u64,
    pub runtime_deps: Option<String>,
    pub build_deps: Option<String>,
    pub hooks_file: Option<PathBuf>,
    pub hooks: Vec<String>,
    pub post_build: Option<PathBuf>,
    pub keep_build_deps: bool,
    pub debug: bool,
    pub reuse_image: bool,
}

fn load_deps(name: &str, intent: DepIntent, raw: Option<&str>) -> Result<DependencySet> {
    match raw {
        Some(raw) => DependencySet::load(name, intent, DependencyRef::parse(raw)),
        None => Ok(DependencySet::disabled(name, intent)),
    }
}

/// Resolve options into a session: parse the mode, read dependency files and
/// hook lists, absolutize paths.
pub fn session_from_options(opts: &BuildOptions, config: &Config) -> Result<BuildSession> {
    let mode = match &opts.mode {
        Some(raw) => raw.parse::<BuildMode>()?,
        None => config.default_mode,
    };

    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let absolute = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { cwd.join(p) };

    let mut session = BuildSession::new(mode, absolute(&opts.image), absolute(&opts.work_dir));
    if let Some(name) = &opts.output_name {
        session.image_name = name.clone();
    }
    session.password = opts
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(Secret::new);
    session.extend_size_mb = opts.extend_mb;
    session.runtime_deps = load_deps("runtime", DepIntent::Runtime, opts.runtime_deps.as_deref())?;
    session.build_deps = load_deps(
        "build",
        DepIntent::InstallThenPurge,
        opts.build_deps.as_deref(),
    )?;

    if let Some(list) = &opts.hooks_file {
        parse_hook_list(&absolute(list), &mut session.hooks)?;
    }
    for reference in &opts.hooks {
        session.hooks.push(parse_hook_reference(reference, &cwd)?);
    }

    session.post_build_script = opts.post_build.as_deref().map(absolute);
    session.keep_build_deps = opts.keep_build_deps;
    session.debug = opts.debug;
    session.reuse_image = opts.reuse_image;

    tracing::debug!(
        "Session: mode={} hooks={} runtime={} build={}",
        session.mode,
        session.hooks.len(),
        session.runtime_deps.source,
        session.build_deps.source
    );
    Ok(session)
}

/// Execute the build command.
pub fn cmd_build(
    opts: &BuildOptions,
    config: &Config,
    runner: &dyn CommandRunner,
    prompt: &dyn Prompt,
) -> Result<BuildReport> {
    let mut session = session_from_options(opts, config)?;
    let report = pipeline::run_build(&mut session, config, runner, prompt)?;
    report.print();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_mode_from_config() {
        let temp = TempDir::new().unwrap();
        let opts = BuildOptions {
            image: temp.path().join("os.img.xz"),
            work_dir: temp.path().join("work"),
            ..Default::default()
        };
        let config = Config {
            default_mode: BuildMode::Incremental,
            ..Config::default()
        };
        let session = session_from_options(&opts, &config).unwrap();
        assert_eq!(session.mode, BuildMode::Incremental);
        assert_eq!(session.image_name, "os.img");
        assert!(!session.runtime_deps.is_enabled());
    }

    #[test]
    fn test_invalid_mode() {
        let opts = BuildOptions {
            mode: Some("fast".to_string()),
            ..Default::default()
        };
        let err = session_from_options(&opts, &Config::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::InvalidMode(_))
        ));
    }

    #[test]
    fn test_hook_order_list_then_inline() {
        let temp = TempDir::new().unwrap();
        for name in ["a.sh", "b.sh", "c.sh"] {
            fs::write(temp.path().join(name), "#!/bin/sh\n").unwrap();
        }
        fs::write(temp.path().join("hooks.txt"), "a.sh\nb.sh\n").unwrap();
        fs::write(temp.path().join("build.txt"), "cmake\n").unwrap();

        let opts = BuildOptions {
            mode: Some("incremental".to_string()),
            image: temp.path().join("os.img"),
            work_dir: temp.path().join("work"),
            password: Some(String::new()),
            build_deps: Some(temp.path().join("build.txt").display().to_string()),
            runtime_deps: Some("none".to_string()),
            hooks_file: Some(temp.path().join("hooks.txt")),
            hooks: vec![temp.path().join("c.sh").display().to_string()],
            ..Default::default()
        };
        let session = session_from_options(&opts, &Config::default()).unwrap();
        let names: Vec<String> = session.hooks.iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(session.build_deps.packages, vec!["cmake"]);
        assert!(!session.runtime_deps.is_enabled());
        assert!(session.password.is_none());
    }
}
