//! Build pipeline.
//!
//! Base mode:
//! validate -> workspace -> image -> resize -> session -> password/ssh
//! -> install runtime + build deps -> verify -> remove emulator -> teardown
//!
//! Incremental mode:
//! validate -> workspace -> image -> redo -> session -> password/ssh
//! -> hooks -> post-build -> purge build deps -> verify -> remove emulator
//! -> teardown
//!
//! Any error aborts the run. The session guard tears down on the way out
//! unless debug mode preserves the mounts for inspection.

pub mod validate;
pub mod verify;

pub use validate::{FixedAnswer, Prompt, TerminalPrompt};

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::access;
use crate::chroot::{self, WorkDirLock};
use crate::config::Config;
use crate::hooks::steps::StepLedger;
use crate::hooks::{run_hook, HookOutcome, HookRun, HookSpec};
use crate::image::{self, ImageOrigin};
use crate::packages::{self, PackageOutcome};
use crate::process::CommandRunner;
use crate::session::{BuildMode, BuildSession};
use crate::timing::{format_duration, Timer};

/// What a finished build did.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub mode: BuildMode,
    pub image: PathBuf,
    pub image_size_mb: Option<u64>,
    pub origin: ImageOrigin,
    pub hooks_run: usize,
    pub hooks_skipped: usize,
    pub installed: Vec<String>,
    pub purged: Vec<String>,
    pub purge_skipped: bool,
    pub duration: Duration,
}

impl BuildReport {
    fn new(session: &BuildSession, origin: ImageOrigin) -> Self {
        Self {
            mode: session.mode,
            image: session.image_path(),
            image_size_mb: None,
            origin,
            hooks_run: 0,
            hooks_skipped: 0,
            installed: Vec::new(),
            purged: Vec::new(),
            purge_skipped: false,
            duration: Duration::ZERO,
        }
    }

    /// Print the summary to stdout.
    pub fn print(&self) {
        println!("\n=== Build Summary ===");
        println!("  Mode:      {}", self.mode);
        match self.image_size_mb {
            Some(mb) => println!("  Image:     {} ({} MB)", self.image.display(), mb),
            None => println!("  Image:     {}", self.image.display()),
        }
        if self.mode == BuildMode::Incremental {
            println!(
                "  Hooks:     {} run, {} already done",
                self.hooks_run, self.hooks_skipped
            );
        }
        if !self.installed.is_empty() {
            println!("  Installed: {}", self.installed.join(" "));
        }
        if !self.purged.is_empty() {
            println!("  Purged:    {}", self.purged.join(" "));
        } else if self.purge_skipped {
            println!("  Purged:    (skipped)");
        }
        println!("  Duration:  {}", format_duration(self.duration));
    }
}

/// Run a complete build for `session`.
pub fn run_build(
    session: &mut BuildSession,
    config: &Config,
    runner: &dyn CommandRunner,
    prompt: &dyn Prompt,
) -> Result<BuildReport> {
    let started = Instant::now();
    tracing::info!("=== {} build: {} ===", session.mode, session.source_image.display());

    let validation = validate::validate(session)?;
    validate::settle(&validation, prompt)?;

    image::prepare_workspace(session)?;
    let _lock = WorkDirLock::acquire(&session.work_dir)?;

    let origin = prepare_image(session, runner, config, prompt)?;
    let mut report = BuildReport::new(session, origin);

    let debug = session.debug;
    let mount_point = session.mount_point();
    let work_dir = session.work_dir.clone();

    let t = Timer::start("Session setup");
    let mut guard = match chroot::open(session, runner, config) {
        Ok(guard) => guard,
        Err(e) => {
            if debug {
                print_debug_help(&mount_point, &work_dir);
            }
            return Err(e);
        }
    };
    t.finish();

    let outcome = customize(&guard, runner, config, &mut report)
        .and_then(|()| strip_build_state(&guard, config));
    if let Err(e) = outcome {
        if guard.debug {
            guard.preserve();
            print_debug_help(&mount_point, &work_dir);
        }
        return Err(e);
    }
    guard.release()?;

    report.image_size_mb = image::image_size_mb(session);
    report.duration = started.elapsed();
    tracing::info!("Build complete: {}", report.image.display());
    Ok(report)
}

fn prepare_image(
    session: &BuildSession,
    runner: &dyn CommandRunner,
    config: &Config,
    prompt: &dyn Prompt,
) -> Result<ImageOrigin> {
    let t = Timer::start("Image preparation");

    let reusing = session.reuse_image && session.image_path().is_file();
    if !reusing {
        let space = image::check_disk_space(session)?;
        if !space.is_sufficient() {
            let err = space.to_error(&session.work_dir);
            tracing::warn!("{}", err);
            if !prompt.confirm("Continue with low disk space?")? {
                return Err(err.into());
            }
        }
    }

    let origin = image::materialize(session, runner)?;
    if origin == ImageOrigin::Reused {
        tracing::info!("[SKIP] Resize: reusing work image");
    } else {
        image::run_resizer(session, runner, config)?;
    }

    t.finish();
    Ok(origin)
}

/// Everything that happens while the session is mounted.
fn customize(
    session: &BuildSession,
    runner: &dyn CommandRunner,
    config: &Config,
    report: &mut BuildReport,
) -> Result<()> {
    let root = session.mount_point();

    access::configure_password(session, runner, config)?;
    if access::wants_ssh(session) {
        access::enable_ssh(session, runner)?;
    }

    match session.mode {
        BuildMode::Base => {
            let t = Timer::start("Dependencies");
            let mut packages = session.runtime_deps.packages.clone();
            packages.extend(session.build_deps.packages.iter().cloned());
            if let PackageOutcome::Installed(installed) = packages::install(runner, &root, &packages)? {
                report.installed = installed;
            }
            t.finish();
        }
        BuildMode::Incremental => {
            tracing::info!("[SKIP] Package install: dependencies come from the base image");

            let mut ledger = StepLedger::load(&root)?;
            let t = Timer::start("Hooks");
            for (i, hook) in session.hooks.iter().enumerate() {
                match run_hook(session, runner, hook, HookRun::Ordinal(i + 1), &mut ledger)? {
                    HookOutcome::Ran => report.hooks_run += 1,
                    HookOutcome::AlreadyDone => report.hooks_skipped += 1,
                }
            }
            t.finish();

            if let Some(script) = &session.post_build_script {
                let t = Timer::start("Post-build");
                let hook = HookSpec::simple(script.clone());
                run_hook(session, runner, &hook, HookRun::PostBuild, &mut ledger)?;
                t.finish();
            }

            if session.keep_build_deps {
                tracing::info!("Purge skipped: keeping build dependencies (--keep-build-deps)");
                report.purge_skipped = true;
            } else {
                let t = Timer::start("Purge");
                match packages::purge(runner, &root, &session.build_deps.packages)? {
                    PackageOutcome::Purged(purged) => report.purged = purged,
                    _ => report.purge_skipped = true,
                }
                t.finish();
            }
        }
    }

    verify::verify(session)
}

/// Remove what only the build needed: the step ledger and the emulator.
fn strip_build_state(session: &BuildSession, config: &Config) -> Result<()> {
    StepLedger::remove(&session.mount_point())?;
    chroot::remove_emulator(session, config)
}

fn print_debug_help(mount_point: &Path, work_dir: &Path) {
    tracing::error!("Debug mode: mounts left in place at {}", mount_point.display());
    eprintln!();
    eprintln!("  Inspect:   sudo chroot {} /bin/bash", mount_point.display());
    eprintln!("  Clean up:  sudo pibake teardown --work-dir {}", work_dir.display());
    eprintln!();
}
