//! Hook execution engine.
//!
//! For each hook: build the environment, fetch the source (parameterized
//! hooks), install the hook's packages, copy the script into the chroot, run
//! it, then run any post-install commands. Every piece is a declared step, so
//! a rerun skips what the ledger or the filesystem says is already done.
//!
//! The script copy is removed after a successful run and left in place after
//! a failure for inspection.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::steps::{fingerprint, strip_root, DeclaredStep, StepLedger};
use super::{HookSource, HookSpec};
use crate::chroot::chroot_cmd;
use crate::error::BuildError;
use crate::packages;
use crate::process::CommandRunner;
use crate::session::BuildSession;

/// Transient location of the script inside the target root.
pub const HOOK_TARGET: &str = "tmp/pibake-hook.sh";

/// Which slot a hook occupies in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookRun {
    /// 1-based position in the hook sequence.
    Ordinal(usize),
    /// The system-wide post-build script.
    PostBuild,
}

impl HookRun {
    fn label(&self) -> String {
        match self {
            HookRun::Ordinal(n) => format!("hook #{}", n),
            HookRun::PostBuild => "post-build".to_string(),
        }
    }

    /// Ledger key for the slot; keeps duplicate list entries apart.
    fn key(&self) -> String {
        match self {
            HookRun::Ordinal(n) => format!("hook-{}", n),
            HookRun::PostBuild => "post-build".to_string(),
        }
    }

    fn failure(&self, script: &Path, code: i32) -> BuildError {
        match self {
            HookRun::Ordinal(ordinal) => BuildError::HookFailed {
                hook: script.to_path_buf(),
                ordinal: *ordinal,
                code,
            },
            HookRun::PostBuild => BuildError::PostBuildFailed {
                script: script.to_path_buf(),
                code,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Ran,
    /// The ledger already records this hook as done.
    AlreadyDone,
}

/// How a parameterized hook's source reaches the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPlan {
    Clone {
        url: String,
        revision: String,
        dest: PathBuf,
    },
    CopyLocal {
        from: PathBuf,
        dest: PathBuf,
    },
}

impl FetchPlan {
    /// Target path (absolute inside the chroot) that the source lands in.
    pub fn dest(&self) -> &Path {
        match self {
            FetchPlan::Clone { dest, .. } | FetchPlan::CopyLocal { dest, .. } => dest,
        }
    }
}

/// Decide how to fetch a hook's source, if it has one and a destination.
pub fn fetch_plan(hook: &HookSpec) -> Option<FetchPlan> {
    let params = hook.params.as_ref()?;
    if params.install_dest.is_empty() {
        return None;
    }
    let name = params.source.name()?;
    let dest = Path::new("/").join(strip_root(Path::new(&params.install_dest))).join(name);

    match &params.source {
        HookSource::None => None,
        HookSource::Remote(url) => Some(FetchPlan::Clone {
            url: url.clone(),
            revision: params.revision.clone(),
            dest,
        }),
        HookSource::Local(from) => Some(FetchPlan::CopyLocal {
            from: from.clone(),
            dest,
        }),
    }
}

/// Environment exposed to the hook process.
pub fn hook_environment(session: &BuildSession, hook: &HookSpec) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert(
        "MOUNT_POINT".to_string(),
        session.mount_point().display().to_string(),
    );
    env.insert(
        "PI_PASSWORD".to_string(),
        session.password_value().to_string(),
    );
    env.insert(
        "IMAGE_WORK_DIR".to_string(),
        session.work_dir.display().to_string(),
    );

    if let Some(params) = &hook.params {
        env.insert("HOOK_GIT_REPO".to_string(), params.source_ref.clone());
        env.insert("HOOK_GIT_TAG".to_string(), params.revision.clone());
        env.insert("HOOK_INSTALL_DEST".to_string(), params.install_dest.clone());
        env.insert("HOOK_NAME".to_string(), hook.name());
        env.insert("HOOK_DEP_LIST".to_string(), params.dep_list.clone());
        if let HookSource::Local(path) = &params.source {
            env.insert(
                "HOOK_LOCAL_SOURCE".to_string(),
                path.display().to_string(),
            );
        }
        env.insert(
            "DEBUG_MODE".to_string(),
            if session.debug { "true" } else { "false" }.to_string(),
        );
    }
    env
}

/// Steps a hook declares, in execution order.
pub fn declared_steps(hook: &HookSpec, slot: HookRun) -> Vec<DeclaredStep> {
    let prefix = format!("{}:{}:{}", slot.key(), hook.name(), fingerprint(hook));
    let mut steps = Vec::new();

    if let Some(plan) = fetch_plan(hook) {
        let marker = match &plan {
            FetchPlan::Clone { dest, .. } => dest.join(".git"),
            FetchPlan::CopyLocal { dest, .. } => dest.clone(),
        };
        steps.push(DeclaredStep::path(format!("{}:fetch-source", prefix), marker));
    }
    if let Some(params) = &hook.params {
        if !params.dependencies().is_empty() {
            steps.push(DeclaredStep::record(format!("{}:install-deps", prefix)));
        }
    }
    steps.push(DeclaredStep::record(format!("{}:script", prefix)));
    if hook
        .params
        .as_ref()
        .and_then(|p| p.post_install.as_ref())
        .is_some()
    {
        steps.push(DeclaredStep::record(format!("{}:post-install", prefix)));
    }
    steps
}

/// Run one hook inside the session's chroot.
pub fn run_hook(
    session: &BuildSession,
    runner: &dyn CommandRunner,
    hook: &HookSpec,
    slot: HookRun,
    ledger: &mut StepLedger,
) -> Result<HookOutcome> {
    let root = session.mount_point();
    let env = hook_environment(session, hook);
    let steps = declared_steps(hook, slot);

    if steps.iter().all(|s| ledger.is_complete(s)) {
        tracing::info!("[SKIP] {} {} already done", slot.label(), hook.name());
        return Ok(HookOutcome::AlreadyDone);
    }

    tracing::info!(
        "Running {} {} ({})",
        slot.label(),
        hook.name(),
        hook.script.display()
    );

    for step in &steps {
        if ledger.is_complete(step) {
            tracing::info!("  [SKIP] {}", step.id);
            continue;
        }
        let kind = step.id.rsplit(':').next().unwrap_or_default();
        match kind {
            "fetch-source" => {
                if let Some(plan) = fetch_plan(hook) {
                    fetch_source(runner, &root, &plan, hook, slot)?;
                }
            }
            "install-deps" => {
                let deps = hook
                    .params
                    .as_ref()
                    .map(|p| p.dependencies())
                    .unwrap_or_default();
                packages::install(runner, &root, &deps)?;
            }
            "script" => run_script(session, runner, &root, hook, slot, &env)?,
            "post-install" => {
                if let Some(commands) = hook.params.as_ref().and_then(|p| p.post_install.as_ref()) {
                    let status = chroot_cmd(&root)
                        .args(["/bin/bash", "-c", commands.as_str()])
                        .envs(&env)
                        .secret(session.password_value())
                        .allow_fail()
                        .run_interactive_with(runner)?;
                    if !status.success() {
                        return Err(slot.failure(&hook.script, status.code().unwrap_or(-1)).into());
                    }
                }
            }
            other => bail!("Unknown hook step '{}'", other),
        }
        ledger.mark_complete(step)?;
    }

    Ok(HookOutcome::Ran)
}

fn fetch_source(
    runner: &dyn CommandRunner,
    root: &Path,
    plan: &FetchPlan,
    hook: &HookSpec,
    slot: HookRun,
) -> Result<()> {
    match plan {
        FetchPlan::Clone {
            url,
            revision,
            dest,
        } => {
            tracing::info!("  Cloning {} into {}", url, dest.display());
            let mut cmd = chroot_cmd(root).args(["git", "clone", "--depth", "1"]);
            if !revision.is_empty() {
                cmd = cmd.args(["--branch", revision.as_str()]);
            }
            let status = cmd
                .arg(url)
                .arg_path(dest)
                .allow_fail()
                .run_interactive_with(runner)?;
            if !status.success() {
                return Err(slot.failure(&hook.script, status.code().unwrap_or(-1)).into());
            }
        }
        FetchPlan::CopyLocal { from, dest } => {
            let target = root.join(strip_root(dest));
            tracing::info!("  Copying {} into {}", from.display(), dest.display());
            copy_tree(from, &target)
                .with_context(|| format!("Failed to copy local source for {}", hook.name()))?;
        }
    }
    Ok(())
}

fn run_script(
    session: &BuildSession,
    runner: &dyn CommandRunner,
    root: &Path,
    hook: &HookSpec,
    slot: HookRun,
    env: &BTreeMap<String, String>,
) -> Result<()> {
    let mode = fs::metadata(&hook.script)
        .with_context(|| format!("Failed to stat {}", hook.script.display()))?
        .permissions()
        .mode();
    if mode & 0o111 == 0 {
        tracing::warn!(
            "{} is not executable; forcing mode 0755 on the chroot copy",
            hook.script.display()
        );
    }

    let target = root.join(HOOK_TARGET);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&hook.script, &target)
        .with_context(|| format!("Failed to copy {} into chroot", hook.script.display()))?;
    fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;

    let status = chroot_cmd(root)
        .arg("/bin/bash")
        .arg(format!("/{}", HOOK_TARGET))
        .envs(env)
        .secret(session.password_value())
        .allow_fail()
        .run_interactive_with(runner)?;

    if !status.success() {
        let code = status.code().unwrap_or(-1);
        tracing::error!(
            "{} failed; script left at {} for inspection",
            slot.label(),
            target.display()
        );
        return Err(slot.failure(&hook.script, code).into());
    }

    fs::remove_file(&target)
        .with_context(|| format!("Failed to remove {}", target.display()))?;
    Ok(())
}

/// Recursively copy a host directory (or single file) to `to`.
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    if !from.exists() {
        bail!("Local source {} does not exist", from.display());
    }
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(from)?;
        let dest = to.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if fs::symlink_metadata(&dest).is_ok() {
                fs::remove_file(&dest)?;
            }
            std::os::unix::fs::symlink(link, &dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}
