//! Package lifecycle inside the chroot.
//!
//! `install` runs `apt-get update` then `apt-get install`; `purge` runs
//! `update`, `purge`, `autoremove --purge` and `clean`. Any non-zero exit is
//! fatal and reported with the failing sub-command and the package list.

use anyhow::Result;
use std::path::Path;

use crate::chroot::chroot_cmd;
use crate::error::BuildError;
use crate::process::{Cmd, CommandRunner};

/// What a package operation actually did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOutcome {
    Installed(Vec<String>),
    Purged(Vec<String>),
    /// Nothing to do; the package manager was not invoked.
    Skipped(&'static str),
}

fn apt(root: &Path, sub: &[&str]) -> Cmd {
    chroot_cmd(root)
        .arg("apt-get")
        .args(sub)
        .env("DEBIAN_FRONTEND", "noninteractive")
        .env("LC_ALL", "C")
}

fn run_step(
    runner: &dyn CommandRunner,
    cmd: Cmd,
    step: &str,
    packages: &[String],
) -> Result<()> {
    let status = cmd.allow_fail().run_interactive_with(runner)?;
    if !status.success() {
        tracing::error!(
            "apt-get {} exited with {}",
            step,
            status.code().unwrap_or(-1)
        );
        return Err(BuildError::PackageOperationFailed {
            step: step.to_string(),
            packages: packages.to_vec(),
        }
        .into());
    }
    Ok(())
}

/// Install packages inside the chroot rooted at `root`.
///
/// Already-installed packages are left to apt-get; this layer does not
/// re-verify them.
pub fn install(
    runner: &dyn CommandRunner,
    root: &Path,
    packages: &[String],
) -> Result<PackageOutcome> {
    if packages.is_empty() {
        tracing::info!("No packages to install");
        return Ok(PackageOutcome::Skipped("empty package list"));
    }

    tracing::info!("Installing {} package(s): {}", packages.len(), packages.join(" "));
    run_step(runner, apt(root, &["update"]), "update", packages)?;
    run_step(
        runner,
        apt(root, &["install", "-y", "--no-install-recommends"]).args(packages),
        "install",
        packages,
    )?;

    Ok(PackageOutcome::Installed(packages.to_vec()))
}

/// Purge packages and clean up what they pulled in.
pub fn purge(
    runner: &dyn CommandRunner,
    root: &Path,
    packages: &[String],
) -> Result<PackageOutcome> {
    if packages.is_empty() {
        tracing::info!("Purge skipped: empty package list");
        return Ok(PackageOutcome::Skipped("empty package list"));
    }

    tracing::info!("Purging {} package(s): {}", packages.len(), packages.join(" "));
    run_step(runner, apt(root, &["update"]), "update", packages)?;
    run_step(runner, apt(root, &["purge", "-y"]).args(packages), "purge", packages)?;
    run_step(
        runner,
        apt(root, &["autoremove", "--purge", "-y"]),
        "autoremove",
        packages,
    )?;
    run_step(runner, apt(root, &["clean"]), "clean", packages)?;

    Ok(PackageOutcome::Purged(packages.to_vec()))
}
