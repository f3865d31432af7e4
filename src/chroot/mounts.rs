//! Partition mounts, pseudo-filesystem binds, emulator install and teardown.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::loopdev::{self, partition_node};
use crate::config::Config;
use crate::error::BuildError;
use crate::process::{Cmd, CommandRunner};
use crate::session::{BuildSession, SessionStage};

/// Boot partition mount point relative to the target root.
pub const BOOT_DIR: &str = "boot/firmware";

/// Host pseudo-filesystems bound into the target, in mount order.
pub const PSEUDO_FS: [(&str, &str); 4] = [
    ("/proc", "proc"),
    ("/sys", "sys"),
    ("/dev", "dev"),
    ("/dev/pts", "dev/pts"),
];

const RESOLV_CONF: &str = "etc/resolv.conf";
const RESOLV_BACKUP: &str = "etc/resolv.conf.pibake-orig";
/// Present when the target had no resolv.conf of its own.
const RESOLV_ADDED: &str = "etc/resolv.conf.pibake-added";

/// Mount partition 2 (root) at the mount point and partition 1 (boot) under it.
pub fn mount_partitions(session: &mut BuildSession, runner: &dyn CommandRunner) -> Result<()> {
    let device = session
        .mount
        .loop_device
        .clone()
        .context("No loop device attached")?;
    let root = session.mount_point();
    fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create mount point {}", root.display()))?;

    mount_device(runner, "root", &partition_node(&device, 2), &root)?;

    let boot = root.join(BOOT_DIR);
    fs::create_dir_all(&boot)
        .with_context(|| format!("Failed to create {}", boot.display()))?;
    mount_device(runner, "boot", &partition_node(&device, 1), &boot)?;

    session.mount.stage = SessionStage::PartitionsMounted;
    tracing::info!("Mounted {} at {}", device, root.display());
    Ok(())
}

fn mount_device(
    runner: &dyn CommandRunner,
    partition: &'static str,
    device: &str,
    target: &Path,
) -> Result<()> {
    let result = Cmd::new("mount")
        .arg(device)
        .arg_path(target)
        .allow_fail()
        .run_with(runner)?;
    if !result.success() {
        tracing::error!("mount {} failed: {}", device, result.stderr_trimmed());
        return Err(BuildError::MountFailed {
            partition,
            device: device.to_string(),
            target: target.to_path_buf(),
        }
        .into());
    }
    Ok(())
}

/// Bind-mount `/proc`, `/sys`, `/dev`, `/dev/pts` and install the host's
/// resolver config so the chroot has DNS.
pub fn bind_pseudo_filesystems(
    session: &mut BuildSession,
    runner: &dyn CommandRunner,
    config: &Config,
) -> Result<()> {
    let root = session.mount_point();

    for (source, rel) in PSEUDO_FS {
        let target = root.join(rel);
        fs::create_dir_all(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        let result = Cmd::new("mount")
            .arg("--bind")
            .arg(source)
            .arg_path(&target)
            .allow_fail()
            .run_with(runner)?;
        if !result.success() {
            return Err(BuildError::MountFailed {
                partition: rel_label(rel),
                device: source.to_string(),
                target,
            }
            .into());
        }
    }

    install_resolv_conf(&root, &config.resolv_conf)?;
    session.mount.stage = SessionStage::PseudoFsBound;
    Ok(())
}

fn rel_label(rel: &str) -> &'static str {
    match rel {
        "proc" => "proc",
        "sys" => "sys",
        "dev" => "dev",
        _ => "dev/pts",
    }
}

fn install_resolv_conf(root: &Path, host_resolv: &Path) -> Result<()> {
    if !host_resolv.is_file() {
        tracing::warn!(
            "{} not found; the chroot may have no DNS",
            host_resolv.display()
        );
        return Ok(());
    }

    let target = root.join(RESOLV_CONF);
    let backup = root.join(RESOLV_BACKUP);
    let added = root.join(RESOLV_ADDED);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    // symlink_metadata: the target's resolv.conf is often a dangling symlink
    // into /run, and must be moved aside rather than followed. An `added`
    // marker means the current file is our own copy from an earlier install.
    if !added.exists() {
        let has_backup = fs::symlink_metadata(&backup).is_ok();
        if fs::symlink_metadata(&target).is_ok() {
            if has_backup {
                fs::remove_file(&target)?;
            } else {
                fs::rename(&target, &backup)
                    .with_context(|| format!("Failed to back up {}", target.display()))?;
            }
        } else if !has_backup {
            fs::write(&added, "")?;
        }
    }
    fs::copy(host_resolv, &target)
        .with_context(|| format!("Failed to copy {} into chroot", host_resolv.display()))?;
    Ok(())
}

fn restore_resolv_conf(root: &Path) -> Result<()> {
    let backup = root.join(RESOLV_BACKUP);
    let added = root.join(RESOLV_ADDED);
    let target = root.join(RESOLV_CONF);
    if added.exists() {
        if fs::symlink_metadata(&target).is_ok() {
            fs::remove_file(&target)?;
        }
        fs::remove_file(&added)?;
        return Ok(());
    }
    if fs::symlink_metadata(&backup).is_err() {
        return Ok(());
    }
    if fs::symlink_metadata(&target).is_ok() {
        fs::remove_file(&target)?;
    }
    fs::rename(&backup, &target)
        .with_context(|| format!("Failed to restore {}", target.display()))
}

/// Path of the emulator inside the target root.
pub fn emulator_target(root: &Path, config: &Config) -> PathBuf {
    root.join("usr/bin").join(config.emulator_name())
}

/// Copy the static emulator into the target's `usr/bin`.
pub fn install_emulator(
    session: &mut BuildSession,
    config: &Config,
) -> Result<()> {
    if !config.qemu_binary.is_file() {
        return Err(BuildError::EmulatorMissing(config.qemu_binary.clone()).into());
    }
    let target = emulator_target(&session.mount_point(), config);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(&config.qemu_binary, &target)
        .with_context(|| format!("Failed to install emulator at {}", target.display()))?;
    fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;

    session.mount.stage = SessionStage::EmulatorInstalled;
    tracing::debug!("Installed emulator {}", target.display());
    Ok(())
}

/// Remove the emulator before the image is delivered.
pub fn remove_emulator(session: &BuildSession, config: &Config) -> Result<()> {
    let target = emulator_target(&session.mount_point(), config);
    match fs::remove_file(&target) {
        Ok(()) => {
            tracing::info!("Removed emulator {}", target.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", target.display())),
    }
}

/// Run a no-op inside the chroot to prove emulation works.
pub fn verify_chroot(session: &mut BuildSession, runner: &dyn CommandRunner) -> Result<()> {
    let root = session.mount_point();
    let outcome = Cmd::new("chroot")
        .arg_path(&root)
        .arg("/bin/true")
        .allow_fail()
        .run_with(runner);

    let reason = match outcome {
        Ok(result) if result.success() => None,
        Ok(result) => Some(format!(
            "exit code {}: {}",
            result.code(),
            result.stderr_trimmed()
        )),
        Err(e) => Some(format!("{:#}", e)),
    };

    if let Some(reason) = reason {
        return Err(BuildError::ChrootUnusable { root, reason }.into());
    }

    session.mount.stage = SessionStage::Ready;
    tracing::info!("Chroot at {} is ready", root.display());
    Ok(())
}

/// Unmount targets in teardown order.
pub fn teardown_targets(root: &Path) -> Vec<PathBuf> {
    let mut targets: Vec<PathBuf> = PSEUDO_FS.iter().rev().map(|(_, rel)| root.join(rel)).collect();
    targets.push(root.join(BOOT_DIR));
    targets.push(root.to_path_buf());
    targets
}

/// Release everything the session holds, in strict reverse order.
///
/// Idempotent: "not mounted" and "already detached" count as success, so it
/// is safe after a partial failure and safe to call twice. Unexpected
/// failures do not stop the remaining steps; they are reported together at
/// the end.
pub fn teardown(session: &mut BuildSession, runner: &dyn CommandRunner) -> Result<()> {
    let root = session.mount_point();
    let mut failures = Vec::new();

    if let Err(e) = restore_resolv_conf(&root) {
        failures.push(format!("{:#}", e));
    }

    for target in teardown_targets(&root) {
        if let Err(e) = unmount(runner, &target) {
            failures.push(format!("{:#}", e));
        }
    }

    let marker = session.loop_marker();
    let device = session
        .mount
        .loop_device
        .take()
        .or_else(|| loopdev::read_marker(&marker));
    if let Some(device) = device {
        match loopdev::detach_loop(runner, &device) {
            Ok(()) => {
                if let Err(e) = loopdev::remove_marker(&marker) {
                    failures.push(format!("{:#}", e));
                }
            }
            Err(e) => {
                // Keep ownership so a later teardown can retry.
                session.mount.loop_device = Some(device);
                failures.push(format!("{:#}", e));
            }
        }
    } else {
        loopdev::remove_marker(&marker)?;
    }

    if failures.is_empty() {
        session.mount.stage = SessionStage::TornDown;
        Ok(())
    } else {
        anyhow::bail!("Teardown incomplete:\n  {}", failures.join("\n  "))
    }
}

/// Lazy unmount; a target that is not mounted is success.
fn unmount(runner: &dyn CommandRunner, target: &Path) -> Result<()> {
    if !target.exists() {
        return Ok(());
    }
    let result = Cmd::new("umount")
        .arg("--lazy")
        .arg_path(target)
        .allow_fail()
        .run_with(runner)?;

    if result.success() {
        tracing::debug!("Unmounted {}", target.display());
        return Ok(());
    }
    let stderr = result.stderr_trimmed();
    if is_not_mounted(stderr) {
        return Ok(());
    }
    anyhow::bail!("Failed to unmount {}: {}", target.display(), stderr)
}

fn is_not_mounted(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("not mounted") || stderr.contains("no mount point") || stderr.contains("not found")
}
