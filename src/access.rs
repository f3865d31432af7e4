//! Login password and SSH access inside the target root.

use anyhow::{Context, Result};
use std::fs;

use crate::chroot::chroot_cmd;
use crate::chroot::mounts::BOOT_DIR;
use crate::config::Config;
use crate::process::CommandRunner;
use crate::session::{BuildMode, BuildSession};

/// Set the login user's password, if one was given.
///
/// The `user:password` pair goes to `chpasswd` on stdin so it never shows up
/// in a process listing.
pub fn configure_password(
    session: &BuildSession,
    runner: &dyn CommandRunner,
    config: &Config,
) -> Result<bool> {
    let password = session.password_value();
    if password.is_empty() {
        match session.mode {
            BuildMode::Base => tracing::warn!("No password given; keeping the image default"),
            BuildMode::Incremental => tracing::info!("Inheriting password from the base image"),
        }
        return Ok(false);
    }

    chroot_cmd(&session.mount_point())
        .arg("chpasswd")
        .stdin_data(format!("{}:{}\n", config.pi_user, password))
        .secret(password)
        .error_msg(format!("Failed to set password for {}", config.pi_user))
        .run_with(runner)?;
    tracing::info!("Password set for {}", config.pi_user);
    Ok(true)
}

/// Whether this session should (re)enable SSH.
pub fn wants_ssh(session: &BuildSession) -> bool {
    match session.mode {
        BuildMode::Base => true,
        BuildMode::Incremental => !session.password_value().is_empty(),
    }
}

/// Enable the SSH server on first boot and in the default target.
pub fn enable_ssh(session: &BuildSession, runner: &dyn CommandRunner) -> Result<()> {
    let root = session.mount_point();
    let flag = root.join(BOOT_DIR).join("ssh");
    if let Some(parent) = flag.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&flag, "").with_context(|| format!("Failed to create {}", flag.display()))?;

    chroot_cmd(&root)
        .args(["systemctl", "enable", "ssh"])
        .error_msg("Failed to enable ssh")
        .run_with(runner)?;
    tracing::info!("SSH enabled");
    Ok(())
}
