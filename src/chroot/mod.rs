//! Mount/chroot session management.
//!
//! ```text
//! Unattached -> LoopAttached -> PartitionsMounted -> PseudoFsBound
//!            -> EmulatorInstalled -> Ready            (any) -> TornDown
//! ```
//!
//! [`SessionGuard`] owns the session while it is mounted. Dropping the guard
//! tears everything down on every exit path, including `?` returns and
//! panics. Debug mode opts out explicitly with [`SessionGuard::preserve`].

pub mod lock;
pub mod loopdev;
pub mod mounts;

pub use lock::WorkDirLock;
pub use mounts::{remove_emulator, teardown};

use anyhow::Result;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::config::Config;
use crate::process::{Cmd, CommandRunner};
use crate::session::BuildSession;

/// Start a command that runs inside the chroot at `root`.
pub fn chroot_cmd(root: &Path) -> Cmd {
    Cmd::new("chroot").arg_path(root)
}

/// A mounted, chroot-ready session that cleans up after itself.
pub struct SessionGuard<'a> {
    session: &'a mut BuildSession,
    runner: &'a dyn CommandRunner,
    preserved: bool,
    released: bool,
}

impl<'a> SessionGuard<'a> {
    /// Take ownership of the session's mount state without mounting anything.
    pub fn new(session: &'a mut BuildSession, runner: &'a dyn CommandRunner) -> Self {
        Self {
            session,
            runner,
            preserved: false,
            released: false,
        }
    }

    pub fn runner(&self) -> &'a dyn CommandRunner {
        self.runner
    }

    /// Leave mounts and the loop device in place when the guard drops.
    pub fn preserve(&mut self) {
        self.preserved = true;
    }

    /// Tear down now and report the outcome.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        teardown(&mut *self.session, self.runner)
    }
}

impl Deref for SessionGuard<'_> {
    type Target = BuildSession;

    fn deref(&self) -> &BuildSession {
        self.session
    }
}

impl DerefMut for SessionGuard<'_> {
    fn deref_mut(&mut self) -> &mut BuildSession {
        self.session
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.preserved {
            tracing::warn!(
                "Debug mode: leaving {} mounted",
                self.session.mount_point().display()
            );
            return;
        }
        if let Err(e) = teardown(&mut *self.session, self.runner) {
            tracing::error!("{:#}", e);
        }
    }
}

/// Bring a session from `Unattached` to `Ready`.
///
/// A leftover loop marker from a crashed run is torn down first. If any step
/// fails, the returned error has already triggered cleanup of the steps that
/// succeeded (unless debug mode preserves them).
pub fn open<'a>(
    session: &'a mut BuildSession,
    runner: &'a dyn CommandRunner,
    config: &Config,
) -> Result<SessionGuard<'a>> {
    if let Some(stale) = loopdev::read_marker(&session.loop_marker()) {
        tracing::warn!("Found stale loop device {} from a previous run; cleaning up", stale);
        teardown(session, runner)?;
    }

    let mut guard = SessionGuard::new(session, runner);
    if let Err(e) = setup(&mut guard, config) {
        if guard.debug {
            guard.preserve();
        }
        return Err(e);
    }
    Ok(guard)
}

fn setup(guard: &mut SessionGuard<'_>, config: &Config) -> Result<()> {
    let runner = guard.runner();
    loopdev::attach_loop(guard, runner, config)?;
    mounts::mount_partitions(guard, runner)?;
    mounts::bind_pseudo_filesystems(guard, runner, config)?;
    mounts::install_emulator(guard, config)?;
    mounts::verify_chroot(guard, runner)?;
    Ok(())
}

/// Tear down whatever a work dir's loop marker says is attached.
pub fn teardown_work_dir(work_dir: &Path, runner: &dyn CommandRunner) -> Result<()> {
    let mut session = BuildSession::new(
        crate::session::BuildMode::Base,
        work_dir.to_path_buf(),
        work_dir.to_path_buf(),
    );
    session.mount.loop_device = loopdev::read_marker(&loopdev::marker_in(work_dir));
    match &session.mount.loop_device {
        Some(device) => tracing::info!("Tearing down {} ({})", work_dir.display(), device),
        None => tracing::info!("No loop device recorded in {}", work_dir.display()),
    }
    teardown(&mut session, runner)
}
