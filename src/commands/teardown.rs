//! Teardown command - cleans up after a preserved or crashed run.

use anyhow::Result;
use std::path::Path;

use crate::chroot::{self, WorkDirLock};
use crate::process::CommandRunner;

/// Execute the teardown command.
pub fn cmd_teardown(work_dir: &Path, runner: &dyn CommandRunner) -> Result<()> {
    let _lock = WorkDirLock::acquire(work_dir)?;
    chroot::teardown_work_dir(work_dir, runner)?;
    println!("Teardown of {} complete", work_dir.display());
    Ok(())
}
