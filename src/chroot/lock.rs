//! Advisory lock on a work directory.
//!
//! Two sessions sharing a work dir would fight over the same image, mount
//! point and loop device. The lock is an exclusive `flock` on a file inside
//! the work dir, held for the whole pipeline.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::session::LOCK_FILE;

#[derive(Debug)]
pub struct WorkDirLock {
    file: File,
    path: PathBuf,
}

impl WorkDirLock {
    /// Take the lock without blocking; a held lock is `SessionLocked`.
    pub fn acquire(work_dir: &Path) -> Result<Self> {
        fs::create_dir_all(work_dir)
            .with_context(|| format!("Failed to create work dir {}", work_dir.display()))?;
        let path = work_dir.join(LOCK_FILE);

        // The file itself is left in place; unlinking a lock file another
        // process still holds would let a third process lock a fresh inode.
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Failed to create lock file: {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            return Err(BuildError::SessionLocked(work_dir.to_path_buf()).into());
        }

        tracing::debug!("Locked {}", path.display());
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_is_refused() {
        let temp = TempDir::new().unwrap();
        let first = WorkDirLock::acquire(temp.path()).unwrap();

        let err = WorkDirLock::acquire(temp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::SessionLocked(_))
        ));

        drop(first);
        assert!(WorkDirLock::acquire(temp.path()).is_ok());
    }

    #[test]
    fn test_creates_work_dir() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("nested/work");
        let lock = WorkDirLock::acquire(&dir).unwrap();
        assert!(lock.path().exists());
    }
}
