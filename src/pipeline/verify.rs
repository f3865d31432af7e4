//! Post-build structure checks on the mounted root.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::chroot::mounts::BOOT_DIR;
use crate::error::BuildError;
use crate::hooks::engine::fetch_plan;
use crate::hooks::steps::strip_root;
use crate::session::{BuildMode, BuildSession};

/// Directories every Raspberry Pi OS root must have.
const EXPECTED_DIRS: &[&str] = &["etc", "usr/bin", BOOT_DIR, "var/lib/dpkg"];

/// Paths (relative to the root) the finished image must contain.
pub fn expected_paths(session: &BuildSession) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = EXPECTED_DIRS.iter().map(PathBuf::from).collect();

    if session.mode == BuildMode::Incremental {
        for hook in &session.hooks {
            if let Some(plan) = fetch_plan(hook) {
                paths.push(strip_root(plan.dest()).to_path_buf());
            } else if let Some(params) = &hook.params {
                if !params.install_dest.is_empty() {
                    paths.push(strip_root(Path::new(&params.install_dest)).to_path_buf());
                }
            }
        }
    }
    paths
}

/// Fail with every missing path listed, not just the first.
pub fn verify(session: &BuildSession) -> Result<()> {
    let root = session.mount_point();
    let missing: Vec<String> = expected_paths(session)
        .into_iter()
        .filter(|p| !root.join(p).exists())
        .map(|p| p.display().to_string())
        .collect();

    if missing.is_empty() {
        tracing::info!("Verified image structure under {}", root.display());
        Ok(())
    } else {
        Err(BuildError::VerificationFailed { missing }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HookParams, HookSource, HookSpec};
    use std::fs;
    use tempfile::TempDir;

    fn rootfs(session: &BuildSession) {
        for dir in EXPECTED_DIRS {
            fs::create_dir_all(session.mount_point().join(dir)).unwrap();
        }
    }

    #[test]
    fn test_verify_base_layout() {
        let temp = TempDir::new().unwrap();
        let session = BuildSession::new(
            BuildMode::Base,
            temp.path().join("os.img"),
            temp.path().to_path_buf(),
        );
        assert!(verify(&session).is_err());
        rootfs(&session);
        verify(&session).unwrap();
    }

    #[test]
    fn test_hook_destinations_are_checked() {
        let temp = TempDir::new().unwrap();
        let mut session = BuildSession::new(
            BuildMode::Incremental,
            temp.path().join("os.img"),
            temp.path().to_path_buf(),
        );
        session.hooks.push(HookSpec {
            script: temp.path().join("app.sh"),
            params: Some(HookParams {
                source_ref: "https://example.com/org/Thing.git".to_string(),
                source: HookSource::parse("https://example.com/org/Thing.git"),
                revision: String::new(),
                install_dest: "/opt".to_string(),
                dep_list: String::new(),
                post_install: None,
            }),
        });
        rootfs(&session);

        let err = verify(&session).unwrap_err();
        match err.downcast_ref::<BuildError>() {
            Some(BuildError::VerificationFailed { missing }) => {
                assert_eq!(missing, &vec!["opt/Thing".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        fs::create_dir_all(session.mount_point().join("opt/Thing")).unwrap();
        verify(&session).unwrap();
    }
}
