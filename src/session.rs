//! Build session state.
//!
//! A [`BuildSession`] is created once from the command line and passed by
//! reference to every component. The only kernel-visible state it owns is the
//! attached loop device and the mount stage in [`MountState`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::deps::DependencySet;
use crate::error::BuildError;
use crate::hooks::HookSpec;
use crate::process::MASK;

/// Name of the mount point directory inside the work dir.
pub const MOUNT_DIR: &str = "mnt";
/// Crash-recovery marker holding the attached loop device path.
pub const LOOP_MARKER: &str = "loop_device";
/// Advisory lock file guarding the work dir.
pub const LOCK_FILE: &str = ".pibake.lock";

/// Which pipeline stage to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Fresh image: resize, install runtime + build dependencies.
    Base,
    /// Start from a base image: run hooks, purge build dependencies.
    Incremental,
}

impl FromStr for BuildMode {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "base" => Ok(BuildMode::Base),
            "incremental" | "incr" => Ok(BuildMode::Incremental),
            other => Err(BuildError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Base => write!(f, "base"),
            BuildMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// A string that never prints itself.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The real value. Only for feeding stdin or child environments.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", MASK)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(MASK)
    }
}

/// Progress of the mount/chroot state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SessionStage {
    #[default]
    Unattached,
    LoopAttached,
    PartitionsMounted,
    PseudoFsBound,
    EmulatorInstalled,
    Ready,
    TornDown,
}

/// Mutable mount state owned by the session.
#[derive(Debug, Clone, Default)]
pub struct MountState {
    pub loop_device: Option<String>,
    pub stage: SessionStage,
}

/// One build invocation.
#[derive(Debug, Clone)]
pub struct BuildSession {
    pub mode: BuildMode,
    pub source_image: PathBuf,
    pub work_dir: PathBuf,
    /// File name of the image inside `work_dir`.
    pub image_name: String,
    pub password: Option<Secret>,
    pub extend_size_mb: u64,
    pub runtime_deps: DependencySet,
    pub build_deps: DependencySet,
    pub hooks: Vec<HookSpec>,
    pub post_build_script: Option<PathBuf>,
    pub keep_build_deps: bool,
    pub debug: bool,
    /// Reuse an existing work image instead of extracting a fresh one.
    pub reuse_image: bool,
    pub mount: MountState,
}

impl BuildSession {
    /// Start a session with empty collections; callers fill in the rest.
    pub fn new(mode: BuildMode, source_image: PathBuf, work_dir: PathBuf) -> Self {
        let image_name = default_image_name(&source_image);
        Self {
            mode,
            source_image,
            work_dir,
            image_name,
            password: None,
            extend_size_mb: 0,
            runtime_deps: DependencySet::disabled("runtime", crate::deps::DepIntent::Runtime),
            build_deps: DependencySet::disabled("build", crate::deps::DepIntent::InstallThenPurge),
            hooks: Vec::new(),
            post_build_script: None,
            keep_build_deps: false,
            debug: false,
            reuse_image: false,
            mount: MountState::default(),
        }
    }

    /// The mutable disk image being customized.
    pub fn image_path(&self) -> PathBuf {
        self.work_dir.join(&self.image_name)
    }

    /// Root of the mounted target filesystem.
    pub fn mount_point(&self) -> PathBuf {
        self.work_dir.join(MOUNT_DIR)
    }

    pub fn loop_marker(&self) -> PathBuf {
        self.work_dir.join(LOOP_MARKER)
    }

    /// Password value for the hook environment (empty if unchanged).
    pub fn password_value(&self) -> &str {
        self.password.as_ref().map(Secret::expose).unwrap_or("")
    }
}

/// Derive the work image name from the source: compression suffixes are
/// dropped so `foo.img.xz` and `foo.zip` both become `foo.img`.
pub fn default_image_name(source: &Path) -> String {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.img".to_string());

    let stem = name
        .strip_suffix(".xz")
        .or_else(|| name.strip_suffix(".zip"))
        .unwrap_or(&name);

    if stem.ends_with(".img") {
        stem.to_string()
    } else {
        format!("{}.img", stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("base".parse::<BuildMode>().unwrap(), BuildMode::Base);
        assert_eq!(
            "Incremental".parse::<BuildMode>().unwrap(),
            BuildMode::Incremental
        );
        let err = "full".parse::<BuildMode>().unwrap_err();
        assert!(matches!(err, BuildError::InvalidMode(m) if m == "full"));
    }

    #[test]
    fn test_secret_never_prints() {
        let secret = Secret::new("raspberry");
        assert_eq!(format!("{}", secret), MASK);
        assert!(!format!("{:?}", secret).contains("raspberry"));
        assert_eq!(secret.expose(), "raspberry");
    }

    #[test]
    fn test_session_debug_masks_password() {
        let mut session = BuildSession::new(
            BuildMode::Base,
            PathBuf::from("/images/os.img"),
            PathBuf::from("/work"),
        );
        session.password = Some(Secret::new("raspberry"));
        assert!(!format!("{:?}", session).contains("raspberry"));
    }

    #[test]
    fn test_default_image_name() {
        assert_eq!(default_image_name(Path::new("/a/os.img")), "os.img");
        assert_eq!(default_image_name(Path::new("/a/os.img.xz")), "os.img");
        assert_eq!(default_image_name(Path::new("/a/os.zip")), "os.img");
    }

    #[test]
    fn test_workspace_paths() {
        let session = BuildSession::new(
            BuildMode::Incremental,
            PathBuf::from("/images/base.img"),
            PathBuf::from("/work"),
        );
        assert_eq!(session.image_path(), PathBuf::from("/work/base.img"));
        assert_eq!(session.mount_point(), PathBuf::from("/work/mnt"));
        assert_eq!(session.loop_marker(), PathBuf::from("/work/loop_device"));
        assert_eq!(session.password_value(), "");
    }
}
