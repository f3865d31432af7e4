//! Error taxonomy for image builds.
//!
//! Glue code returns `anyhow::Result`; anything the operator needs to tell
//! apart is raised as a [`BuildError`] so the binary can downcast it and pick
//! an exit code even after context has been attached.

use std::path::PathBuf;
use thiserror::Error;

/// Categorized build failures.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Malformed hook line at {}:{line}: expected 1 or at least 5 '|'-separated fields, found {fields}", .path.display())]
    MalformedHookLine {
        path: PathBuf,
        line: usize,
        fields: usize,
    },

    #[error("Hook script not found at {}:{line}: {}", .list.display(), .script.display())]
    HookScriptNotFound {
        list: PathBuf,
        line: usize,
        script: PathBuf,
    },

    #[error("No partitions appeared for {device} (expected {expected})")]
    NoPartitionsFound { device: String, expected: String },

    #[error("Failed to mount {partition} partition {device} at {}", .target.display())]
    MountFailed {
        partition: &'static str,
        device: String,
        target: PathBuf,
    },

    #[error("Emulator binary not found on host: {}", .0.display())]
    EmulatorMissing(PathBuf),

    #[error("Chroot at {} is unusable: {reason}", .root.display())]
    ChrootUnusable { root: PathBuf, reason: String },

    #[error("Package step '{step}' failed for [{}]", .packages.join(" "))]
    PackageOperationFailed { step: String, packages: Vec<String> },

    #[error("Hook #{ordinal} failed ({}) with exit code {code}", .hook.display())]
    HookFailed {
        hook: PathBuf,
        ordinal: usize,
        code: i32,
    },

    #[error("Post-build script failed ({}) with exit code {code}", .script.display())]
    PostBuildFailed { script: PathBuf, code: i32 },

    #[error("Low disk space in {}: {available_mb} MB available, {required_mb} MB needed", .dir.display())]
    LowDiskSpace {
        dir: PathBuf,
        available_mb: u64,
        required_mb: u64,
    },

    #[error("Invalid build mode '{0}' (expected 'base' or 'incremental')")]
    InvalidMode(String),

    #[error("Source image not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    #[error("Unsupported image format: {} (expected .img, .img.xz or .zip)", .0.display())]
    UnsupportedImageFormat(PathBuf),

    #[error("Work directory {} is locked by another build session", .0.display())]
    SessionLocked(PathBuf),

    #[error("Image verification failed, missing: {}", .missing.join(", "))]
    VerificationFailed { missing: Vec<String> },

    #[error("Aborted by user: {0}")]
    ConfirmationDeclined(String),
}

impl BuildError {
    /// Process exit code for this category.
    pub fn exit_code(&self) -> u8 {
        match self {
            BuildError::ConfigNotFound(_)
            | BuildError::MalformedHookLine { .. }
            | BuildError::HookScriptNotFound { .. }
            | BuildError::InvalidMode(_)
            | BuildError::ImageNotFound(_)
            | BuildError::UnsupportedImageFormat(_)
            | BuildError::SessionLocked(_)
            | BuildError::LowDiskSpace { .. }
            | BuildError::ConfirmationDeclined(_) => 2,
            BuildError::NoPartitionsFound { .. }
            | BuildError::MountFailed { .. }
            | BuildError::EmulatorMissing(_)
            | BuildError::ChrootUnusable { .. } => 3,
            BuildError::PackageOperationFailed { .. } => 4,
            BuildError::HookFailed { .. } | BuildError::PostBuildFailed { .. } => 5,
            BuildError::VerificationFailed { .. } => 6,
        }
    }
}

/// Exit code for an arbitrary error chain: the first [`BuildError`] found wins.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<BuildError>())
        .map(BuildError::exit_code)
        .unwrap_or(1)
}
