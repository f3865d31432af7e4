//! Work image preparation: workspace, source extraction, disk space, resizer.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::BuildError;
use crate::process::{Cmd, CommandRunner};
use crate::session::{BuildMode, BuildSession};

const MB: u64 = 1024 * 1024;

/// Staging directory for archive extraction, inside the work dir.
const UNPACK_DIR: &str = ".unpack";

/// Layout of the source image on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Raw,
    Xz,
    Zip,
}

impl ImageFormat {
    pub fn detect(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".img.xz") {
            Ok(Self::Xz)
        } else if name.ends_with(".zip") {
            Ok(Self::Zip)
        } else if name.ends_with(".img") {
            Ok(Self::Raw)
        } else {
            Err(BuildError::UnsupportedImageFormat(path.to_path_buf()).into())
        }
    }
}

/// How the work image came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    Copied,
    Decompressed,
    Unzipped,
    /// The source already is the work image (e.g. a base build's output).
    InPlace,
    /// `--reuse-image` and a work image was already there.
    Reused,
}

/// Create the work dir and mount point.
pub fn prepare_workspace(session: &BuildSession) -> Result<()> {
    let mount_point = session.mount_point();
    fs::create_dir_all(&mount_point)
        .with_context(|| format!("Failed to create {}", mount_point.display()))?;
    tracing::info!("Workspace ready at {}", session.work_dir.display());
    Ok(())
}

/// Produce the mutable work image from the source image.
pub fn materialize(session: &BuildSession, runner: &dyn CommandRunner) -> Result<ImageOrigin> {
    let image = session.image_path();

    if session.reuse_image && image.is_file() {
        tracing::info!("[SKIP] Reusing existing work image {}", image.display());
        return Ok(ImageOrigin::Reused);
    }
    if !session.source_image.is_file() {
        return Err(BuildError::ImageNotFound(session.source_image.clone()).into());
    }

    let format = ImageFormat::detect(&session.source_image)?;
    tracing::info!(
        "Preparing {} from {}",
        image.display(),
        session.source_image.display()
    );

    match format {
        ImageFormat::Raw => {
            // Copying a file onto itself truncates it.
            if same_file(&session.source_image, &image) {
                tracing::info!("Source is the work image; using it in place");
                return Ok(ImageOrigin::InPlace);
            }
            fs::copy(&session.source_image, &image).with_context(|| {
                format!("Failed to copy {}", session.source_image.display())
            })?;
            Ok(ImageOrigin::Copied)
        }
        ImageFormat::Xz => {
            // xz strips the suffix in place: <image>.xz -> <image>
            let staged = PathBuf::from(format!("{}.xz", image.display()));
            let mut xz = Cmd::new("xz").args(["--decompress", "--force"]);
            if same_file(&session.source_image, &staged) {
                // Decompressing would otherwise delete the caller's archive.
                xz = xz.arg("--keep");
            } else {
                fs::copy(&session.source_image, &staged).with_context(|| {
                    format!("Failed to copy {}", session.source_image.display())
                })?;
            }
            xz.arg_path(&staged)
                .error_msg("xz decompression failed")
                .run_with(runner)?;
            Ok(ImageOrigin::Decompressed)
        }
        ImageFormat::Zip => {
            let unpack = session.work_dir.join(UNPACK_DIR);
            if unpack.exists() {
                fs::remove_dir_all(&unpack)?;
            }
            fs::create_dir_all(&unpack)?;
            Cmd::new("unzip")
                .args(["-o", "-q"])
                .arg_path(&session.source_image)
                .arg("-d")
                .arg_path(&unpack)
                .error_msg("unzip failed")
                .run_with(runner)?;

            let inner = single_image_in(&unpack)?;
            fs::rename(&inner, &image)
                .with_context(|| format!("Failed to move {} into place", inner.display()))?;
            fs::remove_dir_all(&unpack)?;
            Ok(ImageOrigin::Unzipped)
        }
    }
}

/// Whether both paths exist and resolve to the same file.
fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn single_image_in(dir: &Path) -> Result<PathBuf> {
    let images: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "img"))
        .collect();

    match images.as_slice() {
        [one] => Ok(one.clone()),
        [] => bail!("Archive contains no .img file"),
        _ => bail!("Archive contains {} .img files; expected one", images.len()),
    }
}

/// Free space on the work dir filesystem against what the build needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub available_mb: u64,
    pub required_mb: u64,
}

impl DiskSpace {
    pub fn is_sufficient(&self) -> bool {
        self.available_mb > self.required_mb
    }

    pub fn to_error(&self, dir: &Path) -> BuildError {
        BuildError::LowDiskSpace {
            dir: dir.to_path_buf(),
            available_mb: self.available_mb,
            required_mb: self.required_mb,
        }
    }
}

/// Twice the source image plus the requested extension.
pub fn required_mb(source_bytes: u64, extend_mb: u64) -> u64 {
    (source_bytes * 2).div_ceil(MB) + extend_mb
}

pub fn check_disk_space(session: &BuildSession) -> Result<DiskSpace> {
    let source_bytes = fs::metadata(&session.source_image)
        .map(|m| m.len())
        .unwrap_or(0);
    let available = fs2::available_space(&session.work_dir).with_context(|| {
        format!("Failed to query free space on {}", session.work_dir.display())
    })?;
    let space = DiskSpace {
        available_mb: available / MB,
        required_mb: required_mb(source_bytes, session.extend_size_mb),
    };
    tracing::debug!(
        "Disk space: {} MB available, {} MB required",
        space.available_mb,
        space.required_mb
    );
    Ok(space)
}

/// Arguments for the external resizer, or `None` when there is nothing to do.
pub fn resizer_args(session: &BuildSession) -> Option<Vec<String>> {
    let image = session.image_path().display().to_string();
    match session.mode {
        BuildMode::Base if session.extend_size_mb > 0 => Some(vec![
            "--extend".to_string(),
            "--xmb".to_string(),
            session.extend_size_mb.to_string(),
            "--batch".to_string(),
            image,
        ]),
        BuildMode::Base => None,
        BuildMode::Incremental => Some(vec![
            "--redo-customize".to_string(),
            "--batch".to_string(),
            image,
        ]),
    }
}

/// Invoke the external resizer on the work image.
pub fn run_resizer(
    session: &BuildSession,
    runner: &dyn CommandRunner,
    config: &Config,
) -> Result<bool> {
    let Some(args) = resizer_args(session) else {
        tracing::info!("[SKIP] Resize: no extension requested");
        return Ok(false);
    };
    tracing::info!("Running {} on {}", config.sdm, session.image_path().display());
    let status = Cmd::new(&config.sdm)
        .args(&args)
        .allow_fail()
        .run_interactive_with(runner)?;
    if !status.success() {
        bail!(
            "{} exited with {}",
            config.sdm,
            status.code().unwrap_or(-1)
        );
    }
    Ok(true)
}

/// Size of the finished image, for the summary.
pub fn image_size_mb(session: &BuildSession) -> Option<u64> {
    fs::metadata(session.image_path()).ok().map(|m| m.len() / MB)
}
