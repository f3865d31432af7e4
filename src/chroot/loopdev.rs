//! Loop device attach/detach and the crash-recovery marker.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::BuildError;
use crate::process::{Cmd, CommandRunner};
use crate::session::{BuildSession, SessionStage};

/// Node for partition `n` of a partition-scanned loop device.
pub fn partition_node(device: &str, n: u32) -> String {
    format!("{}p{}", device, n)
}

/// Attach the session image to a free loop device with partition scanning,
/// then wait (fixed interval, bounded attempts) for the root partition node.
pub fn attach_loop(
    session: &mut BuildSession,
    runner: &dyn CommandRunner,
    config: &Config,
) -> Result<String> {
    let image = session.image_path();
    let result = Cmd::new("losetup")
        .args(["--find", "--show", "--partscan"])
        .arg_path(&image)
        .error_msg(format!("Failed to attach {} to a loop device", image.display()))
        .run_with(runner)?;

    let device = result.stdout_trimmed().to_string();
    if device.is_empty() {
        anyhow::bail!("losetup returned no device for {}", image.display());
    }

    // Ownership first: from here on teardown must detach it.
    session.mount.loop_device = Some(device.clone());
    session.mount.stage = SessionStage::LoopAttached;
    write_marker(&session.loop_marker(), &device)?;
    tracing::info!("Attached {} to {}", image.display(), device);

    let root_part = partition_node(&device, 2);
    let mut found = false;
    for attempt in 1..=config.partition_wait_attempts {
        if runner.device_exists(Path::new(&root_part)) {
            found = true;
            break;
        }
        tracing::debug!(
            "Waiting for {} ({}/{})",
            root_part,
            attempt,
            config.partition_wait_attempts
        );
        runner.settle(config.partition_wait_interval);
    }

    if !found {
        return Err(BuildError::NoPartitionsFound {
            device,
            expected: root_part,
        }
        .into());
    }

    Ok(device)
}

/// Detach a loop device. "Already detached" counts as success.
pub fn detach_loop(runner: &dyn CommandRunner, device: &str) -> Result<()> {
    let result = Cmd::new("losetup")
        .args(["-d", device])
        .allow_fail()
        .run_with(runner)?;

    if result.success() {
        tracing::info!("Detached {}", device);
        return Ok(());
    }

    let stderr = result.stderr_trimmed();
    if is_already_detached(stderr) {
        tracing::debug!("{} already detached", device);
        Ok(())
    } else {
        anyhow::bail!("Failed to detach {}: {}", device, stderr)
    }
}

fn is_already_detached(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such device") || stderr.contains("no such file")
}

pub fn write_marker(marker: &Path, device: &str) -> Result<()> {
    fs::write(marker, format!("{}\n", device))
        .with_context(|| format!("Failed to write loop marker {}", marker.display()))
}

/// Device recorded by a previous attach, if any.
pub fn read_marker(marker: &Path) -> Option<String> {
    let content = fs::read_to_string(marker).ok()?;
    let device = content.trim();
    (!device.is_empty()).then(|| device.to_string())
}

pub fn remove_marker(marker: &Path) -> Result<()> {
    match fs::remove_file(marker) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", marker.display())),
    }
}

/// Loop marker path for a work dir without a full session.
pub fn marker_in(work_dir: &Path) -> PathBuf {
    work_dir.join(crate::session::LOOP_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partition_node() {
        assert_eq!(partition_node("/dev/loop3", 1), "/dev/loop3p1");
        assert_eq!(partition_node("/dev/loop3", 2), "/dev/loop3p2");
    }

    #[test]
    fn test_marker_round_trip() {
        let temp = TempDir::new().unwrap();
        let marker = marker_in(temp.path());
        assert_eq!(read_marker(&marker), None);

        write_marker(&marker, "/dev/loop9").unwrap();
        assert_eq!(read_marker(&marker).as_deref(), Some("/dev/loop9"));

        remove_marker(&marker).unwrap();
        remove_marker(&marker).unwrap();
        assert!(!marker.exists());
    }

    #[test]
    fn test_empty_marker_is_none() {
        let temp = TempDir::new().unwrap();
        let marker = marker_in(temp.path());
        fs::write(&marker, "\n").unwrap();
        assert_eq!(read_marker(&marker), None);
    }

    #[test]
    fn test_already_detached_messages() {
        assert!(is_already_detached(
            "losetup: /dev/loop9: detach failed: No such device or address"
        ));
        assert!(!is_already_detached("losetup: /dev/loop9: detach failed: Device or resource busy"));
    }
}
