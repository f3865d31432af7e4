//! Shared test utilities for pibake tests.

#![allow(dead_code)]

use anyhow::Result;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Duration;
use tempfile::TempDir;

use pibake::config::Config;
use pibake::process::{Cmd, CommandResult, CommandRunner};
use pibake::session::{BuildMode, BuildSession};

pub const FAKE_LOOP: &str = "/dev/loop7";

/// Test environment: a source image, a work dir and host-side config files.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub base_dir: PathBuf,
    pub image: PathBuf,
    pub work_dir: PathBuf,
    pub config: Config,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();

        let image = base_dir.join("raspios.img");
        fs::write(&image, vec![0u8; 4096]).expect("Failed to create image");

        let qemu = base_dir.join("qemu-aarch64-static");
        fs::write(&qemu, "#!/bin/sh\n").expect("Failed to create emulator");
        let resolv = base_dir.join("resolv.conf");
        fs::write(&resolv, "nameserver 192.0.2.53\n").expect("Failed to create resolv.conf");

        let config = Config {
            qemu_binary: qemu,
            resolv_conf: resolv,
            partition_wait_attempts: 2,
            partition_wait_interval: Duration::from_millis(0),
            ..Config::default()
        };

        Self {
            work_dir: base_dir.join("work"),
            _temp_dir: temp_dir,
            base_dir,
            image,
            config,
        }
    }

    pub fn session(&self, mode: BuildMode) -> BuildSession {
        BuildSession::new(mode, self.image.clone(), self.work_dir.clone())
    }

    pub fn mount_point(&self) -> PathBuf {
        self.work_dir.join("mnt")
    }

    /// Write a file under the base dir and return its path.
    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.base_dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Write an executable shell script.
    pub fn script(&self, rel: &str, body: &str) -> PathBuf {
        let path = self.write(rel, &format!("#!/bin/sh\n{}\n", body));
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("Failed to chmod script");
        path
    }
}

/// A session-setup failure the fake can inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The root partition node never appears after attaching.
    NoPartitions,
    /// Mounting partition 1 (boot) fails.
    BootMount,
    /// `chroot <root> /bin/true` fails, as with a broken emulator.
    ChrootProbe,
}

/// Simulates the host side of a build: loop devices, mounts, apt-get.
///
/// Hook scripts and post-install commands really run, with `sh` on the host
/// and the hook environment, so whatever they write under `$MOUNT_POINT`
/// lands in the test's mount dir.
#[derive(Default)]
pub struct FakeRunner {
    log: RefCell<Vec<String>>,
    mounted: RefCell<BTreeSet<PathBuf>>,
    attached: RefCell<bool>,
    fault: Option<Fault>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fault(fault: Fault) -> Self {
        Self {
            fault: Some(fault),
            ..Self::default()
        }
    }

    /// Every command executed so far, in display form.
    pub fn commands(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.log.borrow().iter().any(|c| c.contains(needle))
    }

    pub fn is_attached(&self) -> bool {
        *self.attached.borrow()
    }

    pub fn mounted(&self) -> Vec<PathBuf> {
        self.mounted.borrow().iter().cloned().collect()
    }

    fn record(&self, cmd: &Cmd) {
        self.log.borrow_mut().push(cmd.to_string());
    }

    fn losetup(&self, cmd: &Cmd) -> CommandResult {
        let args = cmd.get_args();
        if args.first().map(String::as_str) == Some("--find") {
            *self.attached.borrow_mut() = true;
            return ok(&format!("{}\n", FAKE_LOOP));
        }
        if self.is_attached() {
            *self.attached.borrow_mut() = false;
            ok("")
        } else {
            failed(
                1,
                &format!("losetup: {}: detach failed: No such device or address", FAKE_LOOP),
            )
        }
    }

    fn mount(&self, cmd: &Cmd) -> CommandResult {
        let Some(target) = cmd.get_args().last().map(PathBuf::from) else {
            return failed(1, "mount: bad usage");
        };
        let device = cmd.get_args().first().cloned().unwrap_or_default();
        if self.fault == Some(Fault::BootMount) && device.ends_with("p1") {
            return failed(32, &format!("mount: {}: wrong fs type, bad option", device));
        }
        let is_root = device.ends_with("p2");
        if is_root {
            // What a Raspberry Pi OS root partition brings along.
            for dir in ["etc", "usr/bin", "var/lib/dpkg/info", "tmp"] {
                let _ = fs::create_dir_all(target.join(dir));
            }
        }
        self.mounted.borrow_mut().insert(target);
        ok("")
    }

    fn umount(&self, cmd: &Cmd) -> CommandResult {
        let target = cmd.get_args().last().map(PathBuf::from).unwrap_or_default();
        if self.mounted.borrow_mut().remove(&target) {
            ok("")
        } else {
            failed(32, &format!("umount: {}: not mounted.", target.display()))
        }
    }

    fn chroot_interactive(&self, cmd: &Cmd) -> Result<ExitStatus> {
        let args = cmd.get_args();
        let root = PathBuf::from(&args[0]);
        let inner: Vec<&str> = args[1..].iter().map(String::as_str).collect();

        match inner.as_slice() {
            ["apt-get", "install", rest @ ..] => {
                for pkg in rest.iter().filter(|a| !a.starts_with('-')) {
                    fs::write(dpkg_marker(&root, pkg), "")?;
                }
                Ok(status(0))
            }
            ["apt-get", "purge", rest @ ..] => {
                for pkg in rest.iter().filter(|a| !a.starts_with('-')) {
                    let _ = fs::remove_file(dpkg_marker(&root, pkg));
                }
                Ok(status(0))
            }
            ["git", "clone", .., dest] => {
                fs::create_dir_all(root.join(dest.trim_start_matches('/')).join(".git"))?;
                Ok(status(0))
            }
            ["/bin/bash", "-c", commands] => run_host(cmd, &["-c", *commands]),
            ["/bin/bash", script] => {
                let host_path = root.join(script.trim_start_matches('/'));
                run_host(cmd, &[host_path.to_string_lossy().as_ref()])
            }
            _ => Ok(status(0)),
        }
    }
}

impl CommandRunner for FakeRunner {
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult> {
        self.record(cmd);
        Ok(match cmd.program() {
            "losetup" => self.losetup(cmd),
            "mount" => self.mount(cmd),
            "umount" => self.umount(cmd),
            "chroot"
                if self.fault == Some(Fault::ChrootProbe)
                    && cmd.get_args().last().map(String::as_str) == Some("/bin/true") =>
            {
                failed(126, "chroot: failed to run command '/bin/true': Exec format error")
            }
            _ => ok(""),
        })
    }

    fn execute_interactive(&self, cmd: &Cmd) -> Result<ExitStatus> {
        self.record(cmd);
        match cmd.program() {
            "chroot" => self.chroot_interactive(cmd),
            _ => Ok(status(0)),
        }
    }

    fn device_exists(&self, _path: &Path) -> bool {
        self.is_attached() && self.fault != Some(Fault::NoPartitions)
    }

    fn settle(&self, _interval: Duration) {}
}

pub fn dpkg_marker(root: &Path, package: &str) -> PathBuf {
    root.join("var/lib/dpkg/info").join(format!("{}.list", package))
}

fn run_host(cmd: &Cmd, args: &[&str]) -> Result<ExitStatus> {
    let mut command = Command::new("sh");
    command.args(args);
    for (k, v) in cmd.get_envs() {
        command.env(k, v);
    }
    Ok(command.status()?)
}

fn status(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

fn ok(stdout: &str) -> CommandResult {
    CommandResult {
        status: status(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn failed(code: i32, stderr: &str) -> CommandResult {
    CommandResult {
        status: status(code),
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected {} to exist", path.display());
}

pub fn assert_file_missing(path: &Path) {
    assert!(!path.exists(), "Expected {} to be absent", path.display());
}
