//! Host environment checks (privileges, loop support, resolver).

use std::path::Path;

use crate::config::Config;

use super::types::CheckResult;

/// Check the host can attach, mount and chroot.
pub fn check_build_environment(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    results.push(check_root(euid));

    if Path::new("/dev/loop-control").exists() {
        results.push(CheckResult::pass("loop devices"));
    } else {
        results.push(CheckResult::fail(
            "loop devices",
            "/dev/loop-control missing - load the 'loop' kernel module",
        ));
    }

    if config.resolv_conf.exists() {
        results.push(CheckResult::pass_with(
            "resolv.conf",
            &config.resolv_conf.display().to_string(),
        ));
    } else {
        results.push(CheckResult::warn(
            "resolv.conf",
            &format!(
                "{} missing - hooks will have no DNS inside the chroot",
                config.resolv_conf.display()
            ),
        ));
    }

    results
}

fn check_root(euid: u32) -> CheckResult {
    if euid == 0 {
        CheckResult::pass("root privileges")
    } else {
        CheckResult::fail(
            "root privileges",
            &format!("running as uid {} - losetup, mount and chroot need root", euid),
        )
    }
}
