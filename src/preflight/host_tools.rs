//! Host tool availability checks.

use std::path::Path;

use crate::config::Config;

use super::types::CheckResult;

/// Tools the build shells out to on the host: (tool, package, purpose).
const REQUIRED_TOOLS: &[(&str, &str, &str)] = &[
    ("losetup", "util-linux", "Attaches the work image to a loop device"),
    ("mount", "util-linux", "Mounts image partitions and pseudo-filesystems"),
    ("umount", "util-linux", "Tears down the session"),
    ("chroot", "coreutils", "Runs commands inside the image"),
];

const OPTIONAL_TOOLS: &[(&str, &str, &str)] = &[
    ("xz", "xz-utils", "Needed for .img.xz source images"),
    ("unzip", "unzip", "Needed for .zip source images"),
];

/// Check host tools are installed.
pub fn check_host_tools(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    for (tool, package, purpose) in REQUIRED_TOOLS {
        results.push(check_tool_exists(tool, package, purpose, true));
    }
    for (tool, package, purpose) in OPTIONAL_TOOLS {
        results.push(check_tool_exists(tool, package, purpose, false));
    }
    results.push(check_tool_exists(
        &config.sdm,
        "sdm",
        "Resizes and prepares Raspberry Pi OS images",
        true,
    ));

    results.push(check_emulator(&config.qemu_binary));
    results.push(check_binfmt(&config.emulator_name()));
    results
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    let found = which::which(tool)
        .map(|path| path.display().to_string())
        .map_err(|_| format!("Not found. Install '{}' package. {}", package, purpose));
    CheckResult::require(tool, found, required)
}

fn check_emulator(binary: &Path) -> CheckResult {
    if binary.is_file() {
        CheckResult::pass_with("emulator", &binary.display().to_string())
    } else {
        CheckResult::fail(
            "emulator",
            &format!(
                "{} not found. Install qemu-user-static or set PIBAKE_QEMU_BINARY",
                binary.display()
            ),
        )
    }
}

/// binfmt_misc must route target binaries to the emulator.
fn check_binfmt(emulator: &str) -> CheckResult {
    let entry_name = emulator.trim_end_matches("-static");
    let entry = Path::new("/proc/sys/fs/binfmt_misc").join(entry_name);
    if entry.exists() {
        CheckResult::pass_with("binfmt", &entry.display().to_string())
    } else {
        CheckResult::warn(
            "binfmt",
            &format!(
                "{} is not registered; chroot commands will fail until binfmt support is enabled",
                entry_name
            ),
        )
    }
}
