//! Host configuration for pibake.
//!
//! Reads configuration from environment variables. `main` loads a `.env`
//! file first (via dotenvy), so values there act as defaults that the real
//! environment overrides.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::BuildMode;

/// Default user-mode emulator for 64-bit Raspberry Pi OS.
pub const DEFAULT_QEMU_BINARY: &str = "/usr/bin/qemu-aarch64-static";

/// Host-side configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Statically linked emulator copied into the target root.
    pub qemu_binary: PathBuf,
    /// External image customizer/resizer.
    pub sdm: String,
    /// Host resolver config copied into the chroot.
    pub resolv_conf: PathBuf,
    /// Login user whose password gets configured.
    pub pi_user: String,
    /// How many times to look for partition nodes after attaching.
    pub partition_wait_attempts: u32,
    /// Fixed sleep between partition node probes.
    pub partition_wait_interval: Duration,
    /// Mode used when `--mode` is not given.
    pub default_mode: BuildMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qemu_binary: PathBuf::from(DEFAULT_QEMU_BINARY),
            sdm: "sdm".to_string(),
            resolv_conf: PathBuf::from("/etc/resolv.conf"),
            pi_user: "pi".to_string(),
            partition_wait_attempts: 10,
            partition_wait_interval: Duration::from_millis(1000),
            default_mode: BuildMode::Base,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars().collect())
    }

    /// Build configuration from an explicit variable map.
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        let defaults = Self::default();

        let qemu_binary = vars
            .get("PIBAKE_QEMU_BINARY")
            .map(PathBuf::from)
            .unwrap_or(defaults.qemu_binary);

        let sdm = vars.get("PIBAKE_SDM").cloned().unwrap_or(defaults.sdm);

        let resolv_conf = vars
            .get("PIBAKE_RESOLV_CONF")
            .map(PathBuf::from)
            .unwrap_or(defaults.resolv_conf);

        let pi_user = vars
            .get("PIBAKE_PI_USER")
            .cloned()
            .unwrap_or(defaults.pi_user);

        let partition_wait_attempts = parse_or(
            &vars,
            "PIBAKE_PARTITION_WAIT_ATTEMPTS",
            defaults.partition_wait_attempts,
        )
        .max(1);

        let partition_wait_interval = Duration::from_millis(parse_or(
            &vars,
            "PIBAKE_PARTITION_WAIT_MS",
            defaults.partition_wait_interval.as_millis() as u64,
        ));

        let default_mode = match vars.get("PIBAKE_MODE") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!("{}; falling back to '{}'", e, defaults.default_mode);
                defaults.default_mode
            }),
            None => defaults.default_mode,
        };

        Self {
            qemu_binary,
            sdm,
            resolv_conf,
            pi_user,
            partition_wait_attempts,
            partition_wait_interval,
            default_mode,
        }
    }

    /// Name of the emulator binary as installed inside the target.
    pub fn emulator_name(&self) -> String {
        self.qemu_binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "qemu-aarch64-static".to_string())
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  PIBAKE_QEMU_BINARY: {}", self.qemu_binary.display());
        println!("  PIBAKE_SDM: {}", self.sdm);
        println!("  PIBAKE_RESOLV_CONF: {}", self.resolv_conf.display());
        println!("  PIBAKE_PI_USER: {}", self.pi_user);
        println!(
            "  PIBAKE_PARTITION_WAIT_ATTEMPTS: {}",
            self.partition_wait_attempts
        );
        println!(
            "  PIBAKE_PARTITION_WAIT_MS: {}",
            self.partition_wait_interval.as_millis()
        );
        println!("  PIBAKE_MODE: {}", self.default_mode);
        if self.qemu_binary.exists() {
            println!("  Emulator: FOUND");
        } else {
            println!("  Emulator: NOT FOUND (install qemu-user-static)");
        }
    }
}

fn parse_or<T: std::str::FromStr>(vars: &HashMap<String, String>, key: &str, default: T) -> T {
    match vars.get(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}='{}'", key, raw);
            default
        }),
        None => default,
    }
}
