//! Centralized command execution with consistent error handling.
//!
//! Every external tool (losetup, mount, chroot, apt-get, sdm, git) is invoked
//! through [`Cmd`] with an explicit argument vector. Nothing is ever passed
//! through a shell string built by interpolation.
//!
//! Execution goes through the [`CommandRunner`] trait so the build pipeline
//! can be driven against a recording fake in tests. [`HostRunner`] is the real
//! implementation.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

/// Placeholder printed instead of secret values.
pub const MASK: &str = "********";

/// Result of a command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout as a string.
    pub stdout: String,
    /// Captured stderr as a string.
    pub stderr: String,
}

impl CommandResult {
    /// Returns true if the command exited successfully.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Get the exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Get stdout, trimmed of whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Get stderr, trimmed of whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for configuring command execution.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    /// Values that must never show up in logs or error messages.
    secrets: Vec<String>,
    stdin: Option<String>,
    /// If true, don't fail on non-zero exit.
    allow_fail: bool,
    /// Custom error message prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Create a new command builder.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            secrets: Vec::new(),
            stdin: None,
            allow_fail: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(arg.as_ref().to_string());
        }
        self
    }

    /// Add a path as an argument.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.envs
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Set several environment variables.
    pub fn envs<'a, I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (k, v) in vars {
            self.envs.push((k.clone(), v.clone()));
        }
        self
    }

    /// Register a value that must be masked whenever the command is displayed.
    pub fn secret(mut self, value: impl AsRef<str>) -> Self {
        let value = value.as_ref();
        if !value.is_empty() {
            self.secrets.push(value.to_string());
        }
        self
    }

    /// Feed `data` to the child's stdin.
    pub fn stdin_data(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set a custom error message prefix.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// Look up an environment variable set on this command.
    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    fn mask(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for secret in &self.secrets {
            masked = masked.replace(secret.as_str(), MASK);
        }
        masked
    }

    fn to_std(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        cmd
    }

    /// Turn a raw result into an error unless the command succeeded or
    /// failure was explicitly allowed.
    fn check(&self, result: CommandResult) -> Result<CommandResult> {
        if !self.allow_fail && !result.success() {
            let prefix = self
                .error_prefix
                .clone()
                .unwrap_or_else(|| format!("'{}' failed", self.program));

            let stderr = self.mask(result.stderr_trimmed());
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }
        Ok(result)
    }

    /// Run the command on the host and capture output.
    pub fn run(self) -> Result<CommandResult> {
        self.run_with(&HostRunner)
    }

    /// Run the command through `runner` and capture output.
    pub fn run_with(self, runner: &dyn CommandRunner) -> Result<CommandResult> {
        tracing::debug!(command = %self, "exec");
        let result = runner.execute(&self)?;
        self.check(result)
    }

    /// Run the command with inherited stdio (interactive/streaming).
    ///
    /// Output goes directly to the terminal. Use for long-running commands
    /// where the user should see progress (package installs, hooks).
    pub fn run_interactive_with(self, runner: &dyn CommandRunner) -> Result<ExitStatus> {
        tracing::debug!(command = %self, "exec (interactive)");
        let status = runner.execute_interactive(&self)?;

        if !self.allow_fail && !status.success() {
            let prefix = self
                .error_prefix
                .unwrap_or_else(|| format!("'{}' failed", self.program));
            bail!("{} (exit code {})", prefix, status.code().unwrap_or(-1));
        }

        Ok(status)
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            let arg = self.mask(arg);
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Something that can execute a [`Cmd`].
///
/// `execute` must not interpret the exit status; [`Cmd`] does that itself
/// according to its `allow_fail` setting.
pub trait CommandRunner {
    /// Execute and capture stdout/stderr.
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult>;

    /// Execute with inherited stdio.
    fn execute_interactive(&self, cmd: &Cmd) -> Result<ExitStatus>;

    /// Whether a device node exists (partition nodes after `losetup -P`).
    fn device_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Block for `interval` while waiting on the kernel.
    fn settle(&self, interval: Duration) {
        std::thread::sleep(interval);
    }
}

/// Runs commands on the real host.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn execute(&self, cmd: &Cmd) -> Result<CommandResult> {
        let mut command = cmd.to_std();
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        command.stdin(if cmd.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", cmd.program))?;

        if let Some(data) = &cmd.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(data.as_bytes())
                    .with_context(|| format!("Failed to write stdin of '{}'", cmd.program))?;
            }
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for '{}'", cmd.program))?;

        Ok(CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn execute_interactive(&self, cmd: &Cmd) -> Result<ExitStatus> {
        let mut command = cmd.to_std();
        command.stdin(Stdio::inherit());
        command.stdout(Stdio::inherit());
        command.stderr(Stdio::inherit());

        command
            .status()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", cmd.program))
    }
}

// =============================================================================
// Tests
// =============================================================================
