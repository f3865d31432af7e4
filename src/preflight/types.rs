//! Preflight check types and report.

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    /// Check passed.
    Pass,
    /// Check failed - a build will fail.
    Fail,
    /// Check passed but with a warning.
    Warn,
    /// Check skipped (not applicable).
    Skip,
}

impl CheckStatus {
    fn label(self) -> (&'static str, &'static str) {
        match self {
            CheckStatus::Pass => ("✓", "PASS"),
            CheckStatus::Fail => ("✗", "FAIL"),
            CheckStatus::Warn => ("⚠", "WARN"),
            CheckStatus::Skip => ("○", "SKIP"),
        }
    }
}

impl CheckResult {
    fn with(name: &str, status: CheckStatus, details: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            status,
            details: details.map(str::to_string),
        }
    }

    pub fn pass(name: &str) -> Self {
        Self::with(name, CheckStatus::Pass, None)
    }

    pub fn pass_with(name: &str, details: &str) -> Self {
        Self::with(name, CheckStatus::Pass, Some(details))
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self::with(name, CheckStatus::Fail, Some(details))
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self::with(name, CheckStatus::Warn, Some(details))
    }

    pub fn skip(name: &str, details: &str) -> Self {
        Self::with(name, CheckStatus::Skip, Some(details))
    }

    /// Pass or, depending on `required`, fail/warn.
    pub fn require(name: &str, ok: Result<String, String>, required: bool) -> Self {
        match ok {
            Ok(details) if details.is_empty() => Self::pass(name),
            Ok(details) => Self::pass_with(name, &details),
            Err(details) if required => Self::fail(name, &details),
            Err(details) => Self::warn(name, &details),
        }
    }
}

/// Results of all preflight checks.
#[derive(Debug, Default)]
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    /// Returns true if nothing failed.
    pub fn all_passed(&self) -> bool {
        self.fail_count() == 0
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn fail_count(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn warn_count(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    /// The report as printed by `pibake preflight`.
    pub fn render(&self) -> String {
        let mut out = String::from("=== Preflight Check Results ===\n\n");
        for check in &self.checks {
            let (icon, label) = check.status.label();
            out.push_str(&format!("  {} [{}] {}", icon, label, check.name));
            if let Some(details) = &check.details {
                out.push_str(&format!(": {}", details));
            }
            out.push('\n');
        }

        out.push_str(&format!(
            "\nSummary: {}/{} passed\n",
            self.count(CheckStatus::Pass),
            self.checks.len()
        ));
        if self.fail_count() > 0 {
            out.push_str(&format!(
                "         {} FAILED - builds will not succeed\n",
                self.fail_count()
            ));
        }
        if self.warn_count() > 0 {
            out.push_str(&format!("         {} warnings\n", self.warn_count()));
        }
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}
