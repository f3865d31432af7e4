//! Mode-aware input validation.
//!
//! Hard errors abort before anything touches the disk. Arguments that make
//! no sense for the selected mode only produce warnings. A few "are you
//! sure" conditions ask for confirmation instead.

use anyhow::Result;
use std::io::{self, BufRead, Write};

use crate::error::BuildError;
use crate::image::ImageFormat;
use crate::session::{BuildMode, BuildSession};

/// Outcome of validating a session before the build starts.
#[derive(Debug, Default)]
pub struct Validation {
    pub warnings: Vec<String>,
    /// Conditions the operator has to confirm before continuing.
    pub confirmations: Vec<String>,
}

/// Something that can answer yes/no questions.
pub trait Prompt {
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// Asks on the terminal unless `--yes` was given.
pub struct TerminalPrompt {
    pub assume_yes: bool,
}

impl Prompt for TerminalPrompt {
    fn confirm(&self, question: &str) -> Result<bool> {
        if self.assume_yes {
            tracing::info!("{} [auto-confirmed]", question);
            return Ok(true);
        }
        print!("{} [y/N] ", question);
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

/// Fixed answer, for non-interactive callers.
pub struct FixedAnswer(pub bool);

impl Prompt for FixedAnswer {
    fn confirm(&self, _question: &str) -> Result<bool> {
        Ok(self.0)
    }
}

/// Check a session's inputs.
pub fn validate(session: &BuildSession) -> Result<Validation> {
    let mut v = Validation::default();

    let reusable = session.reuse_image && session.image_path().is_file();
    if !reusable {
        if !session.source_image.is_file() {
            return Err(BuildError::ImageNotFound(session.source_image.clone()).into());
        }
        ImageFormat::detect(&session.source_image)?;
    }

    if let Some(script) = &session.post_build_script {
        if !script.is_file() {
            return Err(BuildError::ConfigNotFound(script.clone()).into());
        }
    }

    match session.mode {
        BuildMode::Base => {
            if !session.hooks.is_empty() {
                v.warnings.push(format!(
                    "{} hook(s) ignored in base mode",
                    session.hooks.len()
                ));
            }
            if session.post_build_script.is_some() {
                v.warnings
                    .push("Post-build script ignored in base mode".to_string());
            }
            if session.keep_build_deps {
                v.warnings
                    .push("--keep-build-deps has no effect in base mode".to_string());
            }
            if session.password_value().is_empty() {
                v.confirmations
                    .push("No password given; the image keeps its default login. Continue?".to_string());
            }
            if !session.runtime_deps.is_enabled() && !session.build_deps.is_enabled() {
                v.warnings
                    .push("Both dependency sets are disabled; no packages will be installed".to_string());
            }
        }
        BuildMode::Incremental => {
            if session.extend_size_mb > 0 {
                v.warnings.push(format!(
                    "--extend-mb {} ignored in incremental mode",
                    session.extend_size_mb
                ));
            }
            if session.runtime_deps.is_enabled() {
                v.warnings.push(
                    "Runtime dependencies ignored in incremental mode (installed by the base build)"
                        .to_string(),
                );
            }
            if session.hooks.is_empty() && session.post_build_script.is_none() {
                v.confirmations
                    .push("No hooks and no post-build script; the image will barely change. Continue?".to_string());
            }
        }
    }

    Ok(v)
}

/// Log warnings and ask for every confirmation; declining aborts.
pub fn settle(validation: &Validation, prompt: &dyn Prompt) -> Result<()> {
    for warning in &validation.warnings {
        tracing::warn!("{}", warning);
    }
    for question in &validation.confirmations {
        if !prompt.confirm(question)? {
            return Err(BuildError::ConfirmationDeclined(question.clone()).into());
        }
    }
    Ok(())
}
