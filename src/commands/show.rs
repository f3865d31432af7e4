//! Show command - displays information.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::deps::parse_dependency_file;
use crate::hooks::parse::format_record;
use crate::hooks::parse_hook_list;

/// Show target for the show command.
pub enum ShowTarget {
    /// Show configuration
    Config,
    /// Show the hooks a hook list resolves to
    Hooks(PathBuf),
    /// Show the packages a dependency file resolves to
    Deps(PathBuf),
}

/// Execute the show command.
pub fn cmd_show(target: ShowTarget, config: &Config) -> Result<()> {
    match target {
        ShowTarget::Config => config.print(),
        ShowTarget::Hooks(path) => show_hooks(&path)?,
        ShowTarget::Deps(path) => {
            let packages = parse_dependency_file(&path)?;
            println!("{} package(s) in {}:", packages.len(), path.display());
            for package in packages {
                println!("  {}", package);
            }
        }
    }
    Ok(())
}

fn show_hooks(path: &Path) -> Result<()> {
    let mut hooks = Vec::new();
    parse_hook_list(path, &mut hooks)?;
    println!("{} hook(s) in {}:", hooks.len(), path.display());
    for (i, hook) in hooks.iter().enumerate() {
        let kind = if hook.is_parameterized() {
            "parameterized"
        } else {
            "simple"
        };
        println!("  #{} {} [{}]", i + 1, hook.name(), kind);
        println!("     {}", format_record(hook));
    }
    Ok(())
}
