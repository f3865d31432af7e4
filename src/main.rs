//! pibake - two-stage Raspberry Pi OS image builder.
//!
//! - `base` mode: resize a stock image and install runtime + build packages
//! - `incremental` mode: run application hooks on a base image, then purge
//!   the build packages

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use pibake::commands::{self, BuildOptions, ShowTarget};
use pibake::config::Config;
use pibake::error::exit_code_for;
use pibake::pipeline::TerminalPrompt;
use pibake::process::HostRunner;

#[derive(Parser)]
#[command(name = "pibake")]
#[command(about = "Raspberry Pi OS image builder")]
#[command(
    after_help = "QUICK START:\n  pibake preflight                              Check the host\n  pibake build --mode base --image os.img.xz --work-dir work ...\n  pibake build --mode incremental --image base.img --work-dir work --hooks hooks.txt\n  pibake teardown --work-dir work               Clean up after --debug"
)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a base or incremental image
    Build {
        /// base or incremental (default: PIBAKE_MODE, else base)
        #[arg(long)]
        mode: Option<String>,

        /// Source image (.img, .img.xz or .zip)
        #[arg(long)]
        image: PathBuf,

        /// Working directory for the image and its mount point
        #[arg(long)]
        work_dir: PathBuf,

        /// File name of the work image (default: source name without compression suffix)
        #[arg(long)]
        output_name: Option<String>,

        /// Password for the login user
        #[arg(long, env = "PI_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Grow the image by this many MB (base mode)
        #[arg(long, default_value = "0")]
        extend_mb: u64,

        /// Runtime dependency file, or "none"
        #[arg(long)]
        runtime_deps: Option<String>,

        /// Build dependency file, or "none"
        #[arg(long)]
        build_deps: Option<String>,

        /// Hook list file
        #[arg(long)]
        hooks: Option<PathBuf>,

        /// Inline hook (script path or pipe-delimited record); repeatable
        #[arg(long = "hook")]
        hook: Vec<String>,

        /// System-wide script run after all hooks
        #[arg(long)]
        post_build: Option<PathBuf>,

        /// Do not purge build dependencies (incremental mode)
        #[arg(long)]
        keep_build_deps: bool,

        /// Leave mounts in place on failure for inspection
        #[arg(long)]
        debug: bool,

        /// Reuse an existing work image and resume completed steps
        #[arg(long)]
        reuse_image: bool,

        /// Answer yes to every confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Unmount and detach whatever a work directory still holds
    Teardown {
        #[arg(long)]
        work_dir: PathBuf,
    },

    /// Run preflight checks (host tools, privileges, emulator)
    Preflight {
        /// Fail if any checks fail (exit code 1)
        #[arg(long)]
        strict: bool,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowCommand,
    },
}

#[derive(Subcommand)]
enum ShowCommand {
    /// Show current configuration
    Config,
    /// Show the hooks a hook list resolves to
    Hooks { file: PathBuf },
    /// Show the packages a dependency file resolves to
    Deps { file: PathBuf },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::from_env();
    let runner = HostRunner;

    match cli.command {
        Commands::Build {
            mode,
            image,
            work_dir,
            output_name,
            password,
            extend_mb,
            runtime_deps,
            build_deps,
            hooks,
            hook,
            post_build,
            keep_build_deps,
            debug,
            reuse_image,
            yes,
        } => {
            let opts = BuildOptions {
                mode,
                image,
                work_dir,
                output_name,
                password,
                extend_mb,
                runtime_deps,
                build_deps,
                hooks_file: hooks,
                hooks: hook,
                post_build,
                keep_build_deps,
                debug,
                reuse_image,
            };
            commands::cmd_build(&opts, &config, &runner, &TerminalPrompt { assume_yes: yes })?;
        }
        Commands::Teardown { work_dir } => commands::cmd_teardown(&work_dir, &runner)?,
        Commands::Preflight { strict } => commands::cmd_preflight(&config, strict)?,
        Commands::Show { what } => {
            let target = match what {
                ShowCommand::Config => ShowTarget::Config,
                ShowCommand::Hooks { file } => ShowTarget::Hooks(file),
                ShowCommand::Deps { file } => ShowTarget::Deps(file),
            };
            commands::cmd_show(target, &config)?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    // Load .env if present
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}
