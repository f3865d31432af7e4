//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Build a base or incremental image
//! - `teardown` - Release mounts and the loop device left by a run
//! - `show` - Display configuration and parsed input files
//! - `preflight` - Run preflight checks

pub mod build;
mod preflight;
pub mod show;
mod teardown;

pub use build::{cmd_build, BuildOptions};
pub use preflight::cmd_preflight;
pub use show::{cmd_show, ShowTarget};
pub use teardown::cmd_teardown;
