//! Library interface for pibake.
//!
//! Exposes the build pipeline and its components so the binary and the
//! integration tests share one implementation.

pub mod access;
pub mod chroot;
pub mod commands;
pub mod config;
pub mod deps;
pub mod error;
pub mod hooks;
pub mod image;
pub mod packages;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod session;
pub mod timing;
