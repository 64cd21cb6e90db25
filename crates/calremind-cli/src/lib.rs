//! Daemon wiring, configuration and event administration
//!
//! This crate provides the `calremind` command-line interface.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod secret;

pub use cli::Cli;
pub use config::DaemonConfig;
pub use error::{CliError, CliResult};
