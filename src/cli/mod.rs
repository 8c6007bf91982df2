//! CLI module
//!
//! Provides the command-line interface:
//! - init: write a default configuration and create data directories
//! - start: boot the store and serve the admin endpoint

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{init, run, run_command, start};
pub use errors::{CliError, CliErrorCode, CliResult};
