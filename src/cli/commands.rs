//! CLI command implementations
//!
//! `init` writes a default configuration file and creates the data
//! directories. `start` opens the store (restoring registered volumes)
//! and serves the admin endpoint until the process is stopped.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use crate::admin::AdminServer;
use crate::config::StoreConfig;
use crate::observability::Logger;
use crate::store::Store;

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Start { config } => start(&config),
    }
}

/// Write a default configuration file and create its directories.
///
/// Does not start a server and does not touch existing volume files. An
/// existing configuration file is left alone.
pub fn init(config_path: &Path) -> CliResult<()> {
    if config_path.exists() {
        return Err(CliError::config_error(format!(
            "config file {} already exists",
            config_path.display()
        )));
    }

    let config = StoreConfig::default();
    config
        .save(config_path)
        .map_err(|e| CliError::config_error(format!("failed to write config: {}", e)))?;

    fs::create_dir_all(&config.block_dir).map_err(|e| {
        CliError::config_error(format!(
            "failed to create {}: {}",
            config.block_dir.display(),
            e
        ))
    })?;
    fs::create_dir_all(&config.index_dir).map_err(|e| {
        CliError::config_error(format!(
            "failed to create {}: {}",
            config.index_dir.display(),
            e
        ))
    })?;

    Logger::info(
        "INIT_COMPLETE",
        &[("config", &config_path.display().to_string())],
    );
    Ok(())
}

/// Boot the node and serve the admin endpoint.
///
/// Boot order: load config, open the store (reopen registered volumes,
/// rediscover free volumes), then bind the admin listener.
pub fn start(config_path: &Path) -> CliResult<()> {
    let config = StoreConfig::load(config_path)
        .map_err(|e| CliError::config_error(e.to_string()))?;

    let admin_config = config.admin.clone();
    let store = Arc::new(Store::open(config)?);
    Logger::info(
        "STORE_STARTED",
        &[
            ("volumes", &store.volume_ids().len().to_string()),
            ("free_volumes", &store.free_volume_count().to_string()),
        ],
    );

    let server = AdminServer::new(admin_config, store);
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("failed to create tokio runtime: {}", e)))?;
    rt.block_on(server.start())
        .map_err(|e| CliError::boot_failed(format!("admin server failed: {}", e)))?;

    Ok(())
}
