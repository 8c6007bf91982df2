//! CLI argument definitions using clap
//!
//! Commands:
//! - volstore init --config <path>
//! - volstore start --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// volstore - an append-only blob storage node
#[derive(Parser, Debug)]
#[command(name = "volstore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default configuration file and create the data directories
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./volstore.json")]
        config: PathBuf,
    },

    /// Start the store node and serve the admin endpoint
    Start {
        /// Path to configuration file
        #[arg(long, default_value = "./volstore.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
