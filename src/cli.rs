//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chips reachable over the maintenance transport by default.
pub const DEFAULT_CHIPS: &[&str] = &[
    "MX6DQP", "MX6SDL", "MX6SL", "MX6SX", "MX6UL", "MX6ULL", "MX6SLL", "MX7SD", "MX8MQ", "MX8QXP",
    "MX8QM", "VYBRID",
];

#[derive(Parser)]
#[command(name = "smxboot")]
#[command(author, version, about = "Boot image composer and programming-script compiler", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Override the accepted CHIP values (comma-separated)
    #[arg(long, value_delimiter = ',', global = true)]
    pub chip_list: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse a document and list its segments and scripts
    Info {
        /// Document file
        file: PathBuf,
    },

    /// Resolve a script and print the command table with progress weights
    Compile {
        /// Document file
        file: PathBuf,

        /// Script name (defaults to the first script in BODY)
        script: Option<String>,

        /// Total progress budget distributed across the commands
        #[arg(long, default_value = "1000")]
        budget: u64,
    },

    /// Load a document and write every resolved segment payload to files
    Export {
        /// Document file
        file: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}
