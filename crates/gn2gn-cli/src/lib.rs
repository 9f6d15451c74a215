//! GN2GN CLI library
//!
//! Command-line front end of the GN2GN transfer engine: it reads a TOML
//! configuration file, wires the GeoNature export client and the PostgreSQL
//! destination together and runs a sync.
//!
//! - **Setup**: write a sample configuration (`gn2gn init`) and create the
//!   destination schema (`gn2gn db-init`)
//! - **Sync**: full download (`gn2gn full`) or incremental update from the
//!   stored watermarks (`gn2gn update`)
//! - **Status**: show each source's watermark (`gn2gn status`)
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod commands;
pub mod config;
pub mod error;

pub use config::SyncConfig;
pub use error::{CliError, Result};

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// gn2gn - copy GeoNature export data into PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "gn2gn")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Warnings and errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a sample configuration file
    Init {
        /// Configuration file to create
        file: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Create the destination schema and tables
    DbInit {
        /// Configuration file
        file: PathBuf,
    },

    /// Download everything, ignoring stored watermarks
    Full {
        /// Configuration file
        file: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Download what is new since the stored watermarks
    Update {
        /// Configuration file
        file: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Show the stored watermark of each source
    Status {
        /// Configuration file
        file: PathBuf,
    },
}

/// Options shared by `full` and `update`
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Only sync this source (repeatable)
    #[arg(short, long = "source", value_name = "NAME")]
    pub sources: Vec<String>,

    /// Sync into memory instead of the database
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}
