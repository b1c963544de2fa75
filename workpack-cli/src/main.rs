//! Workpack: keep a master dataset and its work-package projects in sync.
//!
//! # Usage
//!
//! ```text
//! workpack sync <master-project> [--store <dir>] [--config <path>]
//!               [--max-workers <n>] [--dry-run] [--strict-conflicts]
//!               [--keep-artifacts] [--artifacts-dir <dir>] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::sync::SyncArgs;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "workpack",
    version,
    about = "Merge and split a master dataset across work-package projects",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one synchronization of a master project and its work packages.
    Sync(SyncArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Sync(args) => args.run(),
    }
}
